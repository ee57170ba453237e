use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    definitions::Routing,
    key::{Key, KeyError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetadataKey {
    /// Routing chosen when the invitation was received, used on acceptance
    RecipientRouting,
    /// The invitation was received in a pre out-of-band format
    LegacyInvitation,
}

/// Routing in a form that can be persisted with a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRouting {
    pub recipient_key_fingerprint: String,
    pub routing_key_fingerprints: Vec<String>,
    pub endpoints: Vec<String>,
    pub mediator_id: Option<String>,
}

impl From<&Routing> for StoredRouting {
    fn from(routing: &Routing) -> Self {
        Self {
            recipient_key_fingerprint: routing.recipient_key.fingerprint(),
            routing_key_fingerprints: routing.routing_keys.iter().map(Key::fingerprint).collect(),
            endpoints: routing.endpoints.clone(),
            mediator_id: routing.mediator_id.clone(),
        }
    }
}

impl StoredRouting {
    pub fn to_routing(&self) -> Result<Routing, KeyError> {
        Ok(Routing {
            recipient_key: Key::from_fingerprint(&self.recipient_key_fingerprint)?,
            routing_keys: self
                .routing_key_fingerprints
                .iter()
                .map(|fingerprint| Key::from_fingerprint(fingerprint))
                .collect::<Result<_, _>>()?,
            endpoints: self.endpoints.clone(),
            mediator_id: self.mediator_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegacyInvitationKind {
    ConnectionInvitation,
    ConnectionlessMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    RecipientRouting(StoredRouting),
    LegacyInvitation(LegacyInvitationKind),
}

impl MetadataValue {
    pub fn key(&self) -> MetadataKey {
        match self {
            MetadataValue::RecipientRouting(_) => MetadataKey::RecipientRouting,
            MetadataValue::LegacyInvitation(_) => MetadataKey::LegacyInvitation,
        }
    }
}

/// Typed metadata attached to an out-of-band record, at most one value per key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordMetadata(BTreeMap<MetadataKey, MetadataValue>);

impl RecordMetadata {
    /// Store a value, replacing the previous value for its key
    pub fn set(&mut self, value: MetadataValue) {
        self.0.insert(value.key(), value);
    }

    pub fn get(&self, key: MetadataKey) -> Option<&MetadataValue> {
        self.0.get(&key)
    }

    pub fn remove(&mut self, key: MetadataKey) -> Option<MetadataValue> {
        self.0.remove(&key)
    }

    pub fn recipient_routing(&self) -> Option<&StoredRouting> {
        match self.get(MetadataKey::RecipientRouting) {
            Some(MetadataValue::RecipientRouting(routing)) => Some(routing),
            _ => None,
        }
    }

    pub fn legacy_invitation(&self) -> Option<LegacyInvitationKind> {
        match self.get(MetadataKey::LegacyInvitation) {
            Some(MetadataValue::LegacyInvitation(kind)) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

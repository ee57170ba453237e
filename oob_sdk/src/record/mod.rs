use serde::{Deserialize, Serialize};

use crate::{
    invitation::Invitation,
    key::Key,
    messages::new_message_id,
};

mod metadata;
mod state;

pub use metadata::{
    LegacyInvitationKind, MetadataKey, MetadataValue, RecordMetadata, StoredRouting,
};
pub use state::{OutOfBandEvent, OutOfBandRole, OutOfBandState, OutOfBandStateMachine, StateError};

/// Persistent state of one out-of-band exchange, on either side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfBandRecord {
    pub id: String,
    /// Unix time in milliseconds
    pub created_at: u64,
    pub role: OutOfBandRole,
    pub state: OutOfBandState,
    pub invitation: Invitation,
    pub alias: Option<String>,
    pub mediator_id: Option<String>,
    /// A multi-use invitation, only meaningful for the sender
    pub reusable: bool,
    pub auto_accept_connection: bool,
    /// Set when an existing connection was reused instead of creating one
    pub reuse_connection_id: Option<String>,
    pub recipient_key_fingerprints: Vec<String>,
    #[serde(default, skip_serializing_if = "RecordMetadata::is_empty")]
    pub metadata: RecordMetadata,
}

impl OutOfBandRecord {
    /// Start a record in the first state of `role`
    pub fn new(
        role: OutOfBandRole,
        invitation: Invitation,
        recipient_key_fingerprints: Vec<String>,
    ) -> Result<Self, StateError> {
        let event = match role {
            OutOfBandRole::Sender => OutOfBandEvent::Create,
            OutOfBandRole::Receiver => OutOfBandEvent::Receive,
        };
        let state = OutOfBandStateMachine::transition(None, role, event)?;

        Ok(Self {
            id: new_message_id(),
            created_at: now_millis(),
            role,
            state,
            invitation,
            alias: None,
            mediator_id: None,
            reusable: false,
            auto_accept_connection: true,
            reuse_connection_id: None,
            recipient_key_fingerprints,
            metadata: RecordMetadata::default(),
        })
    }

    /// Apply `event`, returning the state the record was in before
    pub fn apply(&mut self, event: OutOfBandEvent) -> Result<OutOfBandState, StateError> {
        let previous = self.state;
        self.state = OutOfBandStateMachine::transition(Some(previous), self.role, event)?;

        Ok(previous)
    }

    pub fn tags(&self) -> OutOfBandTags<'_> {
        OutOfBandTags {
            role: self.role,
            state: self.state,
            invitation_id: self.invitation.id(),
            recipient_key_fingerprints: &self.recipient_key_fingerprints,
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Indexed values of a record
#[derive(Debug, Clone, Copy)]
pub struct OutOfBandTags<'a> {
    pub role: OutOfBandRole,
    pub state: OutOfBandState,
    pub invitation_id: &'a str,
    pub recipient_key_fingerprints: &'a [String],
}

/// Record filter, every field that is set must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutOfBandQuery {
    pub role: Option<OutOfBandRole>,
    pub state: Option<OutOfBandState>,
    pub invitation_id: Option<String>,
    pub recipient_key_fingerprint: Option<String>,
}

impl OutOfBandQuery {
    pub fn role(mut self, role: OutOfBandRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn state(mut self, state: OutOfBandState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn invitation_id(mut self, invitation_id: impl Into<String>) -> Self {
        self.invitation_id = Some(invitation_id.into());
        self
    }

    pub fn recipient_key(mut self, key: &Key) -> Self {
        self.recipient_key_fingerprint = Some(key.fingerprint());
        self
    }

    pub fn matches(&self, tags: &OutOfBandTags) -> bool {
        self.role.is_none_or(|role| role == tags.role)
            && self.state.is_none_or(|state| state == tags.state)
            && self
                .invitation_id
                .as_deref()
                .is_none_or(|id| id == tags.invitation_id)
            && self
                .recipient_key_fingerprint
                .as_ref()
                .is_none_or(|fingerprint| tags.recipient_key_fingerprints.contains(fingerprint))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::invitation::OutOfBandInvitation;

    const FINGERPRINT: &str = "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";

    fn record(role: OutOfBandRole) -> OutOfBandRecord {
        let mut invitation = OutOfBandInvitation::new("Faber");
        invitation.id = "invitation-1".to_string();

        OutOfBandRecord::new(
            role,
            Invitation::V1(invitation),
            vec![FINGERPRINT.to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(record(OutOfBandRole::Sender).state, OutOfBandState::AwaitResponse);
        assert_eq!(record(OutOfBandRole::Receiver).state, OutOfBandState::Initial);
    }

    #[test]
    fn test_apply() {
        let mut record = record(OutOfBandRole::Receiver);

        let previous = record.apply(OutOfBandEvent::BeginAccept).unwrap();
        assert_eq!(previous, OutOfBandState::Initial);
        assert_eq!(record.state, OutOfBandState::PrepareResponse);

        // a failed transition leaves the record untouched
        assert!(record.apply(OutOfBandEvent::BeginAccept).is_err());
        assert_eq!(record.state, OutOfBandState::PrepareResponse);
    }

    #[test]
    fn test_query() {
        let record = record(OutOfBandRole::Sender);
        let key = Key::from_fingerprint(FINGERPRINT).unwrap();

        assert!(OutOfBandQuery::default().matches(&record.tags()));
        assert!(
            OutOfBandQuery::default()
                .role(OutOfBandRole::Sender)
                .invitation_id("invitation-1")
                .recipient_key(&key)
                .matches(&record.tags())
        );
        assert!(
            !OutOfBandQuery::default()
                .role(OutOfBandRole::Receiver)
                .matches(&record.tags())
        );
        assert!(
            !OutOfBandQuery::default()
                .state(OutOfBandState::Done)
                .matches(&record.tags())
        );
    }

    #[test]
    fn test_serialization() {
        let record = record(OutOfBandRole::Sender);

        let json = serde_json::to_string(&record).unwrap();
        let restored: OutOfBandRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, record);
    }
}

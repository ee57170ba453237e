use base64ct::{Base64, Base64Unpadded, Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    definitions::ResolvedService,
    error::Error,
    key::{Key, KeyError},
    messages::AgentMessage,
    negotiation::ProtocolUri,
};

mod attachment;
mod error;
pub mod legacy;
pub mod url;
pub mod v2;

pub use attachment::{Attachment, AttachmentData};
pub use error::InvitationError;
pub use legacy::ConnectionInvitation;
pub use v2::OutOfBandInvitationV2;

pub const OUT_OF_BAND_INVITATION_TYPE: &str = "https://didcomm.org/out-of-band/1.1/invitation";
pub const INLINE_SERVICE_TYPE: &str = "did-communication";

const OUT_OF_BAND_FAMILY: &str = "out-of-band";
const INVITATION_NAME: &str = "invitation";

/// Decode base64 in any of the variants found in the wild: url-safe or
/// standard alphabet, with or without padding
pub(crate) fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    let trimmed = encoded.trim().trim_end_matches('=');

    Base64UrlUnpadded::decode_vec(trimmed)
        .or_else(|_| Base64Unpadded::decode_vec(trimmed))
        .or_else(|_| Base64::decode_vec(encoded.trim()))
        .ok()
}

/// A service declared inline in an invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineService {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    /// `did:key` references
    pub recipient_keys: Vec<String>,
    /// `did:key` references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,
    pub service_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<Vec<String>>,
}

impl InlineService {
    pub fn new(
        id: impl Into<String>,
        recipient_keys: &[Key],
        routing_keys: &[Key],
        service_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_type: INLINE_SERVICE_TYPE.to_string(),
            recipient_keys: recipient_keys.iter().map(Key::did_key).collect(),
            routing_keys: routing_keys.iter().map(Key::did_key).collect(),
            service_endpoint: service_endpoint.into(),
            accept: None,
        }
    }

    pub fn recipient_keys(&self) -> Result<Vec<Key>, KeyError> {
        self.recipient_keys
            .iter()
            .map(|k| Key::from_did_key(k))
            .collect()
    }

    pub fn routing_keys(&self) -> Result<Vec<Key>, KeyError> {
        self.routing_keys
            .iter()
            .map(|k| Key::from_did_key(k))
            .collect()
    }

    pub fn to_resolved(&self) -> Result<ResolvedService, KeyError> {
        Ok(ResolvedService {
            id: self.id.clone(),
            service_endpoint: self.service_endpoint.clone(),
            recipient_keys: self.recipient_keys()?,
            routing_keys: self.routing_keys()?,
        })
    }

    /// Encode the service as a `did:peer` (numalgo 2) identifier.
    ///
    /// The encoding is deterministic, so the same inline service always maps
    /// to the same identifier; connections record it as their invitation DID.
    pub fn to_peer_did(&self) -> Result<String, KeyError> {
        let mut did = String::from("did:peer:2");

        for key in self.recipient_keys()? {
            did.push_str(".V");
            did.push_str(&key.fingerprint());
        }

        let service = Base64UrlUnpadded::encode_string(
            json!({
                "t": "dm",
                "s": {
                    "uri": self.service_endpoint,
                    "routingKeys": self.routing_keys,
                }
            })
            .to_string()
            .as_bytes(),
        );

        did.push_str(".S");
        did.push_str(&service);

        Ok(did)
    }
}

/// A service of an invitation: inline, or a DID that has to be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutOfBandService {
    Did(String),
    Inline(InlineService),
}

/// An out-of-band invitation (version 1.x)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfBandInvitation {
    #[serde(rename = "@type")]
    pub message_type: String,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_protocols: Option<Vec<String>>,
    #[serde(rename = "requests~attach", default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<Vec<Attachment>>,
    #[serde(default)]
    pub services: Vec<OutOfBandService>,
    #[serde(rename = "~attach", default, skip_serializing_if = "Option::is_none")]
    pub appended_attachments: Option<Vec<Attachment>>,
}

impl OutOfBandInvitation {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            message_type: OUT_OF_BAND_INVITATION_TYPE.to_string(),
            id: crate::messages::new_message_id(),
            label: label.into(),
            goal_code: None,
            goal: None,
            image_url: None,
            accept: Vec::new(),
            handshake_protocols: None,
            requests: None,
            services: Vec::new(),
            appended_attachments: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, InvitationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, InvitationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn handshake_protocols(&self) -> &[String] {
        self.handshake_protocols.as_deref().unwrap_or_default()
    }

    pub fn has_requests(&self) -> bool {
        self.requests.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Attach a request message. The service decorator of the message is
    /// dropped, the services of the invitation supersede it.
    pub fn add_request(&mut self, mut message: AgentMessage) -> Result<(), InvitationError> {
        message.service = None;

        self.requests
            .get_or_insert_with(Vec::new)
            .push(Attachment::from_message(&message)?);

        Ok(())
    }

    /// The attached request messages, in declaration order
    pub fn requests(&self) -> Result<Vec<AgentMessage>, InvitationError> {
        self.requests
            .iter()
            .flatten()
            .map(Attachment::to_message)
            .collect()
    }

    /// Check the message type and that there is something to negotiate
    pub fn validate(&self) -> Result<(), Error> {
        if !is_invitation_type(&self.message_type, 1) {
            return Err(InvitationError::UnsupportedType(self.message_type.clone()).into());
        }

        if self.handshake_protocols().is_empty() && !self.has_requests() {
            return Err(Error::InvalidConfiguration(
                "one or both of handshake_protocols and requests~attach must be included in the message"
                    .into(),
            ));
        }

        Ok(())
    }

    pub fn inline_services(&self) -> impl Iterator<Item = &InlineService> {
        self.services.iter().filter_map(|service| match service {
            OutOfBandService::Inline(inline) => Some(inline),
            OutOfBandService::Did(_) => None,
        })
    }

    /// Recipient keys of the inline services
    pub fn recipient_keys(&self) -> Result<Vec<Key>, KeyError> {
        let mut keys = Vec::new();

        for service in self.inline_services() {
            keys.extend(service.recipient_keys()?);
        }

        Ok(keys)
    }

    pub fn fingerprints(&self) -> Result<Vec<String>, KeyError> {
        Ok(self
            .recipient_keys()?
            .iter()
            .map(Key::fingerprint)
            .collect())
    }

    /// Identifiers a connection created from this invitation is recorded under:
    /// DID services as-is, inline services encoded as `did:peer`
    pub fn invitation_dids(&self) -> Result<Vec<String>, KeyError> {
        self.services
            .iter()
            .map(|service| match service {
                OutOfBandService::Did(did) => Ok(did.clone()),
                OutOfBandService::Inline(inline) => inline.to_peer_did(),
            })
            .collect()
    }
}

pub(crate) fn is_invitation_type(message_type: &str, major: u32) -> bool {
    ProtocolUri::parse_message_type(message_type).is_some_and(|(uri, name)| {
        uri.family() == OUT_OF_BAND_FAMILY && uri.version().0 == major && name == INVITATION_NAME
    })
}

/// The invitation held by an out-of-band record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", content = "invitation")]
pub enum Invitation {
    V1(OutOfBandInvitation),
    V2(OutOfBandInvitationV2),
}

impl Invitation {
    pub fn id(&self) -> &str {
        match self {
            Invitation::V1(invitation) => &invitation.id,
            Invitation::V2(invitation) => &invitation.id,
        }
    }

    pub fn as_v1(&self) -> Option<&OutOfBandInvitation> {
        match self {
            Invitation::V1(invitation) => Some(invitation),
            Invitation::V2(_) => None,
        }
    }

    pub fn as_v2(&self) -> Option<&OutOfBandInvitationV2> {
        match self {
            Invitation::V1(_) => None,
            Invitation::V2(invitation) => Some(invitation),
        }
    }
}

/// Any invitation representation accepted on reception
#[derive(Debug, Clone, PartialEq)]
pub enum AnyInvitation {
    OutOfBand(OutOfBandInvitation),
    OutOfBandV2(OutOfBandInvitationV2),
    /// Legacy connection protocol invitation
    Connection(ConnectionInvitation),
    /// Legacy connectionless message carrying a `~service` decorator
    Connectionless(AgentMessage),
}

impl AnyInvitation {
    /// Detect the invitation format of a JSON document from its type
    pub fn from_json(json: &str) -> Result<Self, InvitationError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Self, InvitationError> {
        if let Some(message_type) = value.get("@type").and_then(Value::as_str) {
            if is_invitation_type(message_type, 1) {
                return Ok(AnyInvitation::OutOfBand(serde_json::from_value(value)?));
            }

            if legacy::is_connection_invitation_type(message_type) {
                return Ok(AnyInvitation::Connection(serde_json::from_value(value)?));
            }

            if value.get("~service").is_some() {
                return Ok(AnyInvitation::Connectionless(serde_json::from_value(value)?));
            }

            return Err(InvitationError::UnsupportedType(message_type.to_string()));
        }

        match value.get("type").and_then(Value::as_str) {
            Some(message_type) if is_invitation_type(message_type, 2) => {
                Ok(AnyInvitation::OutOfBandV2(serde_json::from_value(value)?))
            }
            Some(message_type) => Err(InvitationError::UnsupportedType(message_type.to_string())),
            None => Err(InvitationError::Invalid("missing message type".into())),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            AnyInvitation::OutOfBand(invitation) => &invitation.id,
            AnyInvitation::OutOfBandV2(invitation) => &invitation.id,
            AnyInvitation::Connection(invitation) => &invitation.id,
            AnyInvitation::Connectionless(message) => message.thread_id(),
        }
    }
}

impl From<OutOfBandInvitation> for AnyInvitation {
    fn from(invitation: OutOfBandInvitation) -> Self {
        AnyInvitation::OutOfBand(invitation)
    }
}

impl From<OutOfBandInvitationV2> for AnyInvitation {
    fn from(invitation: OutOfBandInvitationV2) -> Self {
        AnyInvitation::OutOfBandV2(invitation)
    }
}

impl From<ConnectionInvitation> for AnyInvitation {
    fn from(invitation: ConnectionInvitation) -> Self {
        AnyInvitation::Connection(invitation)
    }
}

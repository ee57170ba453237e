use serde::{Deserialize, Serialize};

use super::{InlineService, InvitationError, OutOfBandInvitation, OutOfBandService};
use crate::{
    key::{Key, KeyType},
    messages::AgentMessage,
    negotiation::{HandshakeProtocol, ProtocolUri},
};

pub const CONNECTION_INVITATION_TYPE: &str = "https://didcomm.org/connections/1.0/invitation";

pub(crate) fn is_connection_invitation_type(message_type: &str) -> bool {
    ProtocolUri::parse_message_type(message_type).is_some_and(|(uri, name)| {
        HandshakeProtocol::from_uri(&uri) == Some(HandshakeProtocol::Connections)
            && name == "invitation"
    })
}

/// Invitation of the connection protocol, predating out-of-band invitations.
///
/// Either a public `did` or an inline service (`recipientKeys` +
/// `serviceEndpoint`) is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInvitation {
    #[serde(rename = "@type")]
    pub message_type: String,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    /// Raw base58 encoded keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipient_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
    /// Raw base58 encoded keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ConnectionInvitation {
    /// Convert into an out-of-band invitation with the connection protocol as
    /// its only handshake protocol
    pub fn to_out_of_band(&self) -> Result<OutOfBandInvitation, InvitationError> {
        let service = match (&self.did, &self.service_endpoint) {
            (Some(did), _) => OutOfBandService::Did(did.clone()),
            (None, Some(endpoint)) if !self.recipient_keys.is_empty() => {
                OutOfBandService::Inline(InlineService::new(
                    "#inline",
                    &decode_keys(&self.recipient_keys)?,
                    &decode_keys(&self.routing_keys)?,
                    endpoint.clone(),
                ))
            }
            _ => {
                return Err(InvitationError::Invalid(
                    "connection invitation needs either a did or recipient keys and a service endpoint"
                        .into(),
                ));
            }
        };

        let mut invitation = OutOfBandInvitation::new(self.label.clone());
        invitation.id = self.id.clone();
        invitation.image_url = self.image_url.clone();
        invitation.handshake_protocols =
            Some(vec![HandshakeProtocol::Connections.uri().to_string()]);
        invitation.services = vec![service];

        Ok(invitation)
    }

    /// Produce the legacy shape of an out-of-band invitation that has exactly
    /// one service
    pub fn from_out_of_band(invitation: &OutOfBandInvitation) -> Result<Self, InvitationError> {
        let [service] = invitation.services.as_slice() else {
            return Err(InvitationError::Invalid(format!(
                "a legacy invitation needs exactly one service, found {}",
                invitation.services.len()
            )));
        };

        let mut legacy = ConnectionInvitation {
            message_type: CONNECTION_INVITATION_TYPE.to_string(),
            id: invitation.id.clone(),
            label: invitation.label.clone(),
            did: None,
            recipient_keys: Vec::new(),
            service_endpoint: None,
            routing_keys: Vec::new(),
            image_url: invitation.image_url.clone(),
        };

        match service {
            OutOfBandService::Did(did) => legacy.did = Some(did.clone()),
            OutOfBandService::Inline(inline) => {
                legacy.recipient_keys = encode_keys(&inline.recipient_keys()?);
                legacy.routing_keys = encode_keys(&inline.routing_keys()?);
                legacy.service_endpoint = Some(inline.service_endpoint.clone());
            }
        }

        Ok(legacy)
    }
}

/// Convert a legacy connectionless message into an out-of-band invitation
/// carrying the message as its only request
pub fn connectionless_to_out_of_band(
    message: &AgentMessage,
) -> Result<OutOfBandInvitation, InvitationError> {
    let Some(service) = &message.service else {
        return Err(InvitationError::Invalid(
            "connectionless message without ~service decorator".into(),
        ));
    };

    let mut invitation = OutOfBandInvitation::new("");
    invitation.id = message.thread_id().to_string();
    invitation.services = vec![OutOfBandService::Inline(InlineService::new(
        "#inline",
        &decode_keys(&service.recipient_keys)?,
        &decode_keys(&service.routing_keys)?,
        service.service_endpoint.clone(),
    ))];
    invitation.add_request(message.clone())?;

    Ok(invitation)
}

fn decode_keys(keys: &[String]) -> Result<Vec<Key>, InvitationError> {
    keys.iter()
        .map(|key| {
            // some agents put did:key references in legacy invitations
            Key::from_did_key(key)
                .or_else(|_| Key::from_public_key_base58(key, KeyType::Ed25519))
                .map_err(InvitationError::from)
        })
        .collect()
}

fn encode_keys(keys: &[Key]) -> Vec<String> {
    keys.iter().map(Key::public_key_base58).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::ServiceDecorator;

    const VERKEY: &str = "8HH5gYEeNc3z7PYXmd54d4x6qAfCNrqQqEB3nS7Zfu7K";

    fn legacy_invitation() -> ConnectionInvitation {
        ConnectionInvitation {
            message_type: CONNECTION_INVITATION_TYPE.to_string(),
            id: "b5c4a3f0".to_string(),
            label: "Alice".to_string(),
            did: None,
            recipient_keys: vec![VERKEY.to_string()],
            service_endpoint: Some("https://alice.example/endpoint".to_string()),
            routing_keys: vec![],
            image_url: None,
        }
    }

    #[test]
    fn test_convert_inline() {
        let invitation = legacy_invitation().to_out_of_band().unwrap();

        assert_eq!(invitation.id, "b5c4a3f0");
        assert_eq!(invitation.label, "Alice");
        assert_eq!(
            invitation.handshake_protocols(),
            &["https://didcomm.org/connections/1.0".to_string()]
        );

        let keys = invitation.recipient_keys().unwrap();
        assert_eq!(keys[0].public_key_base58(), VERKEY);
        invitation.validate().unwrap();

        let legacy = ConnectionInvitation::from_out_of_band(&invitation).unwrap();
        assert_eq!(legacy, legacy_invitation());
    }

    #[test]
    fn test_convert_public_did() {
        let legacy = ConnectionInvitation {
            did: Some("did:sov:LjgpST2rjsoxYegQDRm7EL".to_string()),
            recipient_keys: vec![],
            service_endpoint: None,
            ..legacy_invitation()
        };

        let invitation = legacy.to_out_of_band().unwrap();
        assert_eq!(
            invitation.services,
            vec![OutOfBandService::Did("did:sov:LjgpST2rjsoxYegQDRm7EL".to_string())]
        );
    }

    #[test]
    fn test_missing_service() {
        let legacy = ConnectionInvitation {
            service_endpoint: None,
            ..legacy_invitation()
        };

        assert!(matches!(
            legacy.to_out_of_band(),
            Err(InvitationError::Invalid(_))
        ));
    }

    #[test]
    fn test_connectionless_message() {
        let mut message =
            AgentMessage::new("https://didcomm.org/present-proof/1.0/request-presentation");
        message.service = Some(ServiceDecorator {
            recipient_keys: vec![VERKEY.to_string()],
            routing_keys: vec![],
            service_endpoint: "https://verifier.example".to_string(),
        });

        let invitation = connectionless_to_out_of_band(&message).unwrap();

        assert_eq!(invitation.id, message.id);
        assert!(invitation.handshake_protocols().is_empty());
        assert_eq!(invitation.requests().unwrap()[0].id, message.id);
        invitation.validate().unwrap();
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AttachmentData, InvitationError, is_invitation_type};
use crate::error::Error;

pub const OUT_OF_BAND_V2_INVITATION_TYPE: &str = "https://didcomm.org/out-of-band/2.0/invitation";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvitationBodyV2 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accept: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentV2 {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub data: AttachmentData,
}

/// An out-of-band invitation (version 2.0).
///
/// Version 2 invitations never carry handshake protocols, they only convey
/// request messages as attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfBandInvitationV2 {
    #[serde(rename = "type")]
    pub message_type: String,
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub body: InvitationBodyV2,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentV2>,
}

impl OutOfBandInvitationV2 {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            message_type: OUT_OF_BAND_V2_INVITATION_TYPE.to_string(),
            id: crate::messages::new_message_id(),
            from: from.into(),
            body: InvitationBodyV2::default(),
            attachments: Vec::new(),
        }
    }

    /// Attach a (DIDComm v2) request message as JSON
    pub fn add_request(&mut self, message: Value) {
        let id = message
            .get("id")
            .and_then(Value::as_str)
            .map(|id| format!("request-{id}"))
            .unwrap_or_else(|| format!("request-{}", self.attachments.len()));

        self.attachments.push(AttachmentV2 {
            id,
            media_type: Some(super::attachment::JSON_MIME_TYPE.to_string()),
            data: AttachmentData::from_json(value_without_service(message)),
        });
    }

    pub fn requests(&self) -> Result<Vec<Value>, InvitationError> {
        self.attachments
            .iter()
            .map(|attachment| attachment.data.json_value())
            .collect()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !is_invitation_type(&self.message_type, 2) {
            return Err(InvitationError::UnsupportedType(self.message_type.clone()).into());
        }

        if self.attachments.is_empty() {
            return Err(Error::InvalidConfiguration(
                "a version 2 invitation must contain at least one attachment".into(),
            ));
        }

        Ok(())
    }
}

fn value_without_service(mut message: Value) -> Value {
    if let Some(object) = message.as_object_mut() {
        object.remove("~service");
    }

    message
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attachments() {
        let mut invitation = OutOfBandInvitationV2::new("did:example:verifier");
        invitation.add_request(json!({
            "id": "f137e0db",
            "type": "https://didcomm.org/present-proof/3.0/request-presentation",
            "~service": { "serviceEndpoint": "https://old.example" }
        }));

        assert_eq!(invitation.attachments[0].id, "request-f137e0db");

        let requests = invitation.requests().unwrap();
        assert!(requests[0].get("~service").is_none());

        invitation.validate().unwrap();
    }

    #[test]
    fn test_wire_format() {
        let mut invitation = OutOfBandInvitationV2::new("did:example:verifier");
        invitation.body.goal_code = Some("streamlined-vp".into());

        let value = serde_json::to_value(&invitation).unwrap();
        assert_eq!(value["type"], json!(OUT_OF_BAND_V2_INVITATION_TYPE));
        assert_eq!(value["body"]["goal_code"], json!("streamlined-vp"));

        // nothing attached
        assert!(matches!(
            invitation.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}

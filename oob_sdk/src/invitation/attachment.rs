use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{InvitationError, decode_base64};
use crate::messages::AgentMessage;

pub const JSON_MIME_TYPE: &str = "application/json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl AttachmentData {
    pub fn from_json(value: Value) -> Self {
        Self {
            json: Some(value),
            ..Default::default()
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            base64: Some(Base64UrlUnpadded::encode_string(bytes)),
            ..Default::default()
        }
    }

    /// The embedded JSON document, either inline or base64 encoded
    pub fn json_value(&self) -> Result<Value, InvitationError> {
        if let Some(json) = &self.json {
            return Ok(json.clone());
        }

        match &self.base64 {
            Some(encoded) => {
                let bytes = decode_base64(encoded)
                    .ok_or_else(|| InvitationError::InvalidEncoding("attachment".into()))?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            None => Err(InvitationError::Invalid(
                "attachment does not contain embedded data".into(),
            )),
        }
    }
}

/// DIDComm v1 attachment (`~attach` and `requests~attach` entries)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "mime-type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data: AttachmentData,
}

impl Attachment {
    pub fn from_json(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            filename: None,
            description: None,
            data: AttachmentData::from_json(value),
        }
    }

    /// Attach a request message, the attachment id is derived from the message id
    pub fn from_message(message: &AgentMessage) -> Result<Self, InvitationError> {
        Ok(Self::from_json(
            format!("request-{}", message.id),
            serde_json::to_value(message)?,
        ))
    }

    pub fn to_message(&self) -> Result<AgentMessage, InvitationError> {
        Ok(serde_json::from_value(self.data.json_value()?)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_and_base64_data() {
        let document = json!({
            "@id": "e2b3e1b0",
            "@type": "https://didcomm.org/issue-credential/2.0/offer-credential"
        });

        let inline = Attachment::from_json("a", document.clone());
        assert_eq!(inline.data.json_value().unwrap(), document);

        let encoded = Attachment {
            data: AttachmentData::from_bytes(document.to_string().as_bytes()),
            ..inline.clone()
        };
        assert_eq!(encoded.to_message().unwrap().id, "e2b3e1b0");
    }

    #[test]
    fn test_attachment_wire_names() {
        let attachment = Attachment::from_json("request-0", json!({}));
        let value = serde_json::to_value(&attachment).unwrap();

        assert_eq!(value["@id"], json!("request-0"));
        assert_eq!(value["mime-type"], json!(JSON_MIME_TYPE));
        assert!(value.get("filename").is_none());
    }

    #[test]
    fn test_missing_data() {
        let attachment = Attachment {
            data: AttachmentData::default(),
            ..Attachment::from_json("x", json!(null))
        };

        assert!(matches!(
            attachment.to_message(),
            Err(InvitationError::Invalid(_))
        ));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::Key;

pub const HANDSHAKE_REUSE_TYPE: &str = "https://didcomm.org/out-of-band/1.1/handshake-reuse";
pub const HANDSHAKE_REUSE_ACCEPTED_TYPE: &str =
    "https://didcomm.org/out-of-band/1.1/handshake-reuse-accepted";

pub(crate) fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `~thread` decorator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDecorator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
}

/// `~service` decorator, used for connectionless exchanges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDecorator {
    /// Raw base58 encoded keys
    pub recipient_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,
    pub service_endpoint: String,
}

impl ServiceDecorator {
    pub fn new(recipient_keys: &[Key], routing_keys: &[Key], service_endpoint: String) -> Self {
        Self {
            recipient_keys: recipient_keys.iter().map(Key::public_key_base58).collect(),
            routing_keys: routing_keys.iter().map(Key::public_key_base58).collect(),
            service_endpoint,
        }
    }
}

/// A plaintext DIDComm v1 message
///
/// The protocol specific content is kept as a JSON map, only the decorators
/// this crate acts upon are typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: String,
    #[serde(rename = "~thread", default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadDecorator>,
    #[serde(rename = "~service", default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDecorator>,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl AgentMessage {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            message_type: message_type.into(),
            thread: None,
            service: None,
            content: Map::new(),
        }
    }

    pub fn with_content(mut self, key: impl Into<String>, value: Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    /// The thread id of this message, which defaults to its own id
    pub fn thread_id(&self) -> &str {
        self.thread
            .as_ref()
            .and_then(|t| t.thid.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn parent_thread_id(&self) -> Option<&str> {
        self.thread.as_ref().and_then(|t| t.pthid.as_deref())
    }

    pub fn set_thread(&mut self, thid: Option<String>, pthid: Option<String>) {
        self.thread = Some(ThreadDecorator { thid, pthid });
    }
}

/// Sent by an invitee over an existing connection instead of starting a new handshake
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReuseMessage {
    pub id: String,
    pub parent_thread_id: String,
}

impl HandshakeReuseMessage {
    pub fn new(parent_thread_id: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            parent_thread_id: parent_thread_id.into(),
        }
    }

    /// The thread of a reuse message is started by the message itself
    pub fn thread_id(&self) -> &str {
        &self.id
    }
}

impl From<HandshakeReuseMessage> for AgentMessage {
    fn from(reuse: HandshakeReuseMessage) -> Self {
        let mut message = AgentMessage::new(HANDSHAKE_REUSE_TYPE);
        message.id = reuse.id.clone();
        message.set_thread(Some(reuse.id), Some(reuse.parent_thread_id));

        message
    }
}

impl TryFrom<&AgentMessage> for HandshakeReuseMessage {
    type Error = crate::Error;

    fn try_from(message: &AgentMessage) -> Result<Self, Self::Error> {
        check_type(message, HANDSHAKE_REUSE_TYPE)?;

        let parent_thread_id = message.parent_thread_id().ok_or_else(|| {
            crate::Error::InvalidMessage("handshake reuse message without parent thread id".into())
        })?;

        Ok(Self {
            id: message.id.clone(),
            parent_thread_id: parent_thread_id.to_string(),
        })
    }
}

/// Reply of the inviter to a [HandshakeReuseMessage]
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReuseAcceptedMessage {
    pub id: String,
    pub thread_id: String,
    pub parent_thread_id: String,
}

impl HandshakeReuseAcceptedMessage {
    pub fn new(thread_id: impl Into<String>, parent_thread_id: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            thread_id: thread_id.into(),
            parent_thread_id: parent_thread_id.into(),
        }
    }
}

impl From<HandshakeReuseAcceptedMessage> for AgentMessage {
    fn from(accepted: HandshakeReuseAcceptedMessage) -> Self {
        let mut message = AgentMessage::new(HANDSHAKE_REUSE_ACCEPTED_TYPE);
        message.id = accepted.id;
        message.set_thread(Some(accepted.thread_id), Some(accepted.parent_thread_id));

        message
    }
}

impl TryFrom<&AgentMessage> for HandshakeReuseAcceptedMessage {
    type Error = crate::Error;

    fn try_from(message: &AgentMessage) -> Result<Self, Self::Error> {
        check_type(message, HANDSHAKE_REUSE_ACCEPTED_TYPE)?;

        let parent_thread_id = message.parent_thread_id().ok_or_else(|| {
            crate::Error::InvalidMessage(
                "handshake reuse accepted message without parent thread id".into(),
            )
        })?;

        Ok(Self {
            id: message.id.clone(),
            thread_id: message.thread_id().to_string(),
            parent_thread_id: parent_thread_id.to_string(),
        })
    }
}

fn check_type(message: &AgentMessage, expected: &str) -> Result<(), crate::Error> {
    let matches = crate::negotiation::ProtocolUri::parse_message_type(&message.message_type)
        .zip(crate::negotiation::ProtocolUri::parse_message_type(expected))
        .is_some_and(|((uri, name), (expected_uri, expected_name))| {
            uri.is_compatible(&expected_uri) && name == expected_name
        });

    if matches {
        Ok(())
    } else {
        Err(crate::Error::InvalidMessage(format!(
            "expected message of type {expected}, got {}",
            message.message_type
        )))
    }
}

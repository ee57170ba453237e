use std::fmt::{self, Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    key::Key,
    messages::AgentMessage,
    negotiation::ProtocolUri,
    record::OutOfBandRecord,
};

/// Key material and endpoints under which this agent can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub recipient_key: Key,
    pub routing_keys: Vec<Key>,
    pub endpoints: Vec<String>,
    pub mediator_id: Option<String>,
}

/// A concrete DIDComm service, either declared inline or resolved from a DID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub id: String,
    pub service_endpoint: String,
    pub recipient_keys: Vec<Key>,
    pub routing_keys: Vec<Key>,
}

/// State of a connection, as driven by the handshake protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Start,
    InvitationSent,
    InvitationReceived,
    RequestSent,
    RequestReceived,
    ResponseSent,
    ResponseReceived,
    Abandoned,
    Completed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A connection (relationship) with another agent.
///
/// Owned by the [ConnectionManager]; this crate only looks connections up and
/// observes them becoming ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub state: ConnectionState,
    pub their_label: Option<String>,
    pub out_of_band_id: Option<String>,
    pub invitation_did: Option<String>,
}

impl ConnectionRecord {
    /// Whether messages can be exchanged over this connection
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::ResponseSent | ConnectionState::Completed
        )
    }
}

/// Parameters for starting a handshake on a received invitation
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub label: Option<String>,
    pub alias: Option<String>,
    pub image_url: Option<String>,
    pub auto_accept_connection: bool,
    pub protocol: ProtocolUri,
    pub routing: Option<Routing>,
}

/// Where an attached request is handed to the local message handlers
#[derive(Debug, Clone)]
pub enum DispatchTarget {
    /// Process the request as received over this connection
    Connection(ConnectionRecord),
    /// Process the request without a connection, replies go to `services`
    Services {
        services: Vec<ResolvedService>,
        routing: Option<Routing>,
    },
}

/// A message received by the agent, together with its context
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: AgentMessage,
    pub connection: Option<ConnectionRecord>,
}

// ANCHOR: collaborators-mbBook
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Allocate a recipient key, routing keys and endpoints
    async fn get_routing(&self, use_default_mediator: bool) -> Result<Routing, Error>;

    /// Release keys registered at a mediator
    async fn remove_routing_keys(&self, mediator_id: &str, keys: &[Key]) -> Result<(), Error>;
}

#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Resolve the DIDComm services of a DID
    async fn resolve_services(&self, did: &str) -> Result<Vec<ResolvedService>, Error>;
}

#[async_trait]
pub trait ConnectionManager: Send + Sync {
    async fn find_by_id(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, Error>;

    async fn find_by_invitation_did(&self, did: &str) -> Result<Vec<ConnectionRecord>, Error>;

    async fn find_all_by_out_of_band_id(
        &self,
        out_of_band_id: &str,
    ) -> Result<Vec<ConnectionRecord>, Error>;

    /// Start the handshake protocol `config.protocol` for `record`
    async fn accept_out_of_band_invitation(
        &self,
        record: &OutOfBandRecord,
        config: HandshakeConfig,
    ) -> Result<ConnectionRecord, Error>;
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a message to the other party of `connection`
    async fn send_to_connection(
        &self,
        connection: &ConnectionRecord,
        message: AgentMessage,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Hand a request attached to an invitation to the local message handlers
    async fn dispatch(&self, message: AgentMessage, target: DispatchTarget) -> Result<(), Error>;
}

pub trait FeatureRegistry: Send + Sync {
    fn supported_protocols(&self) -> Vec<ProtocolUri>;

    fn supports_message_type(&self, message_type: &str) -> bool {
        ProtocolUri::parse_message_type(message_type).is_some_and(|(uri, _)| {
            self.supported_protocols()
                .iter()
                .any(|protocol| protocol.is_compatible(&uri))
        })
    }
}

#[async_trait]
pub trait V2InvitationHandler: Send + Sync {
    /// Accept a version 2 invitation, creating a connection if the attached
    /// requests call for one
    async fn accept_invitation(
        &self,
        record: &OutOfBandRecord,
        routing: Option<Routing>,
    ) -> Result<Option<ConnectionRecord>, Error>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn supported_message_types(&self) -> &'static [&'static str];

    /// Process an inbound message, optionally returning a reply for the
    /// connection it arrived on
    async fn handle(&self, inbound: InboundMessage) -> Result<Option<AgentMessage>, Error>;
}

pub trait HandlerRegistry {
    fn register_handler(&mut self, handler: std::sync::Arc<dyn MessageHandler>);
}
// ANCHOR_END: collaborators-mbBook

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_connection_readiness() {
        let mut connection = ConnectionRecord {
            id: "c1".into(),
            state: ConnectionState::RequestSent,
            their_label: None,
            out_of_band_id: None,
            invitation_did: None,
        };
        assert!(!connection.is_ready());

        connection.state = ConnectionState::ResponseSent;
        assert!(connection.is_ready());

        connection.state = ConnectionState::Completed;
        assert!(connection.is_ready());
    }
}

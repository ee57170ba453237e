use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{AcceptedInvitation, OutOfBandApi};
use crate::{
    definitions::{ConnectionRecord, DispatchTarget, HandshakeConfig, Routing},
    error::Error,
    events::{AgentEvent, EventEmitter, WaitOutcome},
    invitation::{Invitation, OutOfBandInvitation},
    messages::AgentMessage,
    negotiation::{select_handshake_protocol, select_supported_message, supported_handshake_protocols},
    record::{OutOfBandEvent, OutOfBandRecord, OutOfBandRole, OutOfBandState, StoredRouting},
    repository::update_state,
    reuse::handshake_reuse,
};

#[derive(Debug, Clone)]
pub struct AcceptInvitationConfig {
    /// Our label in the handshake, defaults to the agent label
    pub label: Option<String>,
    /// Defaults to the alias of the record
    pub alias: Option<String>,
    pub image_url: Option<String>,
    pub auto_accept_connection: bool,
    pub reuse_connection: bool,
    /// Defaults to the routing stored when the invitation was received
    pub routing: Option<Routing>,
    /// How long an attached request waits for the connection to become
    /// ready, defaults to the configured timeout
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl Default for AcceptInvitationConfig {
    fn default() -> Self {
        Self {
            label: None,
            alias: None,
            image_url: None,
            auto_accept_connection: true,
            reuse_connection: false,
            routing: None,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl OutOfBandApi {
    /// Accept a received invitation: reuse or create a connection and deliver
    /// the attached request, as the invitation asks
    pub async fn accept_invitation(
        &self,
        record_id: &str,
        config: AcceptInvitationConfig,
    ) -> Result<AcceptedInvitation, Error> {
        let mut record = self.deps.repository.get_by_id(record_id).await?;

        if record.role != OutOfBandRole::Receiver {
            return Err(Error::InvalidConfiguration(format!(
                "record {} has role {}, only received invitations can be accepted",
                record.id, record.role
            )));
        }

        if record.state != OutOfBandState::Initial {
            return Err(Error::InvalidConfiguration(format!(
                "record {} is in state {}, the invitation was already accepted",
                record.id, record.state
            )));
        }

        if matches!(record.invitation, Invitation::V2(_)) && self.deps.v2_handler.is_none() {
            return Err(Error::InvalidConfiguration(
                "no handler for version 2 invitations configured".into(),
            ));
        }

        let routing = match config.routing.clone() {
            Some(routing) => Some(routing),
            None => record
                .metadata
                .recipient_routing()
                .map(StoredRouting::to_routing)
                .transpose()?,
        };

        update_state(
            self.deps.repository.as_ref(),
            &self.events,
            &mut record,
            OutOfBandEvent::BeginAccept,
        )
        .await?;

        match record.invitation.clone() {
            Invitation::V2(_) => self.accept_v2(record, routing).await,
            Invitation::V1(invitation) => self.accept_v1(record, &invitation, routing, config).await,
        }
    }

    async fn accept_v2(
        &self,
        record: OutOfBandRecord,
        routing: Option<Routing>,
    ) -> Result<AcceptedInvitation, Error> {
        let Some(handler) = &self.deps.v2_handler else {
            return Err(Error::InvalidConfiguration(
                "no handler for version 2 invitations configured".into(),
            ));
        };

        let connection = handler.accept_invitation(&record, routing).await?;
        let record = self.deps.repository.get_by_id(&record.id).await?;

        Ok(AcceptedInvitation { record, connection })
    }

    async fn accept_v1(
        &self,
        mut record: OutOfBandRecord,
        invitation: &OutOfBandInvitation,
        routing: Option<Routing>,
        config: AcceptInvitationConfig,
    ) -> Result<AcceptedInvitation, Error> {
        let handshake_protocols = invitation.handshake_protocols();
        let messages = invitation.requests()?;
        let existing = self.find_existing_connection(invitation).await?;

        if handshake_protocols.is_empty() {
            let message = select_supported_message(&messages, self.deps.features.as_ref())?.clone();

            let target = match existing {
                Some(connection) => {
                    tracing::debug!("delivering {} over connection {}", message.message_type, connection.id);
                    DispatchTarget::Connection(connection)
                }
                None => {
                    let services = self.resolve_services(invitation).await?;
                    if services.is_empty() {
                        return Err(Error::NoServices);
                    }

                    tracing::debug!("delivering {} without a connection", message.message_type);
                    DispatchTarget::Services { services, routing }
                }
            };

            self.deps.dispatcher.dispatch(message, target).await?;

            return Ok(AcceptedInvitation {
                record,
                connection: None,
            });
        }

        let mut connection = None;

        if let Some(existing) = existing.filter(|_| config.reuse_connection) {
            if messages.is_empty() {
                let reused = handshake_reuse(
                    self.deps.sender.as_ref(),
                    &self.events,
                    &record,
                    &existing,
                    &config.cancel,
                )
                .await?;

                if reused {
                    // completed by the reuse accepted handler
                    record = self.deps.repository.get_by_id(&record.id).await?;

                    tracing::info!("reusing connection {} for record {}", existing.id, record.id);
                    connection = Some(existing);
                }
            } else {
                connection = Some(existing);
            }
        }

        let connection = match connection {
            Some(connection) => connection,
            None => {
                let supported = supported_handshake_protocols(self.deps.features.as_ref());
                let protocol = select_handshake_protocol(handshake_protocols, &supported)?;

                tracing::debug!("starting {protocol} handshake for record {}", record.id);

                let handshake = HandshakeConfig {
                    label: config.label.or_else(|| Some(self.config.label.clone())),
                    alias: config.alias.or_else(|| record.alias.clone()),
                    image_url: config.image_url.or_else(|| self.config.image_url.clone()),
                    auto_accept_connection: config.auto_accept_connection,
                    protocol,
                    routing,
                };

                self.deps
                    .connections
                    .accept_out_of_band_invitation(&record, handshake)
                    .await?
            }
        };

        if !messages.is_empty() {
            let message = select_supported_message(&messages, self.deps.features.as_ref())?.clone();
            let timeout = config
                .timeout
                .unwrap_or_else(|| self.config.accept_invitation_timeout());

            self.deliver_when_ready(message, connection.clone(), timeout, config.cancel)
                .await?;
        }

        Ok(AcceptedInvitation {
            record,
            connection: Some(connection),
        })
    }

    /// The first connection created from one of the invitation identifiers
    async fn find_existing_connection(
        &self,
        invitation: &OutOfBandInvitation,
    ) -> Result<Option<ConnectionRecord>, Error> {
        let mut found: Vec<ConnectionRecord> = Vec::new();

        for did in invitation.invitation_dids()? {
            for connection in self.deps.connections.find_by_invitation_did(&did).await? {
                if !found.iter().any(|c| c.id == connection.id) {
                    found.push(connection);
                }
            }
        }

        if found.len() > 1 {
            tracing::warn!(
                "found {} connections for invitation {}, using {}",
                found.len(),
                invitation.id,
                found[0].id
            );
        }

        Ok(found.into_iter().next())
    }

    /// Dispatch `message` once `connection` is ready.
    ///
    /// The subscription is taken before looking at the current state, so a
    /// transition cannot slip through between the two. When the connection is
    /// not ready yet, a background task waits for at most `timeout`.
    async fn deliver_when_ready(
        &self,
        message: AgentMessage,
        connection: ConnectionRecord,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let mut subscription = self.events.subscribe();

        let current = self
            .deps
            .connections
            .find_by_id(&connection.id)
            .await?
            .unwrap_or(connection);

        if current.is_ready() {
            return self
                .deps
                .dispatcher
                .dispatch(message, DispatchTarget::Connection(current))
                .await;
        }

        let dispatcher = self.deps.dispatcher.clone();
        let connection_id = current.id;

        tracing::debug!(
            "connection {connection_id} is not ready, delivering {} once it is",
            message.message_type
        );

        tokio::spawn(async move {
            let outcome = EventEmitter::wait_for(&mut subscription, timeout, &cancel, |event| {
                match event {
                    AgentEvent::ConnectionStateChanged { connection, .. }
                        if connection.id == connection_id && connection.is_ready() =>
                    {
                        Some(connection.clone())
                    }
                    _ => None,
                }
            })
            .await;

            match outcome {
                WaitOutcome::Matched(connection) => {
                    if let Err(e) = dispatcher
                        .dispatch(message, DispatchTarget::Connection(connection))
                        .await
                    {
                        tracing::error!("could not deliver request to connection {connection_id}: {e}");
                    }
                }
                outcome => {
                    tracing::info!(
                        "connection {connection_id} did not become ready ({outcome:?}), dropping {}",
                        message.message_type
                    );
                }
            }
        });

        Ok(())
    }
}

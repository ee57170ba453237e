use std::sync::Arc;

use crate::{
    config::OutOfBandConfig,
    definitions::{
        ConnectionManager, ConnectionRecord, DidResolver, FeatureRegistry, HandlerRegistry,
        MessageDispatcher, MessageSender, ResolvedService, RoutingProvider, V2InvitationHandler,
    },
    error::Error,
    events::{AgentEvent, EventBus, EventEmitter},
    invitation::{OutOfBandInvitation, OutOfBandService},
    key::Key,
    record::{OutOfBandEvent, OutOfBandQuery, OutOfBandRecord, OutOfBandRole},
    repository::{self, OutOfBandRepository},
    reuse::{HandshakeReuseAcceptedHandler, HandshakeReuseHandler},
};

mod accept;
mod create;
mod receive;

pub use accept::AcceptInvitationConfig;
pub use create::{CreateInvitationConfig, InvitationVersion};
pub use receive::{ReceiveImplicitInvitationConfig, ReceiveInvitationConfig};

/// The services the out-of-band module relies on
#[derive(Clone)]
pub struct OutOfBandDependencies {
    pub repository: Arc<dyn OutOfBandRepository>,
    pub routing: Arc<dyn RoutingProvider>,
    pub resolver: Arc<dyn DidResolver>,
    pub connections: Arc<dyn ConnectionManager>,
    pub sender: Arc<dyn MessageSender>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub features: Arc<dyn FeatureRegistry>,
    /// Required to accept version 2 invitations
    pub v2_handler: Option<Arc<dyn V2InvitationHandler>>,
}

/// A record together with the connection the exchange resulted in, if any
#[derive(Debug, Clone)]
pub struct AcceptedInvitation {
    pub record: OutOfBandRecord,
    pub connection: Option<ConnectionRecord>,
}

/// Creates, receives and accepts out-of-band invitations
pub struct OutOfBandApi {
    config: OutOfBandConfig,
    deps: OutOfBandDependencies,
    events: EventEmitter,
}

impl OutOfBandApi {
    pub fn new(config: OutOfBandConfig, deps: OutOfBandDependencies, bus: &EventBus) -> Self {
        let events = bus.scoped(config.correlation_id.clone());

        Self {
            config,
            deps,
            events,
        }
    }

    pub fn config(&self) -> &OutOfBandConfig {
        &self.config
    }

    /// Events of this agent context; handshake collaborators report
    /// connection state changes here
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Register the handshake reuse handlers
    pub fn register_handlers(&self, registry: &mut dyn HandlerRegistry) {
        registry.register_handler(Arc::new(HandshakeReuseHandler::new(
            self.deps.repository.clone(),
            self.events.clone(),
        )));
        registry.register_handler(Arc::new(HandshakeReuseAcceptedHandler::new(
            self.deps.repository.clone(),
            self.events.clone(),
        )));
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<OutOfBandRecord>, Error> {
        self.deps.repository.find_by_id(id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<OutOfBandRecord, Error> {
        self.deps.repository.get_by_id(id).await
    }

    pub async fn get_all(&self) -> Result<Vec<OutOfBandRecord>, Error> {
        self.deps.repository.get_all().await
    }

    pub async fn find_all_by_query(
        &self,
        query: &OutOfBandQuery,
    ) -> Result<Vec<OutOfBandRecord>, Error> {
        self.deps.repository.find_all_by_query(query).await
    }

    /// The record of an invitation we created
    pub async fn find_by_created_invitation_id(
        &self,
        invitation_id: &str,
    ) -> Result<Option<OutOfBandRecord>, Error> {
        let query = OutOfBandQuery::default()
            .role(OutOfBandRole::Sender)
            .invitation_id(invitation_id);

        self.deps.repository.find_single_by_query(&query).await
    }

    /// The record of an invitation we received
    pub async fn find_by_received_invitation_id(
        &self,
        invitation_id: &str,
    ) -> Result<Option<OutOfBandRecord>, Error> {
        let query = OutOfBandQuery::default()
            .role(OutOfBandRole::Receiver)
            .invitation_id(invitation_id);

        self.deps.repository.find_single_by_query(&query).await
    }

    pub async fn find_by_recipient_key(&self, key: &Key) -> Result<Option<OutOfBandRecord>, Error> {
        let query = OutOfBandQuery::default().recipient_key(key);

        self.deps.repository.find_single_by_query(&query).await
    }

    /// Apply a state machine event to a record, used by the handshake
    /// protocols to complete an exchange
    pub async fn update_state(
        &self,
        id: &str,
        event: OutOfBandEvent,
    ) -> Result<OutOfBandRecord, Error> {
        let mut record = self.deps.repository.get_by_id(id).await?;
        repository::update_state(self.deps.repository.as_ref(), &self.events, &mut record, event)
            .await?;

        Ok(record)
    }

    /// Delete a record, releasing its keys at the mediator when no connection
    /// depends on them anymore
    pub async fn delete_by_id(&self, id: &str) -> Result<(), Error> {
        let record = self.deps.repository.get_by_id(id).await?;

        if let Some(mediator_id) = &record.mediator_id {
            let release = record.reusable
                || self
                    .deps
                    .connections
                    .find_all_by_out_of_band_id(&record.id)
                    .await?
                    .is_empty();

            if release {
                // a receiver's fingerprints belong to the inviter, its own key is in the routing
                let fingerprints = match record.role {
                    OutOfBandRole::Sender => record.recipient_key_fingerprints.clone(),
                    OutOfBandRole::Receiver => record
                        .metadata
                        .recipient_routing()
                        .map(|routing| vec![routing.recipient_key_fingerprint.clone()])
                        .unwrap_or_default(),
                };
                let keys = fingerprints
                    .iter()
                    .map(|fingerprint| Key::from_fingerprint(fingerprint))
                    .collect::<Result<Vec<_>, _>>()?;

                tracing::debug!(
                    "removing {} routing keys of record {} from mediator {mediator_id}",
                    keys.len(),
                    record.id
                );

                self.deps
                    .routing
                    .remove_routing_keys(mediator_id, &keys)
                    .await?;
            }
        }

        self.deps.repository.delete(&record.id).await?;
        tracing::info!("deleted out-of-band record {}", record.id);

        Ok(())
    }

    /// Persist a new record and announce it
    async fn save_new(&self, record: &OutOfBandRecord) -> Result<(), Error> {
        self.deps.repository.save(record).await?;

        tracing::info!(
            "new out-of-band record {} ({}) for invitation {}",
            record.id,
            record.role,
            record.invitation.id()
        );

        self.events.emit(AgentEvent::OutOfBandStateChanged {
            record: record.clone(),
            previous_state: None,
        });

        Ok(())
    }

    /// Concrete services of an invitation, DID services are resolved
    async fn resolve_services(
        &self,
        invitation: &OutOfBandInvitation,
    ) -> Result<Vec<ResolvedService>, Error> {
        let mut services = Vec::new();

        for service in &invitation.services {
            match service {
                OutOfBandService::Inline(inline) => services.push(inline.to_resolved()?),
                OutOfBandService::Did(did) => {
                    tracing::trace!("resolving services of {did}");
                    services.extend(self.deps.resolver.resolve_services(did).await?);
                }
            }
        }

        Ok(services)
    }
}

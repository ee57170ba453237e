use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{AcceptInvitationConfig, AcceptedInvitation, OutOfBandApi};
use crate::{
    definitions::Routing,
    error::Error,
    invitation::{
        AnyInvitation, Invitation, OutOfBandInvitation, OutOfBandInvitationV2, OutOfBandService,
        legacy::connectionless_to_out_of_band,
    },
    key::Key,
    negotiation::HandshakeProtocol,
    record::{
        LegacyInvitationKind, MetadataValue, OutOfBandQuery, OutOfBandRecord, OutOfBandRole,
        StoredRouting,
    },
};

#[derive(Debug, Clone)]
pub struct ReceiveInvitationConfig {
    /// Our label in the handshake, defaults to the agent label
    pub label: Option<String>,
    pub alias: Option<String>,
    pub image_url: Option<String>,
    pub auto_accept_invitation: bool,
    pub auto_accept_connection: bool,
    /// Reuse an existing connection with the inviter instead of creating one
    pub reuse_connection: bool,
    pub routing: Option<Routing>,
    /// Defaults to the configured timeout
    pub accept_invitation_timeout: Option<Duration>,
    /// Stops waiting for a connection to become ready
    pub cancel: CancellationToken,
}

impl Default for ReceiveInvitationConfig {
    fn default() -> Self {
        Self {
            label: None,
            alias: None,
            image_url: None,
            auto_accept_invitation: true,
            auto_accept_connection: true,
            reuse_connection: false,
            routing: None,
            accept_invitation_timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl From<ReceiveInvitationConfig> for AcceptInvitationConfig {
    fn from(config: ReceiveInvitationConfig) -> Self {
        Self {
            label: config.label,
            alias: config.alias,
            image_url: config.image_url,
            auto_accept_connection: config.auto_accept_connection,
            reuse_connection: config.reuse_connection,
            routing: config.routing,
            timeout: config.accept_invitation_timeout,
            cancel: config.cancel,
        }
    }
}

/// An invitation implied by a public DID
#[derive(Debug, Clone)]
pub struct ReceiveImplicitInvitationConfig {
    pub did: String,
    /// Defaults to DID exchange
    pub handshake_protocols: Option<Vec<String>>,
    pub receive: ReceiveInvitationConfig,
}

impl ReceiveImplicitInvitationConfig {
    pub fn new(did: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            handshake_protocols: None,
            receive: ReceiveInvitationConfig::default(),
        }
    }
}

impl OutOfBandApi {
    /// Store a received invitation and, unless disabled, accept it
    pub async fn receive_invitation(
        &self,
        invitation: impl Into<AnyInvitation>,
        config: ReceiveInvitationConfig,
    ) -> Result<AcceptedInvitation, Error> {
        self.receive(invitation.into(), config, false).await
    }

    /// Receive an invitation URL, following short links when the `resolve`
    /// feature is enabled
    pub async fn receive_invitation_from_url(
        &self,
        invitation_url: &str,
        config: ReceiveInvitationConfig,
    ) -> Result<AcceptedInvitation, Error> {
        #[cfg(feature = "resolve")]
        let invitation = crate::invitation::url::fetch_invitation(invitation_url).await?;

        #[cfg(not(feature = "resolve"))]
        let invitation = crate::invitation::url::parse_invitation_url(invitation_url)?;

        self.receive(invitation, config, false).await
    }

    /// Start an exchange with the holder of a public DID, without an
    /// invitation document. Such invitations are never considered duplicates.
    pub async fn receive_implicit_invitation(
        &self,
        config: ReceiveImplicitInvitationConfig,
    ) -> Result<AcceptedInvitation, Error> {
        let mut invitation = OutOfBandInvitation::new("");
        invitation.id = config.did.clone();
        invitation.services = vec![OutOfBandService::Did(config.did)];
        invitation.handshake_protocols = Some(
            config
                .handshake_protocols
                .unwrap_or_else(|| vec![HandshakeProtocol::DidExchange.uri().to_string()]),
        );

        self.receive(AnyInvitation::OutOfBand(invitation), config.receive, true)
            .await
    }

    async fn receive(
        &self,
        invitation: AnyInvitation,
        config: ReceiveInvitationConfig,
        is_implicit: bool,
    ) -> Result<AcceptedInvitation, Error> {
        let (invitation, legacy) = match invitation {
            AnyInvitation::OutOfBand(invitation) => (Invitation::V1(invitation), None),
            AnyInvitation::OutOfBandV2(invitation) => (Invitation::V2(invitation), None),
            AnyInvitation::Connection(legacy) => (
                Invitation::V1(legacy.to_out_of_band()?),
                Some(LegacyInvitationKind::ConnectionInvitation),
            ),
            AnyInvitation::Connectionless(message) => (
                Invitation::V1(connectionless_to_out_of_band(&message)?),
                Some(LegacyInvitationKind::ConnectionlessMessage),
            ),
        };

        if !is_implicit {
            let query = OutOfBandQuery::default()
                .role(OutOfBandRole::Receiver)
                .invitation_id(invitation.id());

            if !self.deps.repository.find_all_by_query(&query).await?.is_empty() {
                return Err(Error::DuplicateInvitation(invitation.id().to_string()));
            }
        }

        let fingerprints = match &invitation {
            Invitation::V1(invitation) => {
                invitation.validate()?;
                self.v1_fingerprints(invitation).await?
            }
            Invitation::V2(invitation) => {
                invitation.validate()?;
                self.v2_fingerprints(invitation).await?
            }
        };

        let mut record = OutOfBandRecord::new(OutOfBandRole::Receiver, invitation, fingerprints)?;
        record.alias = config.alias.clone();
        record.auto_accept_connection = config.auto_accept_connection;

        if let Some(kind) = legacy {
            record.metadata.set(MetadataValue::LegacyInvitation(kind));
        }

        // kept for a later acceptance and for releasing the key on delete
        if let Some(routing) = &config.routing {
            record.mediator_id = routing.mediator_id.clone();
            record
                .metadata
                .set(MetadataValue::RecipientRouting(StoredRouting::from(routing)));
        }

        self.save_new(&record).await?;

        if !config.auto_accept_invitation {
            return Ok(AcceptedInvitation {
                record,
                connection: None,
            });
        }

        self.accept_invitation(&record.id, config.into()).await
    }

    async fn v1_fingerprints(&self, invitation: &OutOfBandInvitation) -> Result<Vec<String>, Error> {
        let fingerprints = self
            .resolve_services(invitation)
            .await?
            .iter()
            .flat_map(|service| service.recipient_keys.iter().map(Key::fingerprint))
            .collect();

        Ok(fingerprints)
    }

    async fn v2_fingerprints(
        &self,
        invitation: &OutOfBandInvitationV2,
    ) -> Result<Vec<String>, Error> {
        if invitation.from.starts_with("did:key:") {
            return Ok(vec![Key::from_did_key(&invitation.from)?.fingerprint()]);
        }

        let fingerprints = self
            .deps
            .resolver
            .resolve_services(&invitation.from)
            .await?
            .iter()
            .flat_map(|service| service.recipient_keys.iter().map(Key::fingerprint))
            .collect();

        Ok(fingerprints)
    }
}

use super::OutOfBandApi;
use crate::{
    definitions::Routing,
    error::Error,
    invitation::{
        Attachment, ConnectionInvitation, InlineService, Invitation, OutOfBandInvitation,
        OutOfBandInvitationV2, OutOfBandService,
    },
    messages::AgentMessage,
    negotiation::{HandshakeProtocol, resolve_handshake_protocols, supported_handshake_protocols},
    record::{OutOfBandRecord, OutOfBandRole},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvitationVersion {
    #[default]
    V1,
    V2,
}

#[derive(Debug, Clone)]
pub struct CreateInvitationConfig {
    /// Defaults to the agent label
    pub label: Option<String>,
    pub alias: Option<String>,
    /// Defaults to the agent image
    pub image_url: Option<String>,
    pub goal: Option<String>,
    pub goal_code: Option<String>,
    /// Whether the invitation offers handshake protocols
    pub handshake: bool,
    /// Handshake protocols in order of preference, all supported protocols
    /// when not set
    pub handshake_protocols: Option<Vec<String>>,
    /// Requests to attach
    pub messages: Vec<AgentMessage>,
    pub multi_use_invitation: bool,
    pub auto_accept_connection: bool,
    /// Defaults to routing from the routing provider
    pub routing: Option<Routing>,
    pub appended_attachments: Vec<Attachment>,
    pub accept: Vec<String>,
    pub version: InvitationVersion,
}

impl Default for CreateInvitationConfig {
    fn default() -> Self {
        Self {
            label: None,
            alias: None,
            image_url: None,
            goal: None,
            goal_code: None,
            handshake: true,
            handshake_protocols: None,
            messages: Vec::new(),
            multi_use_invitation: false,
            auto_accept_connection: true,
            routing: None,
            appended_attachments: Vec::new(),
            accept: Vec::new(),
            version: InvitationVersion::V1,
        }
    }
}

impl CreateInvitationConfig {
    fn validate(&self) -> Result<(), Error> {
        let has_messages = !self.messages.is_empty();

        if !self.handshake && !has_messages {
            return Err(Error::InvalidConfiguration(
                "one or both of handshake_protocols and requests~attach must be included in the message"
                    .into(),
            ));
        }

        if !self.handshake && self.handshake_protocols.is_some() {
            return Err(Error::InvalidConfiguration(
                "handshake can not be disabled when handshake_protocols is defined".into(),
            ));
        }

        if has_messages && self.multi_use_invitation {
            return Err(Error::InvalidConfiguration(
                "a multi-use invitation can not carry messages".into(),
            ));
        }

        if self.version == InvitationVersion::V2 {
            if self.handshake_protocols.is_some() {
                return Err(Error::InvalidConfiguration(
                    "version 2 invitations do not support handshake protocols".into(),
                ));
            }

            if !has_messages {
                return Err(Error::InvalidConfiguration(
                    "a version 2 invitation needs at least one message".into(),
                ));
            }
        }

        Ok(())
    }
}

impl OutOfBandApi {
    /// Create and store a new invitation
    pub async fn create_invitation(
        &self,
        config: CreateInvitationConfig,
    ) -> Result<OutOfBandRecord, Error> {
        let record = self.build_invitation_record(config).await?;
        self.save_new(&record).await?;

        Ok(record)
    }

    /// Create an invitation of the connection protocol, for agents that do
    /// not understand out-of-band invitations
    pub async fn create_legacy_invitation(
        &self,
        config: CreateInvitationConfig,
    ) -> Result<(OutOfBandRecord, ConnectionInvitation), Error> {
        if !config.messages.is_empty() || config.version != InvitationVersion::V1 {
            return Err(Error::InvalidConfiguration(
                "legacy invitations can not carry messages".into(),
            ));
        }

        let config = CreateInvitationConfig {
            handshake: true,
            handshake_protocols: Some(vec![HandshakeProtocol::Connections.uri().to_string()]),
            ..config
        };

        let record = self.build_invitation_record(config).await?;

        let Invitation::V1(invitation) = &record.invitation else {
            return Err(Error::Internal);
        };
        let legacy = ConnectionInvitation::from_out_of_band(invitation)?;

        self.save_new(&record).await?;

        Ok((record, legacy))
    }

    async fn build_invitation_record(
        &self,
        config: CreateInvitationConfig,
    ) -> Result<OutOfBandRecord, Error> {
        config.validate()?;

        let routing = match config.routing.clone() {
            Some(routing) => routing,
            None => {
                self.deps
                    .routing
                    .get_routing(self.config.use_default_mediator)
                    .await?
            }
        };

        let (invitation, fingerprints) = match config.version {
            InvitationVersion::V1 => {
                let invitation = self.build_v1(&config, &routing)?;
                let fingerprints = invitation.fingerprints()?;

                (Invitation::V1(invitation), fingerprints)
            }
            InvitationVersion::V2 => {
                let invitation = build_v2(&config, &routing)?;

                (
                    Invitation::V2(invitation),
                    vec![routing.recipient_key.fingerprint()],
                )
            }
        };

        let mut record = OutOfBandRecord::new(OutOfBandRole::Sender, invitation, fingerprints)?;
        record.alias = config.alias;
        record.mediator_id = routing.mediator_id;
        record.reusable = config.multi_use_invitation;
        record.auto_accept_connection = config.auto_accept_connection;

        Ok(record)
    }

    fn build_v1(
        &self,
        config: &CreateInvitationConfig,
        routing: &Routing,
    ) -> Result<OutOfBandInvitation, Error> {
        if routing.endpoints.is_empty() {
            return Err(Error::InvalidConfiguration(
                "routing does not provide any endpoint".into(),
            ));
        }

        let label = config.label.clone().unwrap_or_else(|| self.config.label.clone());
        let mut invitation = OutOfBandInvitation::new(label);
        invitation.image_url = config
            .image_url
            .clone()
            .or_else(|| self.config.image_url.clone());
        invitation.goal = config.goal.clone();
        invitation.goal_code = config.goal_code.clone();
        invitation.accept = config.accept.clone();

        invitation.services = routing
            .endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| {
                OutOfBandService::Inline(InlineService::new(
                    format!("#inline-{index}"),
                    std::slice::from_ref(&routing.recipient_key),
                    &routing.routing_keys,
                    endpoint.clone(),
                ))
            })
            .collect();

        if config.handshake {
            let supported = supported_handshake_protocols(self.deps.features.as_ref());
            invitation.handshake_protocols = Some(resolve_handshake_protocols(
                config.handshake_protocols.as_deref(),
                &supported,
            )?);
        }

        for message in &config.messages {
            invitation.add_request(message.clone())?;
        }

        if !config.appended_attachments.is_empty() {
            invitation.appended_attachments = Some(config.appended_attachments.clone());
        }

        invitation.validate()?;

        Ok(invitation)
    }
}

fn build_v2(
    config: &CreateInvitationConfig,
    routing: &Routing,
) -> Result<OutOfBandInvitationV2, Error> {
    let mut invitation = OutOfBandInvitationV2::new(routing.recipient_key.did_key());
    invitation.body.goal = config.goal.clone();
    invitation.body.goal_code = config.goal_code.clone();
    invitation.body.accept = config.accept.clone();

    for message in &config.messages {
        invitation.add_request(serde_json::to_value(message)?);
    }

    invitation.validate()?;

    Ok(invitation)
}

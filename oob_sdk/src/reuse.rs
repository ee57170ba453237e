//! Handshake reuse: an invitee that already has a connection with the inviter
//! asks to reuse it instead of running a new handshake.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    definitions::{ConnectionRecord, InboundMessage, MessageHandler, MessageSender},
    error::Error,
    events::{AgentEvent, EventEmitter, WaitOutcome},
    messages::{
        AgentMessage, HANDSHAKE_REUSE_ACCEPTED_TYPE, HANDSHAKE_REUSE_TYPE,
        HandshakeReuseAcceptedMessage, HandshakeReuseMessage,
    },
    record::{OutOfBandEvent, OutOfBandQuery, OutOfBandRecord, OutOfBandRole, OutOfBandState},
    repository::{OutOfBandRepository, update_state},
};

/// How long the invitee waits for the inviter to accept a reuse
pub const HANDSHAKE_REUSE_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Ask the inviter to reuse `connection` for the invitation of `record`.
///
/// Returns whether the inviter accepted within [HANDSHAKE_REUSE_TIMEOUT].
pub(crate) async fn handshake_reuse(
    sender: &dyn MessageSender,
    events: &EventEmitter,
    record: &OutOfBandRecord,
    connection: &ConnectionRecord,
    cancel: &CancellationToken,
) -> Result<bool, Error> {
    let reuse = HandshakeReuseMessage::new(record.invitation.id());
    let reuse_thread_id = reuse.thread_id().to_string();

    // subscribe before sending, the answer may arrive before we start waiting
    let mut subscription = events.subscribe();

    tracing::debug!(
        "sending handshake reuse {reuse_thread_id} over connection {}",
        connection.id
    );
    sender.send_to_connection(connection, reuse.into()).await?;

    let outcome = EventEmitter::wait_for(
        &mut subscription,
        HANDSHAKE_REUSE_TIMEOUT,
        cancel,
        |event| match event {
            AgentEvent::HandshakeReuseAccepted {
                reuse_thread_id: thread_id,
                out_of_band_record_id,
                connection_id,
            } if *thread_id == reuse_thread_id
                && *out_of_band_record_id == record.id
                && *connection_id == connection.id =>
            {
                Some(())
            }
            _ => None,
        },
    )
    .await;

    match outcome {
        WaitOutcome::Matched(()) => Ok(true),
        outcome => {
            tracing::info!(
                "handshake reuse {reuse_thread_id} was not accepted ({outcome:?}), falling back"
            );
            Ok(false)
        }
    }
}

/// Handles `handshake-reuse` on the inviter side
pub struct HandshakeReuseHandler {
    repository: Arc<dyn OutOfBandRepository>,
    events: EventEmitter,
}

impl HandshakeReuseHandler {
    pub fn new(repository: Arc<dyn OutOfBandRepository>, events: EventEmitter) -> Self {
        Self { repository, events }
    }
}

#[async_trait]
impl MessageHandler for HandshakeReuseHandler {
    fn supported_message_types(&self) -> &'static [&'static str] {
        &[HANDSHAKE_REUSE_TYPE]
    }

    async fn handle(&self, inbound: InboundMessage) -> Result<Option<AgentMessage>, Error> {
        let reuse = HandshakeReuseMessage::try_from(&inbound.message)?;
        let invitation_id = &reuse.parent_thread_id;

        let query = OutOfBandQuery::default()
            .role(OutOfBandRole::Sender)
            .invitation_id(invitation_id.clone());

        let mut record = self
            .repository
            .find_single_by_query(&query)
            .await?
            .ok_or_else(|| Error::RecordNotFound(invitation_id.clone()))?;

        tracing::info!(
            "handshake reuse {} for invitation {invitation_id}",
            reuse.thread_id()
        );

        let event = OutOfBandEvent::ReuseReceived {
            reusable: record.reusable,
        };
        update_state(self.repository.as_ref(), &self.events, &mut record, event).await?;

        self.events.emit(AgentEvent::HandshakeReused {
            reuse_thread_id: reuse.thread_id().to_string(),
            record,
            connection_id: inbound.connection.map(|c| c.id),
        });

        let accepted = HandshakeReuseAcceptedMessage::new(reuse.thread_id(), invitation_id.clone());

        Ok(Some(accepted.into()))
    }
}

/// Handles `handshake-reuse-accepted` on the invitee side
pub struct HandshakeReuseAcceptedHandler {
    repository: Arc<dyn OutOfBandRepository>,
    events: EventEmitter,
}

impl HandshakeReuseAcceptedHandler {
    pub fn new(repository: Arc<dyn OutOfBandRepository>, events: EventEmitter) -> Self {
        Self { repository, events }
    }
}

#[async_trait]
impl MessageHandler for HandshakeReuseAcceptedHandler {
    fn supported_message_types(&self) -> &'static [&'static str] {
        &[HANDSHAKE_REUSE_ACCEPTED_TYPE]
    }

    async fn handle(&self, inbound: InboundMessage) -> Result<Option<AgentMessage>, Error> {
        let accepted = HandshakeReuseAcceptedMessage::try_from(&inbound.message)?;
        let invitation_id = &accepted.parent_thread_id;

        let query = OutOfBandQuery::default()
            .role(OutOfBandRole::Receiver)
            .invitation_id(invitation_id.clone());

        let mut record = self
            .repository
            .find_single_by_query(&query)
            .await?
            .ok_or_else(|| Error::RecordNotFound(invitation_id.clone()))?;

        if record.state != OutOfBandState::PrepareResponse {
            return Err(Error::InvalidRecordState(format!(
                "record {} is in state {}, expected {}",
                record.id,
                record.state,
                OutOfBandState::PrepareResponse
            )));
        }

        let Some(connection) = inbound.connection else {
            return Err(Error::InvalidMessage(
                "handshake reuse accepted without a connection".into(),
            ));
        };

        // persisted before announcing, the waiting acceptance re-reads the record
        record.reuse_connection_id = Some(connection.id.clone());
        update_state(
            self.repository.as_ref(),
            &self.events,
            &mut record,
            OutOfBandEvent::Complete,
        )
        .await?;

        self.events.emit(AgentEvent::HandshakeReuseAccepted {
            reuse_thread_id: accepted.thread_id.clone(),
            out_of_band_record_id: record.id.clone(),
            connection_id: connection.id,
        });

        Ok(None)
    }
}

//! Agent event bus.
//!
//! Events are published on a [broadcast](tokio::sync::broadcast) channel that
//! can be shared by several agent contexts; an [EventEmitter] is the view of
//! one context on that channel and only sees the events of its own
//! correlation id.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    definitions::{ConnectionRecord, ConnectionState},
    record::{OutOfBandRecord, OutOfBandState},
};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum AgentEvent {
    OutOfBandStateChanged {
        record: OutOfBandRecord,
        /// `None` for a new record
        previous_state: Option<OutOfBandState>,
    },
    ConnectionStateChanged {
        connection: ConnectionRecord,
        previous_state: Option<ConnectionState>,
    },
    /// An invitee reused an existing connection for one of our invitations
    HandshakeReused {
        reuse_thread_id: String,
        record: OutOfBandRecord,
        connection_id: Option<String>,
    },
    /// The inviter accepted our reuse of an existing connection
    HandshakeReuseAccepted {
        reuse_thread_id: String,
        out_of_band_record_id: String,
        connection_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct Event {
    pub correlation_id: String,
    pub payload: AgentEvent,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self { sender }
    }

    /// The emitter of one agent context
    pub fn scoped(&self, correlation_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            sender: self.sender.clone(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Outcome of a bounded wait for an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Matched(T),
    TimedOut,
    Cancelled,
    /// The bus was dropped
    Closed,
}

#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<Event>,
    correlation_id: String,
}

impl EventEmitter {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn emit(&self, payload: AgentEvent) {
        tracing::trace!("emitting {payload:?}");

        // no subscribers is not an error
        let _ = self.sender.send(Event {
            correlation_id: self.correlation_id.clone(),
            payload,
        });
    }

    /// Start receiving the events emitted from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Wait until `matcher` accepts an event, the timeout passes or `cancel`
    /// is triggered, whatever happens first
    pub async fn wait_for<T>(
        subscription: &mut Subscription,
        timeout: Duration,
        cancel: &CancellationToken,
        mut matcher: impl FnMut(&AgentEvent) -> Option<T>,
    ) -> WaitOutcome<T> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return WaitOutcome::TimedOut;
            }

            let next = tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                next = tokio::time::timeout(remaining, subscription.recv()) => next,
            };

            match next {
                Ok(Some(event)) => {
                    if let Some(matched) = matcher(&event) {
                        return WaitOutcome::Matched(matched);
                    }
                }
                Ok(None) => return WaitOutcome::Closed,
                Err(_) => return WaitOutcome::TimedOut,
            }
        }
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    correlation_id: String,
}

impl Subscription {
    /// The next event of this context, `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.correlation_id == self.correlation_id => {
                    return Some(event.payload);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("event subscription lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reuse_accepted(thread_id: &str) -> AgentEvent {
        AgentEvent::HandshakeReuseAccepted {
            reuse_thread_id: thread_id.to_string(),
            out_of_band_record_id: "oob-1".to_string(),
            connection_id: "conn-1".to_string(),
        }
    }

    fn matching(thread_id: &'static str) -> impl FnMut(&AgentEvent) -> Option<String> {
        move |event| match event {
            AgentEvent::HandshakeReuseAccepted {
                reuse_thread_id,
                connection_id,
                ..
            } if reuse_thread_id == thread_id => Some(connection_id.clone()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_scoped_delivery() {
        let bus = EventBus::default();
        let alice = bus.scoped("alice");
        let bob = bus.scoped("bob");

        let mut subscription = alice.subscribe();

        bob.emit(reuse_accepted("t1"));
        alice.emit(reuse_accepted("t2"));

        let Some(AgentEvent::HandshakeReuseAccepted {
            reuse_thread_id, ..
        }) = subscription.recv().await
        else {
            panic!("expected a reuse event");
        };
        assert_eq!(reuse_thread_id, "t2");
    }

    #[tokio::test]
    async fn test_wait_matched() {
        let emitter = EventBus::default().scoped("alice");
        let mut subscription = emitter.subscribe();

        emitter.emit(reuse_accepted("other"));
        emitter.emit(reuse_accepted("t1"));

        let outcome = EventEmitter::wait_for(
            &mut subscription,
            Duration::from_secs(1),
            &CancellationToken::new(),
            matching("t1"),
        )
        .await;

        assert_eq!(outcome, WaitOutcome::Matched("conn-1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let emitter = EventBus::default().scoped("alice");
        let mut subscription = emitter.subscribe();

        let outcome = EventEmitter::wait_for(
            &mut subscription,
            Duration::from_secs(15),
            &CancellationToken::new(),
            matching("t1"),
        )
        .await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let emitter = EventBus::default().scoped("alice");
        let mut subscription = emitter.subscribe();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome =
            EventEmitter::wait_for(&mut subscription, Duration::from_secs(15), &cancel, matching("t1"))
                .await;

        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_closed() {
        let bus = EventBus::default();
        let mut subscription = bus.scoped("alice").subscribe();
        drop(bus);

        let outcome = EventEmitter::wait_for(
            &mut subscription,
            Duration::from_secs(15),
            &CancellationToken::new(),
            matching("t1"),
        )
        .await;

        assert_eq!(outcome, WaitOutcome::Closed);
    }

    #[tokio::test]
    async fn test_lagged_subscription() {
        let bus = EventBus::new(2);
        let emitter = bus.scoped("alice");
        let mut subscription = emitter.subscribe();

        for i in 0..5 {
            emitter.emit(reuse_accepted(&format!("t{i}")));
        }

        let outcome = EventEmitter::wait_for(
            &mut subscription,
            Duration::from_secs(1),
            &CancellationToken::new(),
            matching("t4"),
        )
        .await;

        assert_eq!(outcome, WaitOutcome::Matched("conn-1".to_string()));
    }
}

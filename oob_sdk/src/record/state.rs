use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Which side of the out-of-band exchange a record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutOfBandRole {
    /// Created the invitation
    Sender,
    /// Received the invitation
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutOfBandState {
    /// Received, not accepted yet
    Initial,
    /// Invitation published, waiting for an invitee
    AwaitResponse,
    /// Accepted, the response (handshake, reuse or request) is underway
    PrepareResponse,
    Done,
}

impl Display for OutOfBandRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Display for OutOfBandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Events that trigger state transitions in the out-of-band lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutOfBandEvent {
    /// We created and published an invitation.
    Create,
    /// We received an invitation.
    Receive,
    /// We started accepting a received invitation.
    BeginAccept,
    /// The exchange finished (handshake done, reuse accepted or requests delivered).
    Complete,
    /// An invitee reused an existing connection for our invitation.
    ReuseReceived { reusable: bool },
}

/// Errors that can occur during state transitions.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StateError {
    #[error("Invalid state transition from {from:?} ({role}) with event {event:?}")]
    InvalidTransition {
        from: Option<OutOfBandState>,
        role: OutOfBandRole,
        event: OutOfBandEvent,
    },
}

/// The state machine governing out-of-band record lifecycle transitions.
pub struct OutOfBandStateMachine;

impl OutOfBandStateMachine {
    /// Transition the state based on the current state and the incoming event.
    ///
    /// `current` is `None` for a record that is being created.
    pub fn transition(
        current: Option<OutOfBandState>,
        role: OutOfBandRole,
        event: OutOfBandEvent,
    ) -> Result<OutOfBandState, StateError> {
        use OutOfBandState::*;

        match (current, role, event) {
            // --- New records ---
            (None, OutOfBandRole::Sender, OutOfBandEvent::Create) => Ok(AwaitResponse),
            (None, OutOfBandRole::Receiver, OutOfBandEvent::Receive) => Ok(Initial),

            // --- Receiver ---
            (Some(Initial), OutOfBandRole::Receiver, OutOfBandEvent::BeginAccept) => {
                Ok(PrepareResponse)
            }
            (Some(PrepareResponse), OutOfBandRole::Receiver, OutOfBandEvent::Complete) => Ok(Done),

            // --- Sender ---
            (Some(AwaitResponse), OutOfBandRole::Sender, OutOfBandEvent::Complete) => Ok(Done),
            // A reusable invitation keeps waiting for further invitees
            (
                Some(AwaitResponse),
                OutOfBandRole::Sender,
                OutOfBandEvent::ReuseReceived { reusable },
            ) => Ok(if reusable { AwaitResponse } else { Done }),

            // Idempotency: completing twice
            (Some(Done), _, OutOfBandEvent::Complete) => Ok(Done),

            // --- Invalid Transitions ---
            (from, role, event) => Err(StateError::InvalidTransition { from, role, event }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_flow_sender() {
        let mut state = OutOfBandStateMachine::transition(
            None,
            OutOfBandRole::Sender,
            OutOfBandEvent::Create,
        )
        .unwrap();
        assert_eq!(state, OutOfBandState::AwaitResponse);

        state = OutOfBandStateMachine::transition(
            Some(state),
            OutOfBandRole::Sender,
            OutOfBandEvent::Complete,
        )
        .unwrap();
        assert_eq!(state, OutOfBandState::Done);
    }

    #[test]
    fn test_normal_flow_receiver() {
        let mut state = OutOfBandStateMachine::transition(
            None,
            OutOfBandRole::Receiver,
            OutOfBandEvent::Receive,
        )
        .unwrap();
        assert_eq!(state, OutOfBandState::Initial);

        state = OutOfBandStateMachine::transition(
            Some(state),
            OutOfBandRole::Receiver,
            OutOfBandEvent::BeginAccept,
        )
        .unwrap();
        assert_eq!(state, OutOfBandState::PrepareResponse);

        state = OutOfBandStateMachine::transition(
            Some(state),
            OutOfBandRole::Receiver,
            OutOfBandEvent::Complete,
        )
        .unwrap();
        assert_eq!(state, OutOfBandState::Done);

        // Complete again
        state = OutOfBandStateMachine::transition(
            Some(state),
            OutOfBandRole::Receiver,
            OutOfBandEvent::Complete,
        )
        .unwrap();
        assert_eq!(state, OutOfBandState::Done);
    }

    #[test]
    fn test_reuse() {
        let reusable = OutOfBandStateMachine::transition(
            Some(OutOfBandState::AwaitResponse),
            OutOfBandRole::Sender,
            OutOfBandEvent::ReuseReceived { reusable: true },
        )
        .unwrap();
        assert_eq!(reusable, OutOfBandState::AwaitResponse);

        let single_use = OutOfBandStateMachine::transition(
            Some(OutOfBandState::AwaitResponse),
            OutOfBandRole::Sender,
            OutOfBandEvent::ReuseReceived { reusable: false },
        )
        .unwrap();
        assert_eq!(single_use, OutOfBandState::Done);
    }

    #[test]
    fn test_invalid_transitions() {
        let err = OutOfBandStateMachine::transition(
            None,
            OutOfBandRole::Sender,
            OutOfBandEvent::Receive,
        )
        .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { from: None, .. }));

        // accepting twice
        assert!(
            OutOfBandStateMachine::transition(
                Some(OutOfBandState::PrepareResponse),
                OutOfBandRole::Receiver,
                OutOfBandEvent::BeginAccept,
            )
            .is_err()
        );

        // a sender never accepts
        assert!(
            OutOfBandStateMachine::transition(
                Some(OutOfBandState::Initial),
                OutOfBandRole::Sender,
                OutOfBandEvent::BeginAccept,
            )
            .is_err()
        );

        // reuse after the single-use invitation was consumed
        assert_eq!(
            OutOfBandStateMachine::transition(
                Some(OutOfBandState::Done),
                OutOfBandRole::Sender,
                OutOfBandEvent::ReuseReceived { reusable: false },
            ),
            Err(StateError::InvalidTransition {
                from: Some(OutOfBandState::Done),
                role: OutOfBandRole::Sender,
                event: OutOfBandEvent::ReuseReceived { reusable: false },
            })
        );
    }
}

use crate::{invitation::InvitationError, key::KeyError, record::StateError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("An invitation with id '{0}' has already been received")]
    DuplicateInvitation(String),
    #[error("Handshake protocol '{0}' is not supported")]
    UnsupportedHandshakeProtocol(String),
    #[error("None of the handshake protocols {0:?} is supported")]
    NoCommonHandshakeProtocol(Vec<String>),
    #[error("None of the attached message types {0:?} is supported")]
    NoAcceptableMessageType(Vec<String>),
    #[error("The invitation does not resolve to any service")]
    NoServices,
    #[error("Out-of-band record '{0}' not found")]
    RecordNotFound(String),
    #[error("Invalid record state: {0}")]
    InvalidRecordState(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("Invitation error: {0}")]
    Invitation(#[from] InvitationError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Collaborator error: {0}")]
    Collaborator(String),
    #[cfg(feature = "askar")]
    #[error("Storage error: {0}")]
    Storage(#[from] aries_askar::Error),
    #[cfg(feature = "askar")]
    #[error("Decode state error: {0}")]
    DecodeState(&'static str),
    #[error("Internal error")]
    Internal,
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Internal
    }
}

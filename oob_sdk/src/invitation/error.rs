use crate::key::KeyError;

#[derive(thiserror::Error, Debug)]
pub enum InvitationError {
    #[error("'{0}' does not contain an invitation")]
    MissingParameter(String),
    #[error("invalid base64 encoding of parameter '{0}'")]
    InvalidEncoding(String),
    #[error("(de)serializing invitation: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported invitation type '{0}'")]
    UnsupportedType(String),
    #[error("invalid invitation: {0}")]
    Invalid(String),
    #[error("invalid key in invitation: {0}")]
    Key(#[from] KeyError),
    #[error("invalid URL")]
    Url(#[from] url::ParseError),
    #[cfg(feature = "resolve")]
    #[error("fetching '{0}' failed: {1}")]
    Http(String, reqwest::Error),
}

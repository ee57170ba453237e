use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

const DEFAULT_ACCEPT_INVITATION_TIMEOUT_MS: u64 = 20_000;

/// Agent wide settings of the out-of-band module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutOfBandConfig {
    /// Label used in created invitations and handshakes
    pub label: String,
    pub image_url: Option<String>,
    /// How long delivery of an attached request waits for a connection to
    /// become ready
    pub accept_invitation_timeout_ms: u64,
    /// Endpoints advertised when no mediator provides routing
    pub default_endpoints: Vec<String>,
    pub use_default_mediator: bool,
    /// Scope of the events emitted by this agent
    pub correlation_id: String,
}

impl Default for OutOfBandConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            image_url: None,
            accept_invitation_timeout_ms: DEFAULT_ACCEPT_INVITATION_TIMEOUT_MS,
            default_endpoints: Vec::new(),
            use_default_mediator: true,
            correlation_id: "default".to_string(),
        }
    }
}

impl OutOfBandConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read the configuration from a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::InvalidConfiguration(format!("could not read {}: {e}", path.display()))
        })?;

        Self::from_json(&json)
    }

    pub fn accept_invitation_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_invitation_timeout_ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OutOfBandConfig::from_json(r#"{ "label": "Faber" }"#).unwrap();

        assert_eq!(config.label, "Faber");
        assert_eq!(config.accept_invitation_timeout(), Duration::from_secs(20));
        assert!(config.use_default_mediator);
        assert!(config.default_endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oob.json");
        tokio::fs::write(
            &path,
            r#"{
                "label": "Alice",
                "acceptInvitationTimeoutMs": 5000,
                "defaultEndpoints": ["https://alice.example/didcomm"],
                "useDefaultMediator": false
            }"#,
        )
        .await
        .unwrap();

        let config = OutOfBandConfig::from_file(&path).await.unwrap();

        assert_eq!(config.accept_invitation_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_endpoints, vec!["https://alice.example/didcomm"]);
        assert!(!config.use_default_mediator);

        assert!(matches!(
            OutOfBandConfig::from_file(dir.path().join("missing.json")).await,
            Err(Error::InvalidConfiguration(_))
        ));
    }
}

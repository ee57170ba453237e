use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use crate::{
    config::OutOfBandConfig,
    definitions::{Routing, RoutingProvider},
    error::Error,
    key::Key,
};

/// Routing without a mediator: a fresh key per invitation, reachable at a
/// fixed set of endpoints
#[derive(Debug, Clone, Default)]
pub struct StaticRoutingProvider {
    endpoints: Vec<String>,
    keys: Arc<RwLock<HashMap<String, SigningKey>>>,
}

impl StaticRoutingProvider {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            keys: Default::default(),
        }
    }

    pub fn from_config(config: &OutOfBandConfig) -> Self {
        Self::new(config.default_endpoints.clone())
    }

    /// The secret half of a key handed out by this provider
    pub fn signing_key(&self, key: &Key) -> Result<Option<SigningKey>, Error> {
        Ok(self.keys.read()?.get(&key.fingerprint()).cloned())
    }
}

#[async_trait]
impl RoutingProvider for StaticRoutingProvider {
    async fn get_routing(&self, use_default_mediator: bool) -> Result<Routing, Error> {
        if self.endpoints.is_empty() {
            return Err(Error::InvalidConfiguration(
                "no endpoints configured to receive messages at".into(),
            ));
        }

        if use_default_mediator {
            tracing::trace!("no mediator available, using the configured endpoints");
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let recipient_key = Key::from(&signing_key.verifying_key());

        self.keys
            .write()?
            .insert(recipient_key.fingerprint(), signing_key);

        Ok(Routing {
            recipient_key,
            routing_keys: Vec::new(),
            endpoints: self.endpoints.clone(),
            mediator_id: None,
        })
    }

    async fn remove_routing_keys(&self, mediator_id: &str, keys: &[Key]) -> Result<(), Error> {
        tracing::debug!(
            "not removing {} keys from mediator {mediator_id}, no mediator in use",
            keys.len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_fresh_keys() {
        let provider = StaticRoutingProvider::new(vec!["https://agent.example".to_string()]);

        let first = provider.get_routing(true).await.unwrap();
        let second = provider.get_routing(true).await.unwrap();

        assert_ne!(first.recipient_key, second.recipient_key);
        assert_eq!(first.endpoints, vec!["https://agent.example"]);
        assert!(first.mediator_id.is_none());

        let signing_key = provider.signing_key(&first.recipient_key).unwrap().unwrap();
        assert_eq!(Key::from(&signing_key.verifying_key()), first.recipient_key);
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let provider = StaticRoutingProvider::default();

        assert!(matches!(
            provider.get_routing(false).await,
            Err(Error::InvalidConfiguration(_))
        ));
    }
}

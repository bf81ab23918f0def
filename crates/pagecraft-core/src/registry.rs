//! Provider registry.
//!
//! An explicit registry instance constructed once at process start and
//! passed by reference into the engine. No global mutable state: adding
//! a provider is a method call on the value you own.

use crate::config::ProviderConfig;
use crate::error::{EngineError, Result};
use crate::generator::ImageGenerator;
use std::collections::HashMap;
use std::sync::Arc;

type Constructor =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn ImageGenerator>> + Send + Sync>;

/// Maps provider keys to generator constructors.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under the given key, replacing any
    /// previous registration for that key.
    pub fn register<F>(&mut self, key: impl Into<String>, constructor: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ImageGenerator>> + Send + Sync + 'static,
    {
        self.constructors.insert(key.into(), Arc::new(constructor));
    }

    /// Resolves a provider key into a concrete generator.
    ///
    /// # Errors
    ///
    /// `EngineError::UnsupportedProvider` (listing the registered keys)
    /// when the key is unknown; constructor errors pass through.
    pub fn create(&self, key: &str, config: &ProviderConfig) -> Result<Arc<dyn ImageGenerator>> {
        let constructor =
            self.constructors
                .get(key)
                .ok_or_else(|| EngineError::UnsupportedProvider {
                    provider: key.to_string(),
                    known: self.known_keys(),
                })?;
        constructor(config)
    }

    /// The registered provider keys, sorted for stable error output.
    pub fn known_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.constructors.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::generator::ImageRequest;
    use async_trait::async_trait;

    struct DummyGenerator;

    #[async_trait]
    impl ImageGenerator for DummyGenerator {
        fn validate_config(&self) -> std::result::Result<(), ProviderError> {
            Ok(())
        }

        async fn generate_image(
            &self,
            _request: &ImageRequest,
        ) -> std::result::Result<Vec<u8>, ProviderError> {
            Ok(vec![1, 2, 3])
        }
    }

    #[test]
    fn create_resolves_registered_key() {
        let mut registry = ProviderRegistry::new();
        registry.register("dummy", |_config| Ok(Arc::new(DummyGenerator) as _));

        let config = ProviderConfig::new("dummy", "key");
        assert!(registry.create("dummy", &config).is_ok());
    }

    #[test]
    fn create_unknown_key_lists_known_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register("alpha", |_config| Ok(Arc::new(DummyGenerator) as _));
        registry.register("beta", |_config| Ok(Arc::new(DummyGenerator) as _));

        let config = ProviderConfig::new("unknown", "key");
        match registry.create("unknown", &config) {
            Err(EngineError::UnsupportedProvider { provider, known }) => {
                assert_eq!(provider, "unknown");
                assert_eq!(known, vec!["alpha".to_string(), "beta".to_string()]);
            }
            Err(other) => panic!("expected UnsupportedProvider, got {other:?}"),
            Ok(_) => panic!("expected UnsupportedProvider, got a generator"),
        }
    }

    #[test]
    fn register_replaces_existing_key() {
        let mut registry = ProviderRegistry::new();
        registry.register("dummy", |_config| {
            Err(EngineError::config("first registration"))
        });
        registry.register("dummy", |_config| Ok(Arc::new(DummyGenerator) as _));

        let config = ProviderConfig::new("dummy", "key");
        assert!(registry.create("dummy", &config).is_ok());
        assert_eq!(registry.known_keys(), vec!["dummy".to_string()]);
    }
}

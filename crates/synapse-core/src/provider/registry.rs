//! `model_code -> provider` lookup table, assembled once at startup by
//! composing any number of provider bundles.

use std::collections::HashMap;
use std::sync::Arc;

use super::Provider;
use crate::error::{Error, Result};

/// A named set of `(model_code, provider)` pairs contributed by one provider
/// family (e.g. "every model this Gemini client is configured for").
pub struct ProviderBundle {
    pub models: Vec<(String, Arc<dyn Provider>)>,
}

impl ProviderBundle {
    pub fn new(models: Vec<(String, Arc<dyn Provider>)>) -> Self {
        Self { models }
    }
}

/// Builds a [`ProviderRegistry`] by folding bundles together. On a
/// `model_code` collision, the later bundle wins and a warning is logged —
/// registries are assembled once at startup, so "last write wins" is
/// reachable only through genuine misconfiguration.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    models: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, bundle: ProviderBundle) -> Self {
        for (code, provider) in bundle.models {
            if let Some(previous) = self.models.insert(code.clone(), provider) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    model_code = %code,
                    previous_provider = previous.name(),
                    "model code registered by more than one provider bundle; last write wins"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = previous;
            }
        }
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            models: Arc::new(self.models),
        }
    }
}

/// The immutable `model_code -> provider` lookup table. Cheap to clone: it
/// is an `Arc` handle shared across every worker.
#[derive(Clone)]
pub struct ProviderRegistry {
    models: Arc<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn get(&self, model_code: &str) -> Result<Arc<dyn Provider>> {
        self.models
            .get(model_code)
            .cloned()
            .ok_or_else(|| Error::model_not_found(model_code))
    }

    /// Enumerates the registry's keys, regardless of insertion order.
    pub fn list_models(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::GenerateStream;
    use crate::task::GenerationConfig;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct StubProvider(&'static str);

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            self.0
        }
        async fn generate(
            &self,
            _ctx: CancellationToken,
            _prompt: &str,
            _images: Option<&[Bytes]>,
            _config: Option<&GenerationConfig>,
        ) -> Result<String> {
            Ok(self.0.to_string())
        }
        async fn generate_stream(
            &self,
            _ctx: CancellationToken,
            _prompt: &str,
            _images: Option<&[Bytes]>,
            _config: Option<&GenerationConfig>,
        ) -> GenerateStream {
            let (_tx, chunks) = mpsc::channel(1);
            let (_etx, errors) = mpsc::channel(1);
            GenerateStream { chunks, errors }
        }
        fn count_tokens(&self, prompt: &str) -> Result<usize> {
            Ok(prompt.len())
        }
    }

    #[test]
    fn collisions_are_last_write_wins() {
        let registry = ProviderRegistryBuilder::new()
            .with_bundle(ProviderBundle::new(vec![(
                "m1".into(),
                Arc::new(StubProvider("first")) as Arc<dyn Provider>,
            )]))
            .with_bundle(ProviderBundle::new(vec![(
                "m1".into(),
                Arc::new(StubProvider("second")) as Arc<dyn Provider>,
            )]))
            .build();

        assert_eq!(registry.get("m1").unwrap().name(), "second");
    }

    #[test]
    fn list_models_reflects_all_bundles_regardless_of_order() {
        let registry = ProviderRegistryBuilder::new()
            .with_bundle(ProviderBundle::new(vec![(
                "m1".into(),
                Arc::new(StubProvider("a")) as Arc<dyn Provider>,
            )]))
            .with_bundle(ProviderBundle::new(vec![(
                "m2".into(),
                Arc::new(StubProvider("b")) as Arc<dyn Provider>,
            )]))
            .build();

        let mut models = registry.list_models();
        models.sort();
        assert_eq!(models, vec!["m1", "m2"]);
    }

    #[test]
    fn unknown_model_is_reported() {
        let registry = ProviderRegistryBuilder::new().build();
        assert!(matches!(
            registry.get("nope"),
            Err(Error::ModelNotFound { .. })
        ));
    }
}

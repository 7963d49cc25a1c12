use super::{Source, SourceConstructor};
use crate::config::SourceConfig;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide mapping from source-type tag to constructor. Registrations
/// occur once at process start, before the scheduler begins. This is the
/// only place that knows the full set of available source types; adding a
/// new type is additive — register a new constructor and supply config.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    constructors: HashMap<String, SourceConstructor>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `source_type`. A later registration of
    /// the same tag replaces the earlier one.
    pub fn register(&mut self, source_type: impl Into<String>, constructor: SourceConstructor) {
        self.constructors.insert(source_type.into(), constructor);
    }

    /// Looks up `config.source_type` and delegates to its constructor.
    /// Unknown tags are a [`ConfigError`].
    pub async fn create(&self, config: SourceConfig) -> Result<Arc<dyn Source>, ConfigError> {
        let constructor = self
            .constructors
            .get(&config.source_type)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSourceType(config.source_type.clone()))?;

        constructor(config)
            .await
            .map_err(|e| ConfigError::InvalidOption {
                source: "source".to_string(),
                option: "<construction>".to_string(),
                reason: e.to_string(),
            })
    }

    /// Filters out disabled entries and constructs the survivors, preserving
    /// input order.
    pub async fn create_all(
        &self,
        configs: Vec<SourceConfig>,
    ) -> Result<Vec<Arc<dyn Source>>, ConfigError> {
        let mut sources = Vec::new();
        for config in configs.into_iter().filter(|c| c.enabled) {
            sources.push(self.create(config).await?);
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceOptions;
    use crate::error::SourceError;
    use crate::task::TaskEvent;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use tokio_util::sync::CancellationToken;

    struct StubSource {
        source_type: String,
        name: String,
    }

    #[async_trait]
    impl Source for StubSource {
        fn source_type(&self) -> &str {
            &self.source_type
        }
        fn name(&self) -> &str {
            &self.name
        }
        async fn start(&self, _ctx: CancellationToken) -> Result<(), SourceError> {
            Ok(())
        }
        async fn stop(&self) {}
        fn tasks(&self) -> BoxStream<'static, TaskEvent> {
            Box::pin(stream::empty())
        }
        async fn ack(&self, _event: &TaskEvent) -> Result<(), SourceError> {
            Ok(())
        }
        async fn nack(&self, _event: &TaskEvent, _reason: &str) -> Result<(), SourceError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn stub_config(source_type: &str, name: &str, enabled: bool) -> SourceConfig {
        SourceConfig {
            source_type: source_type.to_string(),
            name: name.to_string(),
            enabled,
            options: SourceOptions::default(),
        }
    }

    fn registry_with_stub() -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register(
            "stub",
            Arc::new(|config: SourceConfig| {
                Box::pin(async move {
                    Ok(Arc::new(StubSource {
                        source_type: config.source_type,
                        name: config.name,
                    }) as Arc<dyn Source>)
                })
            }),
        );
        registry
    }

    #[tokio::test]
    async fn unknown_source_type_is_a_config_error() {
        let registry = registry_with_stub();
        let err = registry
            .create(stub_config("nope", "a", true))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSourceType(t) if t == "nope"));
    }

    #[tokio::test]
    async fn create_all_filters_disabled_and_preserves_order() {
        let registry = registry_with_stub();
        let configs = vec![
            stub_config("stub", "a", true),
            stub_config("stub", "b", false),
            stub_config("stub", "c", true),
        ];
        let sources = registry.create_all(configs).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name(), "a");
        assert_eq!(sources[1].name(), "c");
    }
}

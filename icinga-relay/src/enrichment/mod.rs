//! Optional asynchronous augmentation of received events before routing.

mod service_groups;
mod stage;

pub use service_groups::ServiceGroupsEnricher;
pub use stage::EnrichmentStage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use crate::icinga::IcingaClient;
use crate::model::Envelope;

/// A named enrichment step.
///
/// Enrichment is best effort: an enricher that cannot add anything returns
/// the event it was given, and never fails.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Directive name used in subscription `enrich` lists.
    fn name(&self) -> &str;

    async fn enrich(&self, event: Arc<Envelope>) -> Arc<Envelope>;
}

/// Enrichers by directive name.
#[derive(Clone, Default)]
pub struct EnrichmentRegistry {
    enrichers: HashMap<String, Arc<dyn Enricher>>,
}

impl EnrichmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in enricher.
    pub fn with_defaults(client: IcingaClient, timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ServiceGroupsEnricher::new(client, timeout)));
        registry
    }

    pub fn register(&mut self, enricher: Arc<dyn Enricher>) {
        self.enrichers.insert(enricher.name().to_string(), enricher);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Enricher>> {
        self.enrichers.get(name).cloned()
    }

    /// Look up `directives` in order. Unknown names are reported and skipped.
    pub fn resolve(&self, directives: &[String]) -> Vec<Arc<dyn Enricher>> {
        directives
            .iter()
            .filter_map(|directive| {
                let enricher = self.get(directive);
                if enricher.is_none() {
                    error!(directive = %directive, "Unknown enrichment directive, skipping");
                }
                enricher
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Enricher for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn enrich(&self, event: Arc<Envelope>) -> Arc<Envelope> {
            event
        }
    }

    #[test]
    fn test_resolve_keeps_order_and_skips_unknown() {
        let mut registry = EnrichmentRegistry::new();
        registry.register(Arc::new(Named("a")));
        registry.register(Arc::new(Named("b")));

        let directives = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
        let names: Vec<_> = registry
            .resolve(&directives)
            .iter()
            .map(|enricher| enricher.name().to_string())
            .collect();

        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_defaults_include_service_groups() {
        let client =
            IcingaClient::new("https://icinga.local:5665", "u", "p", None, false).unwrap();
        let registry = EnrichmentRegistry::with_defaults(client, Duration::from_secs(1));
        assert!(registry.get("service-groups").is_some());
    }
}

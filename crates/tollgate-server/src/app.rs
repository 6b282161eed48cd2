//! Wires configuration into a running tool service

use std::sync::Arc;

use tollgate_core::config::{StoreBackend, TollgateConfig};
use tollgate_core::recovery::{CounterStore, InMemoryStore, NoopStore};
use tollgate_core::telemetry::{FanoutMetrics, InMemoryMetrics, MetricsSink, TracingMetrics};
use tollgate_core::{ResiliencePipeline, TollgateResult, ToolDispatcher, ToolRegistry};
use tollgate_tools::register_command_tools;

/// Everything a server session needs
pub struct App {
    config: TollgateConfig,
    dispatcher: ToolDispatcher,
    metrics: Arc<InMemoryMetrics>,
    store: Option<Arc<InMemoryStore>>,
}

/// Registry holding the command tools from `config`
pub fn build_registry(config: &TollgateConfig) -> TollgateResult<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_command_tools(&mut registry, &config.tools)?;
    Ok(registry)
}

impl App {
    /// Build from configuration, registering its command tools
    pub fn from_config(config: TollgateConfig) -> TollgateResult<Self> {
        let registry = build_registry(&config)?;
        Self::new(config, registry)
    }

    /// Build around an existing registry.
    ///
    /// Starts the in-memory store's eviction task, so a Tokio runtime must be
    /// running.
    pub fn new(config: TollgateConfig, registry: ToolRegistry) -> TollgateResult<Self> {
        config.validate()?;

        let metrics = Arc::new(InMemoryMetrics::new());
        let sink = FanoutMetrics::new(vec![metrics.clone() as Arc<dyn MetricsSink>])
            .with(Arc::new(TracingMetrics));

        let store = match config.store.backend {
            StoreBackend::Memory => Some(InMemoryStore::start(config.store.eviction.clone())?),
            StoreBackend::Noop => None,
        };
        let counter_store: Arc<dyn CounterStore> = match &store {
            Some(store) => store.clone(),
            None => Arc::new(NoopStore),
        };

        let pipeline = ResiliencePipeline::builder(config.rate_limit.clone(), counter_store)
            .default_policy(config.defaults.clone())
            .policies(config.operations.clone())
            .metrics(Arc::new(sink))
            .build()?;

        tracing::info!(
            tools = registry.len(),
            rate_limit = config.rate_limit.limit,
            window = ?config.rate_limit.window,
            key_mode = %config.rate_limit.key_mode,
            "tool service ready"
        );

        Ok(Self {
            dispatcher: ToolDispatcher::new(Arc::new(registry), Arc::new(pipeline)),
            config,
            metrics,
            store,
        })
    }

    pub fn config(&self) -> &TollgateConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &InMemoryMetrics {
        &self.metrics
    }

    /// Stop background work owned by the service
    pub fn shutdown(&self) {
        if let Some(store) = &self.store {
            store.shutdown();
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> Option<&Arc<InMemoryStore>> {
        self.store.as_ref()
    }
}

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{ExtensionHost, HostInner};
use crate::config::{ConfigProvider, HostConfig};
use crate::dispatch::{Dispatcher, WorkerPool};
use crate::ledger::BlameLedger;
use crate::loader::{ExtensionCatalog, Loader};
use crate::observability::{DispatchMetrics, EventBus};
use crate::registry::Registry;
use crate::Result;

#[derive(Debug, Default)]
pub struct HostBuilder {
    config: HostConfig,
    catalog: Option<ExtensionCatalog>,
    events: Option<EventBus>,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the configuration with values read from `provider`.
    pub async fn config_from<P>(mut self, provider: &P) -> Result<Self>
    where
        P: ConfigProvider + ?Sized,
    {
        self.config = HostConfig::from_provider(provider).await?;
        Ok(self)
    }

    /// Extension types available to discovered units. Defaults to the built-ins.
    pub fn catalog(mut self, catalog: ExtensionCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Shares an existing event bus instead of creating one.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<ExtensionHost> {
        self.config.validate()?;

        let events = self.events.unwrap_or_default();
        let metrics = Arc::new(DispatchMetrics::new());
        let pool = WorkerPool::new(self.config.workers, events.clone(), Arc::clone(&metrics))?;
        let registry = Arc::new(Registry::new());
        let ledger = Arc::new(BlameLedger::new(
            self.config.max_blame,
            self.config.blame_action,
        ));
        let dispatcher = Dispatcher::new(
            Arc::new(pool),
            Arc::clone(&registry),
            Arc::clone(&ledger),
            events.clone(),
            Arc::clone(&metrics),
            self.config.serialize_calls,
        );
        let loader = Loader::new(self.catalog.unwrap_or_else(ExtensionCatalog::with_builtins));

        tracing::info!(
            workers = self.config.workers,
            max_blame = self.config.max_blame,
            blame_action = %self.config.blame_action,
            serialize_calls = self.config.serialize_calls,
            "Extension host started"
        );

        Ok(ExtensionHost {
            inner: Arc::new(HostInner {
                config: self.config,
                loader,
                registry,
                ledger,
                dispatcher,
                events,
                metrics,
                cancel: CancellationToken::new(),
                shutdown_report: Mutex::new(None),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;
    use crate::ledger::BlameAction;

    #[tokio::test]
    async fn test_build_defaults() {
        let host = HostBuilder::new().build().unwrap();
        assert_eq!(host.config().workers, 4);
        assert!(host.registry().is_empty());
        assert!(!host.is_shut_down());
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let err = HostBuilder::new()
            .config(HostConfig::default().workers(0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("host.workers"));
    }

    #[test]
    fn test_build_outside_runtime_is_fatal() {
        let err = HostBuilder::new().build().unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_config_from_provider() {
        let provider = MemoryConfigProvider::new()
            .value("host.workers", "2")
            .value("host.blame_action", "discard");
        let host = HostBuilder::new()
            .config_from(&provider)
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(host.config().workers, 2);
        assert_eq!(host.ledger().action(), BlameAction::Discard);
    }
}

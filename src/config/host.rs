//! Host settings resolved from a [`ConfigProvider`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::{ConfigError, ConfigResult, EnablementProvider};
use crate::ledger::BlameAction;
use crate::loader::ExtensionDiscovery;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_BLAME: u32 = 4;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(5000);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub workers: usize,
    pub max_blame: u32,
    pub blame_action: BlameAction,
    pub serialize_calls: bool,
    pub shutdown_grace: Duration,
    pub tick_interval: Duration,
    pub extensions_dir: Option<PathBuf>,
    /// Per-extension overrides keyed by name or identity.
    pub enabled: HashMap<String, bool>,
    pub default_enabled: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_blame: DEFAULT_MAX_BLAME,
            blame_action: BlameAction::default(),
            serialize_calls: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            tick_interval: DEFAULT_TICK_INTERVAL,
            extensions_dir: None,
            enabled: HashMap::new(),
            default_enabled: true,
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every `host.*` and `extensions.*` key, keeping defaults for
    /// missing ones.
    pub async fn from_provider<P>(provider: &P) -> ConfigResult<Self>
    where
        P: ConfigProvider + ?Sized,
    {
        let mut config = Self::default();

        if let Some(workers) = provider.get::<usize>("host.workers").await? {
            config.workers = workers;
        }
        if let Some(max_blame) = provider.get::<u32>("host.max_blame").await? {
            config.max_blame = max_blame;
        }
        if let Some(action) = provider.get_string("host.blame_action").await? {
            config.blame_action = BlameAction::from_config(&action);
        }
        if let Some(serialize) = provider.get::<bool>("host.serialize_calls").await? {
            config.serialize_calls = serialize;
        }
        if let Some(ms) = provider.get::<u64>("host.shutdown_grace_ms").await? {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = provider.get::<u64>("host.tick_interval_ms").await? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(dir) = provider.get_string("host.extensions_dir").await? {
            config.extensions_dir = Some(PathBuf::from(dir));
        }
        if let Some(enabled) = provider
            .get::<HashMap<String, bool>>("extensions.enabled")
            .await?
        {
            config.enabled = enabled;
        }
        if let Some(default_enabled) = provider.get::<bool>("extensions.default_enabled").await? {
            config.default_enabled = default_enabled;
        }

        config.validate()?;
        tracing::debug!(
            provider = provider.name(),
            workers = config.workers,
            max_blame = config.max_blame,
            blame_action = %config.blame_action,
            "Host configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if self.workers == 0 {
            return Err(invalid("host.workers", "must be at least 1"));
        }
        if self.max_blame == 0 {
            return Err(invalid("host.max_blame", "must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(invalid("host.tick_interval_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn max_blame(mut self, max_blame: u32) -> Self {
        self.max_blame = max_blame;
        self
    }

    pub fn blame_action(mut self, action: BlameAction) -> Self {
        self.blame_action = action;
        self
    }

    pub fn serialize_calls(mut self, serialize: bool) -> Self {
        self.serialize_calls = serialize;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn extensions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extensions_dir = Some(dir.into());
        self
    }

    pub fn enable(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.enabled.insert(name.into(), enabled);
        self
    }

    pub fn default_enabled(mut self, enabled: bool) -> Self {
        self.default_enabled = enabled;
        self
    }

    /// Configured directory, else the platform default.
    pub fn resolved_extensions_dir(&self) -> Option<PathBuf> {
        self.extensions_dir
            .clone()
            .or_else(ExtensionDiscovery::default_extensions_dir)
    }
}

impl EnablementProvider for HostConfig {
    fn is_enabled(&self, name: &str, identity: &str) -> bool {
        self.enabled
            .get(identity)
            .or_else(|| self.enabled.get(name))
            .copied()
            .unwrap_or(self.default_enabled)
    }
}

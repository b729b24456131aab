//! Pluggable configuration providers and host settings.
//!
//! ```rust,no_run
//! use overlay_ext::config::{
//!     CompositeConfigProvider, EnvConfigProvider, FileConfigProvider, HostConfig,
//! };
//!
//! # async fn example() -> Result<(), overlay_ext::ConfigError> {
//! let provider = CompositeConfigProvider::new()
//!     .provider(Box::new(EnvConfigProvider::new()))
//!     .provider(Box::new(FileConfigProvider::new("overlay.json")));
//! let config = HostConfig::from_provider(&provider).await?;
//! # Ok(())
//! # }
//! ```

mod composite;
mod env;
mod file;
mod host;
mod memory;
mod provider;

pub use composite::CompositeConfigProvider;
pub use env::{DEFAULT_ENV_PREFIX, EnvConfigProvider};
pub use file::FileConfigProvider;
pub use host::{
    DEFAULT_MAX_BLAME, DEFAULT_SHUTDOWN_GRACE, DEFAULT_TICK_INTERVAL, DEFAULT_WORKERS, HostConfig,
};
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};

use thiserror::Error;

/// Errors that can occur in configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Decides whether a discovered extension should be loaded.
pub trait EnablementProvider: Send + Sync {
    fn is_enabled(&self, name: &str, identity: &str) -> bool;
}

impl<F> EnablementProvider for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn is_enabled(&self, name: &str, identity: &str) -> bool {
        self(name, identity)
    }
}

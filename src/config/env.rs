//! Environment Variable Configuration Provider
//!
//! `host.workers` is read from `OVERLAY_HOST_WORKERS` with the default prefix.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

pub const DEFAULT_ENV_PREFIX: &str = "OVERLAY_";

#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: String,
}

impl EnvConfigProvider {
    /// Provider using [`DEFAULT_ENV_PREFIX`].
    pub fn new() -> Self {
        Self::prefixed(DEFAULT_ENV_PREFIX)
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace('.', "_"))
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_conversion() {
        let provider = EnvConfigProvider::new();
        assert_eq!(provider.env_key("host.workers"), "OVERLAY_HOST_WORKERS");
        assert_eq!(
            provider.env_key("extensions.default_enabled"),
            "OVERLAY_EXTENSIONS_DEFAULT_ENABLED"
        );

        let provider = EnvConfigProvider::prefixed("");
        assert_eq!(provider.env_key("host.max_blame"), "HOST_MAX_BLAME");
    }

    #[tokio::test]
    async fn test_env_provider_get() {
        let provider = EnvConfigProvider::prefixed("OVERLAY_TEST_ENV_");

        // SAFETY: Test-only environment setup with a unique variable name
        unsafe { std::env::set_var("OVERLAY_TEST_ENV_HOST_WORKERS", "3") };
        let value = provider.get_raw("host.workers").await.unwrap();
        assert_eq!(value, Some("3".to_string()));
        unsafe { std::env::remove_var("OVERLAY_TEST_ENV_HOST_WORKERS") };
    }

    #[tokio::test]
    async fn test_env_provider_not_found() {
        let provider = EnvConfigProvider::prefixed("NONEXISTENT_PREFIX_");
        assert_eq!(provider.get_raw("some.key").await.unwrap(), None);
    }
}

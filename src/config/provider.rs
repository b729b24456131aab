//! Configuration Provider Trait

use serde::de::DeserializeOwned;

use super::{ConfigError, ConfigResult};

/// Read-only key-value configuration source. Keys use dot notation
/// (`host.workers`); values are raw strings, JSON-encoded where structured.
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Get a raw configuration value
    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;
}

/// Typed access on top of [`ConfigProvider::get_raw`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Parses the raw value as JSON.
    fn get<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => {
                    let value: T = serde_json::from_str(raw.trim()).map_err(|e| {
                        ConfigError::InvalidValue {
                            key: key.to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }

    /// Returns a string value, accepting both bare and JSON-quoted forms.
    fn get_string(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<String>>> + Send
    where
        Self: Sync,
    {
        async move {
            Ok(self.get_raw(key).await?.map(|raw| {
                serde_json::from_str::<String>(&raw).unwrap_or(raw)
            }))
        }
    }

    fn get_or<T: DeserializeOwned + Send>(
        &self,
        key: &str,
        default: T,
    ) -> impl std::future::Future<Output = ConfigResult<T>> + Send
    where
        Self: Sync,
    {
        async move { Ok(self.get(key).await?.unwrap_or(default)) }
    }

    /// Like [`get`](Self::get), but a missing key is an error.
    fn require<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<T>> + Send
    where
        Self: Sync,
    {
        async move {
            self.get(key).await?.ok_or_else(|| ConfigError::NotFound {
                key: key.to_string(),
            })
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;

    #[tokio::test]
    async fn test_typed_get() {
        let provider = MemoryConfigProvider::new()
            .value("host.workers", "8")
            .value("host.serialize_calls", "true")
            .value("broken", "{");

        let workers: Option<usize> = provider.get("host.workers").await.unwrap();
        assert_eq!(workers, Some(8));
        assert_eq!(provider.get::<bool>("host.serialize_calls").await.unwrap(), Some(true));
        assert_eq!(provider.get::<u32>("missing").await.unwrap(), None);

        let err = provider.get::<u32>("broken").await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_get_string_unquotes() {
        let provider = MemoryConfigProvider::new()
            .value("bare", "buffer")
            .value("quoted", "\"discard\"");
        assert_eq!(
            provider.get_string("bare").await.unwrap().as_deref(),
            Some("buffer")
        );
        assert_eq!(
            provider.get_string("quoted").await.unwrap().as_deref(),
            Some("discard")
        );
    }

    #[tokio::test]
    async fn test_get_or_and_require() {
        let provider = MemoryConfigProvider::new().value("a", "1");
        assert_eq!(provider.get_or("b", 7u32).await.unwrap(), 7);
        assert_eq!(provider.require::<u32>("a").await.unwrap(), 1);
        assert!(matches!(
            provider.require::<u32>("b").await,
            Err(ConfigError::NotFound { .. })
        ));
    }
}

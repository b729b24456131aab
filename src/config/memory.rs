//! In-Memory Configuration Provider
//!
//! Code-defined configuration, mostly for tests and embedding.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug)]
pub struct MemoryConfigProvider {
    data: RwLock<HashMap<String, String>>,
    name: String,
}

impl Default for MemoryConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            name: name.into(),
        }
    }

    pub fn from_data(data: HashMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
            name: "memory".to_string(),
        }
    }

    /// Adds a value during construction.
    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.get_mut().insert(key.into(), value.into());
        self
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().await.insert(key.into(), value.into());
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.data.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_provider_basic() {
        let provider = MemoryConfigProvider::new();
        provider.insert("host.workers", "2").await;

        assert_eq!(
            provider.get_raw("host.workers").await.unwrap(),
            Some("2".to_string())
        );
        assert_eq!(provider.get_raw("nonexistent").await.unwrap(), None);
        assert_eq!(provider.name(), "memory");
    }

    #[tokio::test]
    async fn test_memory_provider_remove() {
        let provider = MemoryConfigProvider::named("overrides").value("a", "1");
        assert!(provider.remove("a").await);
        assert!(!provider.remove("a").await);
        assert!(provider.is_empty().await);
        assert_eq!(provider.name(), "overrides");
    }

    #[tokio::test]
    async fn test_memory_provider_with_data() {
        let data: HashMap<String, String> = [
            ("key1".to_string(), "value1".to_string()),
            ("key2".to_string(), "value2".to_string()),
        ]
        .into();
        let provider = MemoryConfigProvider::from_data(data);

        assert_eq!(provider.len().await, 2);
        assert_eq!(
            provider.get_raw("key1").await.unwrap(),
            Some("value1".to_string())
        );
    }
}

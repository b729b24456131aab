//! File-based Configuration Provider
//!
//! Reads a JSON document; dotted keys walk nested objects, so `host.workers`
//! matches `{"host": {"workers": 4}}` as well as a literal `"host.workers"` key.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
    data: RwLock<Option<Map<String, Value>>>,
    auto_reload: bool,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: RwLock::new(None),
            auto_reload: false,
        }
    }

    /// Re-reads the file on every lookup.
    pub fn auto_reload(path: impl Into<PathBuf>) -> Self {
        Self {
            auto_reload: true,
            ..Self::new(path)
        }
    }

    /// A missing file reads as an empty document.
    async fn load(&self) -> ConfigResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn ensure_loaded(&self) -> ConfigResult<()> {
        let mut data = self.data.write().await;
        if data.is_none() || self.auto_reload {
            *data = Some(self.load().await?);
        }
        Ok(())
    }

    pub async fn reload(&self) -> ConfigResult<()> {
        let fresh = self.load().await?;
        *self.data.write().await = Some(fresh);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
        if let Some(value) = map.get(key) {
            return Some(value);
        }
        let mut parts = key.split('.');
        let first = map.get(parts.next()?)?;
        parts.try_fold(first, |current, part| current.get(part))
    }
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        self.ensure_loaded().await?;

        let data = self.data.read().await;
        let value = data.as_ref().and_then(|map| Self::lookup(map, key));
        Ok(match value {
            Some(Value::String(s)) => Some(s.clone()),
            Some(v) => Some(v.to_string()),
            None => None,
        })
    }
}

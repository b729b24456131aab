use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::DiscoveryError;

pub(super) const MANIFEST_FILE: &str = "extension.json";
pub(super) const FILE_UNIT_SUFFIX: &str = ".ext.json";
pub(super) const CONFIG_EXTENSION: &str = "json";
/// Identity prefix for extensions registered without an on-disk unit.
pub const IN_PROCESS_PREFIX: &str = "inproc:";

fn default_version() -> String {
    "0.0.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Catalog type names, in preference order.
    pub entrypoints: Vec<String>,
}

impl ExtensionManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            entrypoints: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        if !path.is_file() {
            return Err(DiscoveryError::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }
        let invalid = |reason: String| DiscoveryError::InvalidManifest {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let manifest: Self = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        if manifest.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        Ok(manifest)
    }
}

/// Immutable metadata for one extension unit.
#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    /// Unique key: the unit's source path, or `inproc:<name>`.
    pub identity: String,
    pub name: String,
    pub source: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub enabled: bool,
    pub manifest: ExtensionManifest,
}

impl ExtensionDescriptor {
    pub(crate) fn from_unit(
        source: PathBuf,
        config_path: PathBuf,
        manifest: ExtensionManifest,
    ) -> Self {
        Self {
            identity: source.display().to_string(),
            name: manifest.name.clone(),
            source: Some(source),
            config_path: Some(config_path),
            enabled: true,
            manifest,
        }
    }

    /// Descriptor for an extension constructed in-process rather than discovered.
    pub fn in_process(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            identity: format!("{IN_PROCESS_PREFIX}{name}"),
            manifest: ExtensionManifest::new(name.clone()),
            name,
            source: None,
            config_path: None,
            enabled: true,
        }
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn entrypoints(&self) -> &[String] {
        &self.manifest.entrypoints
    }

    pub fn is_in_process(&self) -> bool {
        self.source.is_none()
    }
}

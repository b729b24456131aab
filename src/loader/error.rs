use std::path::PathBuf;

/// Failure to scan an extensions directory or read a unit's manifest.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Extensions directory not found: {path}")]
    Missing { path: PathBuf },

    #[error("Extensions directory unreadable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extension manifest not found: {path}")]
    ManifestNotFound { path: PathBuf },

    #[error("Invalid extension manifest at {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },
}

/// Failure to turn a descriptor into a live extension.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("No registered extension type for {identity} (entrypoints: {entrypoints:?})")]
    NoCapableType {
        identity: String,
        entrypoints: Vec<String>,
    },

    #[error("Extension {identity} failed to instantiate: {reason}")]
    InstantiationFailed { identity: String, reason: String },

    #[error("Extension {identity} is disabled")]
    Disabled { identity: String },
}

impl LoadError {
    pub fn identity(&self) -> &str {
        match self {
            Self::NoCapableType { identity, .. }
            | Self::InstantiationFailed { identity, .. }
            | Self::Disabled { identity } => identity,
        }
    }
}

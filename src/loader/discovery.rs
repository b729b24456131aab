use std::path::{Path, PathBuf};

use super::DiscoveryError;
use super::manifest::{
    CONFIG_EXTENSION, ExtensionDescriptor, ExtensionManifest, FILE_UNIT_SUFFIX, MANIFEST_FILE,
};
use crate::config::EnablementProvider;

/// Candidate unit found while scanning a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    source: PathBuf,
    manifest_path: PathBuf,
    config_path: PathBuf,
}

pub struct ExtensionDiscovery;

impl ExtensionDiscovery {
    /// Returns the platform default: `<config dir>/overlay-ext/extensions`.
    pub fn default_extensions_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "overlay-ext")
            .map(|dirs| dirs.config_dir().join("extensions"))
    }

    /// Lists extension units under `dir`, sorted by path.
    ///
    /// Units with a missing or unparseable manifest are skipped with a warning.
    /// Disabled units are returned with `enabled == false`.
    pub fn discover(
        dir: &Path,
        enablement: &dyn EnablementProvider,
    ) -> Result<Vec<ExtensionDescriptor>, DiscoveryError> {
        if !dir.is_dir() {
            return Err(DiscoveryError::Missing {
                path: dir.to_path_buf(),
            });
        }

        let mut candidates = Self::scan(dir)?;
        candidates.sort_by(|a, b| a.source.cmp(&b.source));

        let mut descriptors = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let manifest = match ExtensionManifest::load(&candidate.manifest_path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.source.display(),
                        error = %e,
                        "Skipping extension unit"
                    );
                    continue;
                }
            };

            let mut descriptor =
                ExtensionDescriptor::from_unit(candidate.source, candidate.config_path, manifest);
            descriptor.enabled = enablement.is_enabled(&descriptor.name, &descriptor.identity);
            tracing::debug!(
                extension = %descriptor.identity,
                name = %descriptor.name,
                enabled = descriptor.enabled,
                "Discovered extension unit"
            );
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }

    fn scan(dir: &Path) -> Result<Vec<Candidate>, DiscoveryError> {
        let unreadable = |source| DiscoveryError::Unreadable {
            path: dir.to_path_buf(),
            source,
        };

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(unreadable)? {
            let path = entry.map_err(unreadable)?.path();
            if let Some(candidate) = Self::classify(&path) {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    fn classify(path: &Path) -> Option<Candidate> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.starts_with('.') {
            return None;
        }

        if path.is_dir() {
            return Some(Candidate {
                source: path.to_path_buf(),
                manifest_path: path.join(MANIFEST_FILE),
                config_path: path.join(format!("{file_name}.{CONFIG_EXTENSION}")),
            });
        }

        let stem = file_name.strip_suffix(FILE_UNIT_SUFFIX)?;
        if stem.is_empty() {
            return None;
        }
        Some(Candidate {
            source: path.to_path_buf(),
            manifest_path: path.to_path_buf(),
            config_path: path.with_file_name(format!("{stem}.{CONFIG_EXTENSION}")),
        })
    }
}

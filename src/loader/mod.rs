//! Extension unit discovery and instantiation.
//!
//! Supported unit layouts:
//!
//! ```text
//! extensions/
//! ├── votes/
//! │   ├── extension.json     # manifest
//! │   └── votes.json         # settings
//! ├── tts.ext.json           # single-file unit manifest
//! └── tts.json               # its settings
//! ```

mod catalog;
mod discovery;
mod error;
mod manifest;

pub use catalog::{ExtensionCatalog, ExtensionFactory};
pub use discovery::ExtensionDiscovery;
pub use error::{DiscoveryError, LoadError};
pub use manifest::{ExtensionDescriptor, ExtensionManifest, IN_PROCESS_PREFIX};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::extension::{Extension, ExtensionContext, panic_message};

/// Instantiates descriptors through an [`ExtensionCatalog`].
#[derive(Debug, Clone)]
pub struct Loader {
    catalog: Arc<ExtensionCatalog>,
}

impl Loader {
    pub fn new(catalog: ExtensionCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    /// Builds the extension and runs its `load` hook.
    ///
    /// Factory and hook failures, including panics, become
    /// [`LoadError::InstantiationFailed`].
    pub fn load(
        &self,
        descriptor: &ExtensionDescriptor,
        ctx: &ExtensionContext,
    ) -> Result<Arc<dyn Extension>, LoadError> {
        if !descriptor.enabled {
            return Err(LoadError::Disabled {
                identity: descriptor.identity.clone(),
            });
        }

        let (type_name, factory) =
            self.catalog
                .resolve(descriptor.entrypoints())
                .ok_or_else(|| LoadError::NoCapableType {
                    identity: descriptor.identity.clone(),
                    entrypoints: descriptor.entrypoints().to_vec(),
                })?;

        let failed = |reason: String| LoadError::InstantiationFailed {
            identity: descriptor.identity.clone(),
            reason,
        };

        let instance = Self::contained(|| factory(descriptor))
            .map_err(failed)?
            .map_err(|e| failed(e.to_string()))?;

        tracing::debug!(
            extension = %descriptor.identity,
            type_name = %type_name,
            "Extension instantiated"
        );
        Self::initialize(descriptor, Arc::from(instance), ctx)
    }

    /// Runs the `load` hook of an already constructed instance.
    pub fn initialize(
        descriptor: &ExtensionDescriptor,
        instance: Arc<dyn Extension>,
        ctx: &ExtensionContext,
    ) -> Result<Arc<dyn Extension>, LoadError> {
        let failed = |reason: String| LoadError::InstantiationFailed {
            identity: descriptor.identity.clone(),
            reason,
        };
        Self::contained(|| instance.load(ctx))
            .map_err(failed)?
            .map_err(|e| failed(e.to_string()))?;
        Ok(instance)
    }

    fn contained<T>(f: impl FnOnce() -> T) -> Result<T, String> {
        catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            format!("panicked: {}", panic_message(payload.as_ref()))
        })
    }
}

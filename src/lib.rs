//! # overlay-ext
//!
//! Extension runtime for a livestream chat overlay.
//!
//! Extension units are discovered on disk, instantiated from a typed
//! [`ExtensionCatalog`], driven through a lifecycle state machine and fed chat
//! messages, periodic ticks and notifications through one bounded worker pool.
//! A per-extension blame ledger caps how many calls a single extension may have
//! outstanding, so one slow extension cannot starve the others.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use overlay_ext::{ChatAuthor, ChatMessage, ExtensionCatalog, ExtensionHost, HostConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), overlay_ext::Error> {
//!     let host = ExtensionHost::builder()
//!         .config(HostConfig::default().workers(4).max_blame(2))
//!         .catalog(ExtensionCatalog::with_builtins())
//!         .build()?;
//!
//!     let summary = host.load_directory("./extensions").await;
//!     println!("{} extensions configured", summary.configured);
//!
//!     host.broadcast_message(ChatMessage::new(ChatAuthor::new("dave", "UC123"), "!poll a,b"));
//!     host.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod builtin;
pub mod config;
pub mod dispatch;
pub mod extension;
pub mod host;
pub mod ledger;
pub mod loader;
pub mod observability;
pub mod prelude;
pub mod registry;

pub use builtin::{EchoExtension, PollExtension};
pub use config::{
    ConfigError, ConfigProvider, ConfigProviderExt, EnablementProvider, HostConfig,
    MemoryConfigProvider,
};
pub use dispatch::{CallbackError, DispatchError, Dispatcher, PoolShutdown, Submitted, WorkerPool};
pub use extension::{
    ChatAuthor, ChatMessage, Extension, ExtensionCall, ExtensionContext, ExtensionError,
    ExtensionResult, Notifier, NotifyError, Settings,
};
pub use host::{BroadcastReport, ExtensionHost, HostBuilder, LoadSummary, ShutdownReport};
pub use ledger::{Admission, BlameAction, BlameLedger, Release};
pub use loader::{
    DiscoveryError, ExtensionCatalog, ExtensionDescriptor, ExtensionDiscovery, ExtensionManifest,
    LoadError, Loader,
};
pub use observability::{DispatchMetrics, EventBus, HostEvent, MetricsSnapshot};
pub use registry::{LifecycleState, Registry, RegistryEntry};

/// Error type for extension host operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration provider failed or produced an invalid value.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The extensions directory could not be scanned.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// An extension unit could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A callback could not be dispatched or failed inside the extension.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// `configure` failed; the extension is excluded from event dispatch.
    #[error("Extension {identity} failed to configure: {reason}")]
    ConfigurationFailed { identity: String, reason: String },

    /// The worker pool could not be constructed.
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Two units resolved to the same identity.
    #[error("Extension already registered: {identity}")]
    DuplicateExtension { identity: String },

    /// Two units declared the same name.
    #[error("Duplicate extension name '{name}': first at {first}, second at {second}")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },

    /// No entry for the given name or identity.
    #[error("Extension not registered: {0}")]
    UnknownExtension(String),

    /// Lifecycle transition rejected by the state machine.
    #[error("Extension {identity} cannot move from {from} to {to}")]
    InvalidTransition {
        identity: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// The host has already been shut down.
    #[error("Extension host is shut down")]
    ShutDown,

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid or unreadable configuration, discovery problems
    Configuration,
    /// Faults raised by extension code or its unit layout
    Extension,
    /// Admission control and pool availability
    Dispatch,
    /// Host cannot start
    Fatal,
    /// Internal errors (IO, JSON, unexpected states)
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::Discovery(_) => ErrorCategory::Configuration,

            Error::Load(_)
            | Error::ConfigurationFailed { .. }
            | Error::DuplicateExtension { .. }
            | Error::DuplicateName { .. }
            | Error::Dispatch(DispatchError::Callback(_)) => ErrorCategory::Extension,

            Error::Dispatch(_) | Error::UnknownExtension(_) | Error::ShutDown => {
                ErrorCategory::Dispatch
            }

            Error::Pool(_) => ErrorCategory::Fatal,

            Error::InvalidTransition { .. } | Error::Io(_) | Error::Json(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Only worker pool construction failures stop the host from starting.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            Error::ConfigurationFailed { identity, .. }
            | Error::DuplicateExtension { identity }
            | Error::InvalidTransition { identity, .. } => Some(identity),
            Error::UnknownExtension(identity) => Some(identity),
            Error::Load(err) => Some(err.identity()),
            Error::Dispatch(err) => err.identity(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Prelude module for convenient imports.
//!
//! Re-exports what an extension author or host embedder needs most often.
//!
//! # Usage
//!
//! ```rust
//! use overlay_ext::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;

// Host
pub use crate::host::{BroadcastReport, ExtensionHost, HostBuilder, LoadSummary, ShutdownReport};

// Extension authoring
pub use crate::extension::{
    ChatAuthor, ChatMessage, Extension, ExtensionContext, ExtensionError, ExtensionResult,
    Notifier, Settings, SettingsExt,
};

// Loading
pub use crate::loader::{ExtensionCatalog, ExtensionDescriptor};

// Configuration
pub use crate::config::{ConfigProvider, ConfigProviderExt, HostConfig};

// Dispatch
pub use crate::ledger::BlameAction;
pub use crate::registry::LifecycleState;

// Observability
pub use crate::observability::{EventBus, HostEvent, MetricsSnapshot};

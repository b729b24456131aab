//! Capability contract for overlay extensions.
//!
//! Every extension unit implements [`Extension`]. All six methods are
//! required, so a unit with a partial capability set cannot be registered in
//! the first place. The host owns the instance and lends it to worker jobs for
//! one call at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use overlay_ext::extension::*;
//!
//! #[derive(Default)]
//! pub struct Counter {
//!     seen: AtomicU64,
//! }
//!
//! impl Extension for Counter {
//!     fn load(&self, _ctx: &ExtensionContext) -> ExtensionResult<()> { Ok(()) }
//!     fn configure(&self, _settings: &Settings) -> ExtensionResult<()> { Ok(()) }
//!     fn handle_message(&self, _message: &ChatMessage) -> ExtensionResult<()> {
//!         self.seen.fetch_add(1, Ordering::Relaxed);
//!         Ok(())
//!     }
//!     fn handle_notify(&self, _source: Option<&str>, _data: &serde_json::Value) -> ExtensionResult<()> { Ok(()) }
//!     fn tick(&self, _timestamp_nanos: i64, _interval_nanos: i64) -> ExtensionResult<()> { Ok(()) }
//!     fn unload(&self) -> ExtensionResult<()> { Ok(()) }
//! }
//! ```

mod call;
mod message;
mod notify;

pub use call::ExtensionCall;
pub use message::{ChatAuthor, ChatMessage};
pub use notify::{Notifier, NotifyError};

use std::any::Any;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Key-value configuration document handed to [`Extension::configure`].
pub type Settings = serde_json::Map<String, Value>;

/// Errors raised by extension code.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("{0}")]
    Message(String),

    #[error("Missing setting '{key}'")]
    MissingSetting { key: String },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExtensionError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

pub type ExtensionResult<T> = std::result::Result<T, ExtensionError>;

/// The contract every extension unit satisfies.
///
/// Calls into the same instance are not serialized unless the host runs with
/// `host.serialize_calls`, so mutable state belongs behind the extension's own
/// lock. Returning `Err` or panicking is contained by the host: the failure is
/// logged and the extension stays eligible for later calls.
pub trait Extension: Send + Sync {
    /// One-time initialization, before `configure`.
    fn load(&self, ctx: &ExtensionContext) -> ExtensionResult<()>;

    /// Applies settings. Called once after `load` and again on hot reconfigure.
    fn configure(&self, settings: &Settings) -> ExtensionResult<()>;

    /// Called once per inbound chat message.
    fn handle_message(&self, message: &ChatMessage) -> ExtensionResult<()>;

    /// Direct notification from the host (`source == None`) or another extension.
    fn handle_notify(&self, source: Option<&str>, data: &Value) -> ExtensionResult<()>;

    /// Periodic tick. `timestamp_nanos` is wall-clock time since the UNIX epoch.
    fn tick(&self, timestamp_nanos: i64, interval_nanos: i64) -> ExtensionResult<()>;

    /// One-time teardown; must release every extension-owned resource.
    fn unload(&self) -> ExtensionResult<()>;
}

/// Host-provided context handed to [`Extension::load`].
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    name: String,
    identity: String,
    config_path: Option<PathBuf>,
    notifier: Notifier,
    cancellation_token: CancellationToken,
}

impl ExtensionContext {
    pub(crate) fn new(
        name: impl Into<String>,
        identity: impl Into<String>,
        config_path: Option<PathBuf>,
        notifier: Notifier,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            identity: identity.into(),
            config_path,
            notifier,
            cancellation_token,
        }
    }

    /// Context that is not attached to any host. Notifications fail with
    /// [`NotifyError::HostGone`]; useful for unit-testing extensions.
    pub fn detached(name: impl Into<String>) -> Self {
        let name = name.into();
        let identity = format!("{}{}", crate::loader::IN_PROCESS_PREFIX, name);
        Self {
            notifier: Notifier::detached(identity.clone()),
            name,
            identity,
            config_path: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Cancelled when host shutdown begins. Long-running callbacks should poll it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// Typed accessors over a [`Settings`] document.
pub trait SettingsExt {
    fn require_str(&self, key: &str) -> ExtensionResult<&str>;
    fn str_or<'a>(&'a self, key: &str, default: &'a str) -> ExtensionResult<&'a str>;
}

impl SettingsExt for Settings {
    fn require_str(&self, key: &str) -> ExtensionResult<&str> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(ExtensionError::InvalidSetting {
                key: key.to_string(),
                reason: format!("expected a string, found {other}"),
            }),
            None => Err(ExtensionError::MissingSetting {
                key: key.to_string(),
            }),
        }
    }

    fn str_or<'a>(&'a self, key: &str, default: &'a str) -> ExtensionResult<&'a str> {
        match self.require_str(key) {
            Err(ExtensionError::MissingSetting { .. }) => Ok(default),
            other => other,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: Value) -> Settings {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_require_str() {
        let s = settings(json!({"prefix": "!tts", "limit": 3}));
        assert_eq!(s.require_str("prefix").unwrap(), "!tts");
        assert!(matches!(
            s.require_str("missing"),
            Err(ExtensionError::MissingSetting { .. })
        ));
        assert!(matches!(
            s.require_str("limit"),
            Err(ExtensionError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_str_or_defaults_only_when_missing() {
        let s = settings(json!({"limit": 3}));
        assert_eq!(s.str_or("prefix", "!").unwrap(), "!");
        assert!(s.str_or("limit", "x").is_err());
    }

    #[test]
    fn test_detached_context() {
        let ctx = ExtensionContext::detached("echo");
        assert_eq!(ctx.name(), "echo");
        assert_eq!(ctx.identity(), "inproc:echo");
        assert!(ctx.config_path().is_none());
        assert!(!ctx.is_shutting_down());
        assert!(matches!(
            ctx.notifier().notify("other", json!(1)),
            Err(NotifyError::HostGone)
        ));
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 1");
    }
}

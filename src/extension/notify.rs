//! Extension to host notification relay.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::registry::{LifecycleState, Registry};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Extension host is no longer running")]
    HostGone,

    #[error("Notification target not found: {target}")]
    UnknownTarget { target: String },

    #[error("Notification target {target} is not accepting calls (state: {state})")]
    Unavailable {
        target: String,
        state: LifecycleState,
    },

    #[error("Notification target {target} failed: {reason}")]
    Failed { target: String, reason: String },
}

/// Handle an extension uses to notify another extension.
///
/// Delivery is a direct call on the caller's thread, not a queued message:
/// `notify` returns once the target's `handle_notify` has returned. Relayed
/// calls pass the target's call gate but not the blame ledger.
#[derive(Debug, Clone)]
pub struct Notifier {
    source: String,
    registry: Weak<Registry>,
}

impl Notifier {
    pub(crate) fn new(source: impl Into<String>, registry: &Arc<Registry>) -> Self {
        Self {
            source: source.into(),
            registry: Arc::downgrade(registry),
        }
    }

    pub(crate) fn detached(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            registry: Weak::new(),
        }
    }

    /// Identity reported to the target as the notification source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Delivers `data` to `target` (a name or identity).
    pub fn notify(&self, target: &str, data: Value) -> Result<(), NotifyError> {
        let registry = self.registry.upgrade().ok_or(NotifyError::HostGone)?;
        let entry = registry
            .resolve(target)
            .ok_or_else(|| NotifyError::UnknownTarget {
                target: target.to_string(),
            })?;

        let identity = entry.descriptor.identity.clone();
        let unavailable = |state| NotifyError::Unavailable {
            target: identity.clone(),
            state,
        };

        if !entry.state.is_dispatchable() {
            return Err(unavailable(entry.state));
        }
        let instance = entry.instance.clone().ok_or_else(|| unavailable(entry.state))?;
        let _pass = entry.gate.enter().ok_or_else(|| unavailable(entry.state))?;

        tracing::debug!(
            extension = %identity,
            source = %self.source,
            "Relaying notification"
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            instance.handle_notify(Some(&self.source), &data)
        }));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(
                    extension = %identity,
                    function = "handle_notify",
                    source = %self.source,
                    error = %e,
                    "Relayed notification failed"
                );
                Err(NotifyError::Failed {
                    target: identity,
                    reason: e.to_string(),
                })
            }
            Err(payload) => {
                let reason = super::panic_message(payload.as_ref());
                tracing::warn!(
                    extension = %identity,
                    function = "handle_notify",
                    source = %self.source,
                    panic = %reason,
                    "Relayed notification panicked"
                );
                Err(NotifyError::Failed {
                    target: identity,
                    reason,
                })
            }
        }
    }
}

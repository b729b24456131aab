//! A single host-to-extension invocation.

use std::sync::Arc;

use serde_json::Value;

use super::{ChatMessage, Extension, ExtensionResult, Settings};

/// One callback invocation, queued, buffered or replayed as a unit.
///
/// Payloads are reference counted, so one event fans out to every extension
/// without copying.
#[derive(Debug, Clone)]
pub enum ExtensionCall {
    Configure(Arc<Settings>),
    Message(Arc<ChatMessage>),
    Notify {
        source: Option<String>,
        data: Arc<Value>,
    },
    Tick {
        timestamp_nanos: i64,
        interval_nanos: i64,
    },
}

impl ExtensionCall {
    pub fn configure(settings: Settings) -> Self {
        Self::Configure(Arc::new(settings))
    }

    pub fn message(message: ChatMessage) -> Self {
        Self::Message(Arc::new(message))
    }

    pub fn notify(source: Option<String>, data: Value) -> Self {
        Self::Notify {
            source,
            data: Arc::new(data),
        }
    }

    pub fn tick(timestamp_nanos: i64, interval_nanos: i64) -> Self {
        Self::Tick {
            timestamp_nanos,
            interval_nanos,
        }
    }

    /// Name of the capability this call invokes, for logs and events.
    pub fn function(&self) -> &'static str {
        match self {
            Self::Configure(_) => "configure",
            Self::Message(_) => "handle_message",
            Self::Notify { .. } => "handle_notify",
            Self::Tick { .. } => "tick",
        }
    }

    /// Lifecycle calls are awaited by the host and bypass admission control.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Configure(_))
    }

    pub fn invoke(&self, extension: &dyn Extension) -> ExtensionResult<()> {
        match self {
            Self::Configure(settings) => extension.configure(settings),
            Self::Message(message) => extension.handle_message(message),
            Self::Notify { source, data } => extension.handle_notify(source.as_deref(), data),
            Self::Tick {
                timestamp_nanos,
                interval_nanos,
            } => extension.tick(*timestamp_nanos, *interval_nanos),
        }
    }
}

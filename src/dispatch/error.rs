use crate::registry::LifecycleState;

/// An extension callback returned an error or panicked.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{identity}.{function} failed: {reason}")]
pub struct CallbackError {
    pub identity: String,
    pub function: &'static str,
    pub reason: String,
    pub panicked: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Extension not registered: {identity}")]
    UnknownExtension { identity: String },

    #[error("Extension {identity} does not accept {function} in state {state}")]
    NotDispatchable {
        identity: String,
        function: &'static str,
        state: LifecycleState,
    },

    #[error("Extension {identity} is unloading")]
    Unloading { identity: String },

    #[error("Extension {identity} at blame ceiling, {function} call discarded")]
    Backpressure {
        identity: String,
        function: &'static str,
    },

    #[error(transparent)]
    Callback(#[from] CallbackError),
}

impl DispatchError {
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::PoolClosed => None,
            Self::UnknownExtension { identity }
            | Self::NotDispatchable { identity, .. }
            | Self::Unloading { identity }
            | Self::Backpressure { identity, .. } => Some(identity),
            Self::Callback(err) => Some(&err.identity),
        }
    }

    /// Admission or availability refusals, as opposed to extension faults.
    pub fn is_refusal(&self) -> bool {
        !matches!(self, Self::Callback(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::Backpressure {
            identity: "/ext/tts".into(),
            function: "tick",
        };
        let msg = err.to_string();
        assert!(msg.contains("/ext/tts"));
        assert!(msg.contains("tick"));

        let err = DispatchError::NotDispatchable {
            identity: "a".into(),
            function: "handle_message",
            state: LifecycleState::ConfigurationFailed,
        };
        assert!(err.to_string().contains("configuration_failed"));
    }

    #[test]
    fn test_identity_and_refusal() {
        assert_eq!(DispatchError::PoolClosed.identity(), None);
        assert!(DispatchError::PoolClosed.is_refusal());

        let err: DispatchError = CallbackError {
            identity: "a".into(),
            function: "tick",
            reason: "boom".into(),
            panicked: false,
        }
        .into();
        assert_eq!(err.identity(), Some("a"));
        assert!(!err.is_refusal());
        assert_eq!(err.to_string(), "a.tick failed: boom");
    }
}

//! Host lifecycle and dispatch events.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ledger::BlameAction;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something external listeners (status view, logs) may want to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Discovered {
        identity: String,
        name: String,
        enabled: bool,
    },
    Skipped {
        identity: String,
        reason: String,
    },
    Loaded {
        identity: String,
    },
    LoadFailed {
        identity: String,
        reason: String,
    },
    Configured {
        identity: String,
    },
    ConfigurationFailed {
        identity: String,
        reason: String,
    },
    AdmissionDenied {
        identity: String,
        function: String,
        action: BlameAction,
    },
    CallbackFailed {
        identity: String,
        function: String,
        reason: String,
        panicked: bool,
    },
    PoolSaturated {
        busy: usize,
        capacity: usize,
    },
    Unloaded {
        identity: String,
    },
    UnloadFailed {
        identity: String,
        reason: String,
    },
    ShutdownComplete {
        unloaded: usize,
        abandoned: usize,
    },
}

impl HostEvent {
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Discovered { identity, .. }
            | Self::Skipped { identity, .. }
            | Self::Loaded { identity }
            | Self::LoadFailed { identity, .. }
            | Self::Configured { identity }
            | Self::ConfigurationFailed { identity, .. }
            | Self::AdmissionDenied { identity, .. }
            | Self::CallbackFailed { identity, .. }
            | Self::Unloaded { identity }
            | Self::UnloadFailed { identity, .. } => Some(identity),
            Self::PoolSaturated { .. } | Self::ShutdownComplete { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed { .. }
                | Self::ConfigurationFailed { .. }
                | Self::CallbackFailed { .. }
                | Self::UnloadFailed { .. }
        )
    }
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered {
                name,
                enabled,
                identity,
            } => {
                let status = if *enabled { "enabled" } else { "disabled" };
                write!(f, "found extension {name} ({status}) at {identity}")
            }
            Self::Skipped { identity, reason } => write!(f, "skipped {identity}: {reason}"),
            Self::Loaded { identity } => write!(f, "loaded {identity}"),
            Self::LoadFailed { identity, reason } => {
                write!(f, "failed to load {identity}: {reason}")
            }
            Self::Configured { identity } => write!(f, "configured {identity}"),
            Self::ConfigurationFailed { identity, reason } => {
                write!(f, "failed to configure {identity}: {reason}")
            }
            Self::AdmissionDenied {
                identity,
                function,
                action,
            } => write!(f, "{identity} at blame ceiling, {function} handled by {action}"),
            Self::CallbackFailed {
                identity,
                function,
                reason,
                panicked,
            } => {
                let verb = if *panicked { "panicked" } else { "failed" };
                write!(f, "{identity}.{function} {verb}: {reason}")
            }
            Self::PoolSaturated { busy, capacity } => {
                write!(f, "worker pool saturated ({busy}/{capacity} busy)")
            }
            Self::Unloaded { identity } => write!(f, "unloaded {identity}"),
            Self::UnloadFailed { identity, reason } => {
                write!(f, "failed to unload {identity}: {reason}")
            }
            Self::ShutdownComplete {
                unloaded,
                abandoned,
            } => write!(
                f,
                "shutdown complete: {unloaded} unloaded, {abandoned} calls abandoned"
            ),
        }
    }
}

/// Fan-out channel for [`HostEvent`]s. Publishing never blocks; slow
/// subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HostEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: HostEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let delivered = bus.publish(HostEvent::Loaded {
            identity: "/ext/votes".into(),
        });
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.identity(), Some("/ext/votes"));
        assert_eq!(event.to_string(), "loaded /ext/votes");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(
            bus.publish(HostEvent::PoolSaturated {
                busy: 2,
                capacity: 2
            }),
            0
        );
    }

    #[test]
    fn test_serialized_tag() {
        let event = HostEvent::AdmissionDenied {
            identity: "a".into(),
            function: "tick".into(),
            action: BlameAction::Discard,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "admission_denied");
        assert_eq!(json["action"], "discard");
        assert_eq!(
            event.to_string(),
            "a at blame ceiling, tick handled by discard"
        );
    }

    #[test]
    fn test_display_callback_failure() {
        let event = HostEvent::CallbackFailed {
            identity: "a".into(),
            function: "tick".into(),
            reason: "boom".into(),
            panicked: true,
        };
        assert!(event.is_failure());
        assert_eq!(event.to_string(), "a.tick panicked: boom");
    }
}

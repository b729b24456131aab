//! Extension lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::extension::ExtensionCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    InstantiationFailed,
    Loaded,
    ConfigurationFailed,
    Configured,
    Running,
    Unloaded,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::InstantiationFailed => "instantiation_failed",
            Self::Loaded => "loaded",
            Self::ConfigurationFailed => "configuration_failed",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Unloaded => "unloaded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InstantiationFailed | Self::Unloaded)
    }

    /// Eligible for message, tick and notify dispatch.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Configured | Self::Running)
    }

    /// Whether a call of this kind may be submitted in this state.
    /// `configure` is additionally accepted right after load.
    pub fn accepts(&self, call: &ExtensionCall) -> bool {
        if call.is_lifecycle() {
            matches!(self, Self::Loaded | Self::Configured | Self::Running)
        } else {
            self.is_dispatchable()
        }
    }

    /// Holds a live instance that must see `unload` exactly once.
    pub fn needs_unload(&self) -> bool {
        matches!(
            self,
            Self::Loaded | Self::Configured | Self::Running | Self::ConfigurationFailed
        )
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Discovered, Loaded | InstantiationFailed) => true,
            (Loaded, Configured | ConfigurationFailed | Unloaded) => true,
            (Configured, Configured | Running | ConfigurationFailed | Unloaded) => true,
            (Running, Running | ConfigurationFailed | Unloaded) => true,
            (ConfigurationFailed, Unloaded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

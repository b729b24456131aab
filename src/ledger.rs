//! Per-extension blame accounting and admission control.
//!
//! Blame counts the calls an extension has queued or running. Once it reaches
//! `max_blame`, further calls are dropped, buffered or let through depending
//! on the configured [`BlameAction`].

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::extension::ExtensionCall;

/// What to do with a call that arrives while its extension is at the blame ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlameAction {
    /// Drop the call.
    Discard,
    /// Keep the call and run it when a slot frees up, oldest first.
    Buffer,
    /// Run the call anyway and let blame exceed the ceiling.
    #[default]
    FailOpen,
}

impl BlameAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discard => "discard",
            Self::Buffer => "buffer",
            Self::FailOpen => "fail_open",
        }
    }

    /// Parses a configured value, falling back to [`BlameAction::FailOpen`].
    pub fn from_config(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(
                value = %value,
                "Unrecognized blame action, using fail_open"
            );
            Self::FailOpen
        })
    }
}

impl FromStr for BlameAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "buffer" => Ok(Self::Buffer),
            "fail_open" => Ok(Self::FailOpen),
            other => Err(format!("unknown blame action '{other}'")),
        }
    }
}

impl fmt::Display for BlameAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`BlameLedger::admit`].
#[derive(Debug)]
pub enum Admission {
    /// Under the ceiling; the caller must submit the call.
    Admitted(ExtensionCall),
    /// At the ceiling under `fail_open`; the caller must submit the call.
    Overdrawn(ExtensionCall),
    /// At the ceiling under `discard`; the call was dropped.
    Discarded,
    /// At the ceiling under `buffer`; the call waits in the deferred buffer.
    Deferred { pending: usize },
}

/// Outcome of [`BlameLedger::release`].
#[derive(Debug)]
pub enum Release {
    Idle,
    /// The freed slot was handed to this buffered call; the caller must run it.
    Replay(ExtensionCall),
}

#[derive(Debug, Default)]
struct BlameSlot {
    blame: u32,
    deferred: VecDeque<ExtensionCall>,
}

#[derive(Debug)]
pub struct BlameLedger {
    max_blame: u32,
    action: BlameAction,
    slots: DashMap<String, BlameSlot>,
}

impl BlameLedger {
    pub fn new(max_blame: u32, action: BlameAction) -> Self {
        Self {
            max_blame: max_blame.max(1),
            action,
            slots: DashMap::new(),
        }
    }

    pub fn max_blame(&self) -> u32 {
        self.max_blame
    }

    pub fn action(&self) -> BlameAction {
        self.action
    }

    pub fn admit(&self, identity: &str, call: ExtensionCall) -> Admission {
        let mut slot = self.slots.entry(identity.to_string()).or_default();

        if slot.blame < self.max_blame {
            slot.blame += 1;
            return Admission::Admitted(call);
        }

        match self.action {
            BlameAction::Discard => {
                drop(slot);
                tracing::warn!(
                    extension = %identity,
                    function = call.function(),
                    max_blame = self.max_blame,
                    "Extension at blame ceiling, call discarded"
                );
                Admission::Discarded
            }
            BlameAction::Buffer => {
                slot.deferred.push_back(call);
                let pending = slot.deferred.len();
                drop(slot);
                tracing::debug!(extension = %identity, pending, "Call deferred");
                Admission::Deferred { pending }
            }
            BlameAction::FailOpen => {
                slot.blame += 1;
                let blame = slot.blame;
                drop(slot);
                tracing::warn!(
                    extension = %identity,
                    function = call.function(),
                    blame,
                    max_blame = self.max_blame,
                    "Extension over blame ceiling, dispatching anyway"
                );
                Admission::Overdrawn(call)
            }
        }
    }

    /// Credits back one completed call.
    ///
    /// Under `buffer`, a waiting call takes over the freed slot and blame stays
    /// unchanged. Otherwise blame drops by one, never below zero.
    pub fn release(&self, identity: &str) -> Release {
        let Some(mut slot) = self.slots.get_mut(identity) else {
            return Release::Idle;
        };

        if self.action == BlameAction::Buffer {
            if let Some(call) = slot.deferred.pop_front() {
                return Release::Replay(call);
            }
        }

        slot.blame = slot.blame.saturating_sub(1);
        Release::Idle
    }

    pub fn blame(&self, identity: &str) -> u32 {
        self.slots.get(identity).map(|s| s.blame).unwrap_or(0)
    }

    pub fn pending(&self, identity: &str) -> usize {
        self.slots.get(identity).map(|s| s.deferred.len()).unwrap_or(0)
    }

    /// Drops all state for an identity. Returns the number of buffered calls lost.
    pub fn forget(&self, identity: &str) -> usize {
        self.slots
            .remove(identity)
            .map(|(_, slot)| slot.deferred.len())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

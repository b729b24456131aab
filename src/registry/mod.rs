//! Registry of loaded extensions and their lifecycle state.
//!
//! Reads are lock-free snapshots; every mutation goes through the host.

mod gate;
mod state;

pub use gate::{CallGate, GatePass};
pub use state::LifecycleState;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::extension::Extension;
use crate::loader::ExtensionDescriptor;
use crate::{Error, Result};

/// Snapshot of one registry entry.
#[derive(Clone)]
pub struct RegistryEntry {
    pub descriptor: Arc<ExtensionDescriptor>,
    pub instance: Option<Arc<dyn Extension>>,
    pub state: LifecycleState,
    pub(crate) gate: Arc<CallGate>,
    pub(crate) serial: Arc<Mutex<()>>,
}

impl RegistryEntry {
    fn new(descriptor: Arc<ExtensionDescriptor>) -> Self {
        Self {
            descriptor,
            instance: None,
            state: LifecycleState::Discovered,
            gate: Arc::new(CallGate::new()),
            serial: Arc::new(Mutex::new(())),
        }
    }

    pub fn identity(&self) -> &str {
        &self.descriptor.identity
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("identity", &self.descriptor.identity)
            .field("name", &self.descriptor.name)
            .field("state", &self.state)
            .field("has_instance", &self.instance.is_some())
            .field("in_flight", &self.gate.in_flight())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: DashMap<String, RegistryEntry>,
    names: DashMap<String, String>,
    closed: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor in the `Discovered` state.
    pub(crate) fn register(&self, descriptor: Arc<ExtensionDescriptor>) -> Result<()> {
        let identity = descriptor.identity.clone();
        let name = descriptor.name.clone();

        match self.names.entry(name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get() == &identity {
                    return Err(Error::DuplicateExtension { identity });
                }
                return Err(Error::DuplicateName {
                    name,
                    first: existing.get().clone(),
                    second: identity,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(identity.clone());
            }
        }

        match self.entries.entry(identity.clone()) {
            Entry::Occupied(_) => {
                self.names.remove(&name);
                Err(Error::DuplicateExtension { identity })
            }
            Entry::Vacant(slot) => {
                slot.insert(RegistryEntry::new(descriptor));
                Ok(())
            }
        }
    }

    /// Stores the live instance and moves the entry to `Loaded`.
    ///
    /// Fails with [`Error::ShutDown`] once [`Registry::close`] has been called.
    /// The flag is read under the entry lock, so a [`Registry::states`]
    /// snapshot taken after `close` either sees the entry `Loaded` or the
    /// attach fails.
    pub(crate) fn attach(&self, identity: &str, instance: Arc<dyn Extension>) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(identity)
            .ok_or_else(|| Error::UnknownExtension(identity.to_string()))?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        Self::check_transition(&entry, LifecycleState::Loaded)?;
        entry.instance = Some(instance);
        entry.state = LifecycleState::Loaded;
        Ok(())
    }

    /// Applies a transition allowed by the lifecycle table. Returns the previous state.
    pub(crate) fn transition(&self, identity: &str, to: LifecycleState) -> Result<LifecycleState> {
        let mut entry = self
            .entries
            .get_mut(identity)
            .ok_or_else(|| Error::UnknownExtension(identity.to_string()))?;
        Self::check_transition(&entry, to)?;
        let from = entry.state;
        entry.state = to;
        if to == LifecycleState::Unloaded {
            entry.instance = None;
        }
        tracing::debug!(extension = %identity, from = %from, to = %to, "Lifecycle transition");
        Ok(from)
    }

    /// `Configured` becomes `Running` on first event dispatch. Returns true on change.
    pub(crate) fn mark_running(&self, identity: &str) -> bool {
        match self.entries.get_mut(identity) {
            Some(mut entry) if entry.state == LifecycleState::Configured => {
                entry.state = LifecycleState::Running;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove(&self, identity: &str) -> Option<RegistryEntry> {
        let (_, entry) = self.entries.remove(identity)?;
        self.names
            .remove_if(&entry.descriptor.name, |_, id| id == identity);
        Some(entry)
    }

    /// Refuses further attaches.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
        self.names.clear();
    }

    fn check_transition(entry: &RegistryEntry, to: LifecycleState) -> Result<()> {
        if entry.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                identity: entry.descriptor.identity.clone(),
                from: entry.state,
                to,
            })
        }
    }

    pub fn lookup(&self, identity: &str) -> Option<RegistryEntry> {
        self.entries.get(identity).map(|e| e.value().clone())
    }

    /// Finds an entry by identity, falling back to its display name.
    pub fn resolve(&self, name_or_identity: &str) -> Option<RegistryEntry> {
        self.lookup(name_or_identity).or_else(|| {
            let identity = self.names.get(name_or_identity)?.value().clone();
            self.lookup(&identity)
        })
    }

    pub fn state(&self, identity: &str) -> Option<LifecycleState> {
        self.entries.get(identity).map(|e| e.state)
    }

    /// All identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Identities currently eligible for event dispatch, sorted.
    pub fn dispatchable(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.state.is_dispatchable())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn states(&self) -> Vec<(String, LifecycleState)> {
        let mut states: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

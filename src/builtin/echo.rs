//! Records what the host sends it. Handy as a display sink and in tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use crate::extension::{
    ChatMessage, Extension, ExtensionContext, ExtensionError, ExtensionResult, Notifier, Settings,
    SettingsExt,
};

#[derive(Debug, Default)]
struct EchoState {
    prefix: Option<String>,
    relay_to: Option<String>,
    notifier: Option<Notifier>,
    lines: Vec<String>,
    notifications: Vec<(Option<String>, Value)>,
}

/// Keeps every message as `"[author]: text"`, optionally only those starting
/// with `prefix`, and forwards each kept line to `relay_to` when set.
#[derive(Debug, Default)]
pub struct EchoExtension {
    state: Mutex<EchoState>,
    ticks: AtomicU64,
    unloaded: AtomicBool,
}

impl EchoExtension {
    pub const TYPE_NAME: &'static str = "echo";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    pub fn notifications(&self) -> Vec<(Option<String>, Value)> {
        self.lock().notifications.clone()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, EchoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn optional(settings: &Settings, key: &str) -> ExtensionResult<Option<String>> {
        match settings.require_str(key) {
            Ok(value) => Ok(Some(value.to_string())),
            Err(ExtensionError::MissingSetting { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Extension for EchoExtension {
    fn load(&self, ctx: &ExtensionContext) -> ExtensionResult<()> {
        self.lock().notifier = Some(ctx.notifier().clone());
        Ok(())
    }

    fn configure(&self, settings: &Settings) -> ExtensionResult<()> {
        let prefix = Self::optional(settings, "prefix")?;
        let relay_to = Self::optional(settings, "relay_to")?;
        let mut state = self.lock();
        state.prefix = prefix;
        state.relay_to = relay_to;
        Ok(())
    }

    fn handle_message(&self, message: &ChatMessage) -> ExtensionResult<()> {
        let line = message.display_line();
        let relay = {
            let mut state = self.lock();
            if let Some(prefix) = &state.prefix {
                if !message.text.starts_with(prefix.as_str()) {
                    return Ok(());
                }
            }
            state.lines.push(line.clone());
            state.relay_to.clone().zip(state.notifier.clone())
        };

        if let Some((target, notifier)) = relay {
            notifier.notify(&target, json!({ "line": line }))?;
        }
        Ok(())
    }

    fn handle_notify(&self, source: Option<&str>, data: &Value) -> ExtensionResult<()> {
        self.lock()
            .notifications
            .push((source.map(str::to_string), data.clone()));
        Ok(())
    }

    fn tick(&self, _timestamp_nanos: i64, _interval_nanos: i64) -> ExtensionResult<()> {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn unload(&self) -> ExtensionResult<()> {
        self.lock().notifier = None;
        self.unloaded.store(true, Ordering::Release);
        Ok(())
    }
}

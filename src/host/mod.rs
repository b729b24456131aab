//! Lifecycle coordination for every loaded extension.
//!
//! [`ExtensionHost`] owns the registry, the blame ledger and the dispatcher.
//! It moves extensions through their lifecycle, fans chat events out to the
//! dispatchable ones and tears everything down in [`ExtensionHost::shutdown`].

mod builder;

pub use builder::HostBuilder;

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{EnablementProvider, HostConfig};
use crate::dispatch::{DispatchError, Dispatcher, Submitted};
use crate::extension::{
    ChatMessage, Extension, ExtensionCall, ExtensionContext, Notifier, Settings, panic_message,
};
use crate::ledger::BlameLedger;
use crate::loader::{ExtensionDescriptor, ExtensionDiscovery, LoadError, Loader};
use crate::observability::{DispatchMetrics, EventBus, HostEvent};
use crate::registry::{LifecycleState, Registry};
use crate::{Error, Result};

/// Outcome of [`ExtensionHost::load_directory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub discovered: usize,
    /// Reached `Loaded`, whether or not `configure` succeeded afterwards.
    pub loaded: usize,
    pub configured: usize,
    pub failed: usize,
    /// Disabled by configuration.
    pub skipped: usize,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub targets: usize,
    pub submitted: usize,
    pub deferred: usize,
    pub rejected: usize,
}

/// Outcome of [`ExtensionHost::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub unloaded: usize,
    /// Identities whose `unload` returned an error or panicked.
    pub failed: Vec<String>,
    /// Pool jobs still outstanding when the grace period ran out.
    pub abandoned: usize,
    pub drained: bool,
}

#[derive(Debug)]
struct HostInner {
    config: HostConfig,
    loader: Loader,
    registry: Arc<Registry>,
    ledger: Arc<BlameLedger>,
    dispatcher: Dispatcher,
    events: EventBus,
    metrics: Arc<DispatchMetrics>,
    cancel: CancellationToken,
    shutdown_report: Mutex<Option<ShutdownReport>>,
}

/// Cheaply cloneable handle to a running extension host.
#[derive(Debug, Clone)]
pub struct ExtensionHost {
    inner: Arc<HostInner>,
}

impl ExtensionHost {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &BlameLedger {
        &self.inner.ledger
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.inner.metrics
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn state(&self, name_or_identity: &str) -> Option<LifecycleState> {
        self.inner
            .registry
            .resolve(name_or_identity)
            .map(|entry| entry.state)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Loads every unit under the configured extensions directory.
    pub async fn load_extensions(&self) -> LoadSummary {
        match self.inner.config.resolved_extensions_dir() {
            Some(dir) => self.load_directory(dir).await,
            None => {
                tracing::warn!("No extensions directory configured or available");
                LoadSummary::default()
            }
        }
    }

    /// Discovers, loads and configures every unit in `dir`.
    ///
    /// Discovery failures are logged and yield an empty summary.
    pub async fn load_directory(&self, dir: impl AsRef<Path>) -> LoadSummary {
        let dir = dir.as_ref();
        let descriptors = match ExtensionDiscovery::discover(dir, &self.inner.config) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Extension discovery failed");
                return LoadSummary::default();
            }
        };

        let mut summary = LoadSummary {
            discovered: descriptors.len(),
            ..Default::default()
        };
        for descriptor in descriptors {
            let enabled = descriptor.enabled;
            match self.load_descriptor(descriptor).await {
                Some(LifecycleState::Configured | LifecycleState::Running) => {
                    summary.loaded += 1;
                    summary.configured += 1;
                }
                Some(LifecycleState::ConfigurationFailed) => {
                    summary.loaded += 1;
                    summary.failed += 1;
                }
                Some(_) => summary.failed += 1,
                None if !enabled => summary.skipped += 1,
                None => summary.failed += 1,
            }
        }

        tracing::info!(
            dir = %dir.display(),
            discovered = summary.discovered,
            configured = summary.configured,
            failed = summary.failed,
            skipped = summary.skipped,
            "Extension directory loaded"
        );
        summary
    }

    /// Runs one discovered unit through load and configure.
    ///
    /// Returns the state it settled in, or `None` when it was disabled,
    /// clashed with an existing entry or the host is shut down.
    pub async fn load_descriptor(&self, descriptor: ExtensionDescriptor) -> Option<LifecycleState> {
        self.inner.events.publish(HostEvent::Discovered {
            identity: descriptor.identity.clone(),
            name: descriptor.name.clone(),
            enabled: descriptor.enabled,
        });
        if !descriptor.enabled {
            self.skip(&descriptor.identity, "disabled by configuration");
            return None;
        }

        let identity = descriptor.identity.clone();
        match self.load_unit(descriptor, None, None).await {
            Ok(state) => Some(state),
            Err(Error::Load(_)) => Some(LifecycleState::InstantiationFailed),
            Err(Error::ConfigurationFailed { .. }) => Some(LifecycleState::ConfigurationFailed),
            Err(e) => {
                tracing::warn!(extension = %identity, error = %e, "Extension not registered");
                self.skip(&identity, &e.to_string());
                None
            }
        }
    }

    /// Registers an extension constructed in-process under `inproc:<name>`
    /// and runs it through the same lifecycle as a discovered unit.
    pub async fn install(
        &self,
        name: &str,
        instance: Arc<dyn Extension>,
        settings: Settings,
    ) -> Result<LifecycleState> {
        let mut descriptor = ExtensionDescriptor::in_process(name);
        descriptor.enabled = self.inner.config.is_enabled(name, &descriptor.identity);
        self.inner.events.publish(HostEvent::Discovered {
            identity: descriptor.identity.clone(),
            name: descriptor.name.clone(),
            enabled: descriptor.enabled,
        });
        if !descriptor.enabled {
            self.skip(&descriptor.identity, "disabled by configuration");
            return Err(LoadError::Disabled {
                identity: descriptor.identity,
            }
            .into());
        }
        self.load_unit(descriptor, Some(instance), Some(settings))
            .await
    }

    /// Re-runs `configure` on a `Configured` or `Running` extension.
    ///
    /// The state is kept on success; a failure moves the extension to
    /// `ConfigurationFailed`.
    pub async fn reconfigure(
        &self,
        name_or_identity: &str,
        settings: Settings,
    ) -> Result<LifecycleState> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let entry = self
            .inner
            .registry
            .resolve(name_or_identity)
            .ok_or_else(|| Error::UnknownExtension(name_or_identity.to_string()))?;
        if !entry.state.is_dispatchable() {
            return Err(Error::InvalidTransition {
                identity: entry.identity().to_string(),
                from: entry.state,
                to: LifecycleState::Configured,
            });
        }
        self.configure_entry(entry.identity(), settings).await
    }

    /// Sends a chat message to every dispatchable extension.
    pub fn broadcast_message(&self, message: ChatMessage) -> BroadcastReport {
        let targets = self.inner.registry.dispatchable();
        self.fan_out(&targets, ExtensionCall::message(message))
    }

    pub fn tick(&self, timestamp_nanos: i64, interval_nanos: i64) -> BroadcastReport {
        let targets = self.inner.registry.dispatchable();
        self.fan_out(&targets, ExtensionCall::tick(timestamp_nanos, interval_nanos))
    }

    /// Ticks with the current wall clock and the configured interval.
    pub fn tick_now(&self) -> BroadcastReport {
        self.tick(now_nanos(), duration_nanos(self.inner.config.tick_interval))
    }

    /// Host-originated notification to one extension, by name or identity.
    pub fn notify(&self, target: &str, data: Value) -> BroadcastReport {
        let call = ExtensionCall::notify(None, data);
        match self.inner.registry.resolve(target) {
            Some(entry) => self.fan_out(&[entry.identity().to_string()], call),
            None => {
                tracing::debug!(target, "Notification target not registered");
                BroadcastReport {
                    targets: 1,
                    rejected: 1,
                    ..Default::default()
                }
            }
        }
    }

    pub fn notify_all(&self, data: Value) -> BroadcastReport {
        let targets = self.inner.registry.dispatchable();
        self.fan_out(&targets, ExtensionCall::notify(None, data))
    }

    /// Ticks every `interval` until shutdown begins.
    pub fn spawn_ticker(&self, interval: Duration) -> JoinHandle<()> {
        let host = self.clone();
        let token = self.inner.cancel.clone();
        let interval_nanos = duration_nanos(interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        host.tick(now_nanos(), interval_nanos);
                    }
                }
            }
            tracing::debug!("Ticker stopped");
        })
    }

    /// Waits until the pool has no queued or running jobs. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.dispatcher.pool().wait_idle(timeout).await
    }

    /// Unloads every extension and stops the pool. Later calls return the
    /// first report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut guard = self.inner.shutdown_report.lock().await;
        if let Some(report) = guard.as_ref() {
            return report.clone();
        }

        self.inner.cancel.cancel();
        self.inner.registry.close();
        tracing::info!("Extension host shutting down");

        let grace = self.inner.config.shutdown_grace;
        let mut report = ShutdownReport::default();
        for (identity, state) in self.inner.registry.states() {
            if !state.needs_unload() {
                continue;
            }
            match self.unload_entry(&identity, grace).await {
                Ok(()) => report.unloaded += 1,
                Err(_) => report.failed.push(identity),
            }
        }

        let pool = self.inner.dispatcher.pool().shutdown(grace).await;
        report.drained = pool.drained;
        report.abandoned = pool.abandoned;
        if pool.abandoned > 0 {
            tracing::warn!(abandoned = pool.abandoned, "Pool jobs abandoned at shutdown");
        }

        self.inner.ledger.clear();
        self.inner.registry.clear();
        self.inner.events.publish(HostEvent::ShutdownComplete {
            unloaded: report.unloaded,
            abandoned: report.abandoned,
        });
        tracing::info!(
            unloaded = report.unloaded,
            failed = report.failed.len(),
            abandoned = report.abandoned,
            "Extension host shut down"
        );

        *guard = Some(report.clone());
        report
    }

    async fn load_unit(
        &self,
        descriptor: ExtensionDescriptor,
        instance: Option<Arc<dyn Extension>>,
        settings: Option<Settings>,
    ) -> Result<LifecycleState> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let descriptor = Arc::new(descriptor);
        let identity = descriptor.identity.clone();
        self.inner.registry.register(Arc::clone(&descriptor))?;

        let ctx = ExtensionContext::new(
            descriptor.name.clone(),
            identity.clone(),
            descriptor.config_path.clone(),
            Notifier::new(identity.clone(), &self.inner.registry),
            self.inner.cancel.clone(),
        );
        let loader = self.inner.loader.clone();
        let unit = Arc::clone(&descriptor);
        let loaded = tokio::task::spawn_blocking(move || match instance {
            Some(instance) => Loader::initialize(&unit, instance, &ctx),
            None => loader.load(&unit, &ctx),
        })
        .await
        .unwrap_or_else(|e| {
            Err(LoadError::InstantiationFailed {
                identity: identity.clone(),
                reason: e.to_string(),
            })
        });

        let instance = match loaded {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(extension = %identity, error = %e, "Extension failed to load");
                self.inner
                    .registry
                    .transition(&identity, LifecycleState::InstantiationFailed)?;
                self.inner.events.publish(HostEvent::LoadFailed {
                    identity: identity.clone(),
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .inner
            .registry
            .attach(&identity, Arc::clone(&instance))
        {
            // Not attached: shutdown began while the unit was loading.
            self.inner.registry.remove(&identity);
            if let Ok(Err(unload)) = tokio::task::spawn_blocking(move || instance.unload()).await {
                tracing::warn!(extension = %identity, error = %unload, "Extension unload failed");
            }
            return Err(if self.is_shut_down() { Error::ShutDown } else { e });
        }
        self.inner.events.publish(HostEvent::Loaded {
            identity: identity.clone(),
        });
        tracing::info!(
            extension = %identity,
            name = %descriptor.name,
            version = descriptor.version(),
            "Extension loaded"
        );

        let settings = match settings {
            Some(settings) => settings,
            None => match read_settings(descriptor.config_path.as_deref()).await {
                Ok(settings) => settings,
                Err(reason) => return self.fail_configuration(&identity, reason),
            },
        };
        self.configure_entry(&identity, settings).await
    }

    async fn configure_entry(&self, identity: &str, settings: Settings) -> Result<LifecycleState> {
        let outcome = self
            .inner
            .dispatcher
            .call(identity, ExtensionCall::configure(settings))
            .await;

        if let Err(e) = outcome {
            let reason = match e {
                DispatchError::Callback(e) => e.reason,
                other => other.to_string(),
            };
            return self.fail_configuration(identity, reason);
        }

        let state = match self.inner.registry.state(identity) {
            Some(LifecycleState::Loaded) => {
                self.inner
                    .registry
                    .transition(identity, LifecycleState::Configured)?;
                LifecycleState::Configured
            }
            Some(state) => state,
            None => return Err(Error::UnknownExtension(identity.to_string())),
        };
        self.inner.events.publish(HostEvent::Configured {
            identity: identity.to_string(),
        });
        tracing::info!(extension = %identity, state = %state, "Extension configured");
        Ok(state)
    }

    fn fail_configuration(&self, identity: &str, reason: String) -> Result<LifecycleState> {
        tracing::warn!(extension = %identity, error = %reason, "Extension configuration failed");
        self.inner
            .registry
            .transition(identity, LifecycleState::ConfigurationFailed)?;
        self.inner.events.publish(HostEvent::ConfigurationFailed {
            identity: identity.to_string(),
            reason: reason.clone(),
        });
        Err(Error::ConfigurationFailed {
            identity: identity.to_string(),
            reason,
        })
    }

    fn fan_out(&self, targets: &[String], call: ExtensionCall) -> BroadcastReport {
        let mut report = BroadcastReport {
            targets: targets.len(),
            ..Default::default()
        };
        if self.is_shut_down() {
            report.rejected = targets.len();
            return report;
        }

        for identity in targets {
            match self.inner.dispatcher.submit(identity, call.clone()) {
                Ok(submitted) => {
                    self.inner.registry.mark_running(identity);
                    match submitted {
                        Submitted::Deferred { .. } => report.deferred += 1,
                        Submitted::Queued | Submitted::Overdrawn => report.submitted += 1,
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        extension = %identity,
                        function = call.function(),
                        error = %e,
                        "Dispatch refused"
                    );
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Closes the gate, waits for in-flight callbacks and runs `unload` once.
    async fn unload_entry(&self, identity: &str, grace: Duration) -> std::result::Result<(), String> {
        let Some(entry) = self.inner.registry.lookup(identity) else {
            return Ok(());
        };

        entry.gate.close();
        if !entry.gate.drain(grace).await {
            tracing::warn!(
                extension = %identity,
                in_flight = entry.gate.in_flight(),
                "Callbacks still running at unload"
            );
        }

        let outcome = match entry.instance.clone() {
            Some(instance) => tokio::task::spawn_blocking(move || -> std::result::Result<(), String> {
                catch_unwind(AssertUnwindSafe(|| instance.unload()))
                    .map_err(|payload| format!("panicked: {}", panic_message(payload.as_ref())))?
                    .map_err(|e| e.to_string())
            })
            .await
            .unwrap_or_else(|e| Err(e.to_string())),
            None => Ok(()),
        };

        if let Err(e) = self
            .inner
            .registry
            .transition(identity, LifecycleState::Unloaded)
        {
            tracing::warn!(extension = %identity, error = %e, "Unexpected state at unload");
        }
        self.inner.ledger.forget(identity);

        match &outcome {
            Ok(()) => {
                tracing::info!(extension = %identity, "Extension unloaded");
                self.inner.events.publish(HostEvent::Unloaded {
                    identity: identity.to_string(),
                });
            }
            Err(reason) => {
                tracing::warn!(extension = %identity, error = %reason, "Extension unload failed");
                self.inner.events.publish(HostEvent::UnloadFailed {
                    identity: identity.to_string(),
                    reason: reason.clone(),
                });
            }
        }
        outcome
    }

    fn skip(&self, identity: &str, reason: &str) {
        tracing::info!(extension = %identity, reason, "Extension skipped");
        self.inner.events.publish(HostEvent::Skipped {
            identity: identity.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Reads a unit's settings document. A missing file means empty settings.
async fn read_settings(path: Option<&Path>) -> std::result::Result<Settings, String> {
    let Some(path) = path else {
        return Ok(Settings::new());
    };
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Settings::new()),
        Err(e) => return Err(format!("cannot read {}: {e}", path.display())),
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(settings)) => Ok(settings),
        Ok(_) => Err(format!("{} must contain a JSON object", path.display())),
        Err(e) => Err(format!("invalid JSON in {}: {e}", path.display())),
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

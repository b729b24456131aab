//! Callback dispatch through the shared worker pool.
//!
//! [`Dispatcher::submit`] is fire-and-forget: admission control decides whether
//! the call runs now, waits in the deferred buffer or is dropped, and every
//! completion credits the ledger back. [`Dispatcher::call`] is the awaited
//! variant used for lifecycle calls.

mod error;
mod pool;

pub use error::{CallbackError, DispatchError};
pub use pool::{PoolShutdown, WorkerPool};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::extension::{ExtensionCall, panic_message};
use crate::ledger::{Admission, BlameAction, BlameLedger, Release};
use crate::observability::{DispatchMetrics, EventBus, HostEvent};
use crate::registry::{Registry, RegistryEntry};

/// Accepted outcome of [`Dispatcher::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    /// Queued past the blame ceiling under `fail_open`.
    Overdrawn,
    /// Held in the deferred buffer under `buffer`.
    Deferred { pending: usize },
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    registry: Arc<Registry>,
    ledger: Arc<BlameLedger>,
    events: EventBus,
    metrics: Arc<DispatchMetrics>,
    serialize_calls: bool,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        registry: Arc<Registry>,
        ledger: Arc<BlameLedger>,
        events: EventBus,
        metrics: Arc<DispatchMetrics>,
        serialize_calls: bool,
    ) -> Self {
        Self {
            pool,
            registry,
            ledger,
            events,
            metrics,
            serialize_calls,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn ledger(&self) -> &BlameLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub fn serializes_calls(&self) -> bool {
        self.serialize_calls
    }

    /// Schedules `call` on `identity` subject to admission control.
    pub fn submit(
        &self,
        identity: &str,
        call: ExtensionCall,
    ) -> Result<Submitted, DispatchError> {
        if self.pool.is_closed() {
            return Err(DispatchError::PoolClosed);
        }
        let entry = self.dispatchable_entry(identity, &call)?;
        let function = call.function();
        self.metrics.submitted.inc();

        match self.ledger.admit(identity, call) {
            Admission::Admitted(call) => {
                self.spawn(entry, call)?;
                Ok(Submitted::Queued)
            }
            Admission::Overdrawn(call) => {
                self.metrics.overdrawn.inc();
                self.spawn(entry, call)?;
                Ok(Submitted::Overdrawn)
            }
            Admission::Discarded => {
                self.metrics.discarded.inc();
                self.publish_denied(identity, function, BlameAction::Discard);
                Err(DispatchError::Backpressure {
                    identity: identity.to_string(),
                    function,
                })
            }
            Admission::Deferred { pending } => {
                self.metrics.deferred.inc();
                self.publish_denied(identity, function, BlameAction::Buffer);
                Ok(Submitted::Deferred { pending })
            }
        }
    }

    /// Runs `call` on the pool and waits for its outcome. Bypasses admission control.
    pub async fn call(&self, identity: &str, call: ExtensionCall) -> Result<(), DispatchError> {
        if self.pool.is_closed() {
            return Err(DispatchError::PoolClosed);
        }
        let entry = self.dispatchable_entry(identity, &call)?;
        self.metrics.submitted.inc();

        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        self.pool.execute(move || {
            let _ = tx.send(this.invoke(&entry, &call));
        })?;

        rx.await.unwrap_or(Err(DispatchError::PoolClosed))
    }

    fn dispatchable_entry(
        &self,
        identity: &str,
        call: &ExtensionCall,
    ) -> Result<RegistryEntry, DispatchError> {
        let entry =
            self.registry
                .lookup(identity)
                .ok_or_else(|| DispatchError::UnknownExtension {
                    identity: identity.to_string(),
                })?;
        if !entry.state.accepts(call) {
            return Err(DispatchError::NotDispatchable {
                identity: identity.to_string(),
                function: call.function(),
                state: entry.state,
            });
        }
        Ok(entry)
    }

    fn spawn(&self, entry: RegistryEntry, call: ExtensionCall) -> Result<(), DispatchError> {
        let this = self.clone();
        let identity = entry.identity().to_string();
        let spawned = self.pool.execute(move || {
            let _ = this.invoke(&entry, &call);
            this.complete(&entry);
        });
        if spawned.is_err() {
            self.ledger.release(&identity);
        }
        spawned
    }

    /// Credits the finished call back and hands a freed slot to the next buffered call.
    fn complete(&self, entry: &RegistryEntry) {
        let identity = entry.identity();
        loop {
            let Release::Replay(call) = self.ledger.release(identity) else {
                return;
            };

            let current = self.registry.lookup(identity);
            let runnable = current
                .as_ref()
                .is_some_and(|e| e.state.accepts(&call) && !e.gate.is_closed());
            if runnable {
                if let Some(current) = current {
                    let this = self.clone();
                    let function = call.function();
                    if self
                        .pool
                        .execute(move || {
                            let _ = this.invoke(&current, &call);
                            this.complete(&current);
                        })
                        .is_ok()
                    {
                        self.metrics.replayed.inc();
                        tracing::debug!(extension = %identity, function, "Replaying deferred call");
                        return;
                    }
                }
            }
            tracing::debug!(extension = %identity, "Dropping deferred call that can no longer run");
        }
    }

    /// Runs one callback on the current thread with failure containment.
    fn invoke(&self, entry: &RegistryEntry, call: &ExtensionCall) -> Result<(), DispatchError> {
        let identity = entry.identity();
        let function = call.function();

        let state = self.registry.state(identity).unwrap_or(entry.state);
        if !state.accepts(call) {
            tracing::debug!(extension = %identity, function, state = %state, "Skipping call");
            return Err(DispatchError::NotDispatchable {
                identity: identity.to_string(),
                function,
                state,
            });
        }

        let (Some(instance), Some(_pass)) = (entry.instance.as_ref(), entry.gate.enter()) else {
            return Err(DispatchError::Unloading {
                identity: identity.to_string(),
            });
        };

        let _serial = self
            .serialize_calls
            .then(|| entry.serial.lock().unwrap_or_else(PoisonError::into_inner));

        self.metrics.record_start();
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| call.invoke(instance.as_ref())));
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (reason, panicked) = match outcome {
            Ok(Ok(())) => {
                self.metrics.record_end(true, latency_ms);
                return Ok(());
            }
            Ok(Err(e)) => (e.to_string(), false),
            Err(payload) => (panic_message(payload.as_ref()), true),
        };
        self.metrics.record_end(false, latency_ms);

        tracing::warn!(
            extension = %identity,
            function,
            panicked,
            error = %reason,
            "Extension callback failed"
        );
        self.events.publish(HostEvent::CallbackFailed {
            identity: identity.to_string(),
            function: function.to_string(),
            reason: reason.clone(),
            panicked,
        });

        Err(CallbackError {
            identity: identity.to_string(),
            function,
            reason,
            panicked,
        }
        .into())
    }

    fn publish_denied(&self, identity: &str, function: &str, action: BlameAction) {
        self.events.publish(HostEvent::AdmissionDenied {
            identity: identity.to_string(),
            function: function.to_string(),
            action,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{
        ChatMessage, Extension, ExtensionContext, ExtensionError, ExtensionResult, Settings,
    };
    use crate::loader::ExtensionDescriptor;
    use crate::registry::LifecycleState;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        ticks: Mutex<Vec<i64>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        delay_ms: u64,
        fail: bool,
    }

    impl Extension for Recorder {
        fn load(&self, _ctx: &ExtensionContext) -> ExtensionResult<()> {
            Ok(())
        }
        fn configure(&self, settings: &Settings) -> ExtensionResult<()> {
            if settings.contains_key("reject") {
                return Err(ExtensionError::msg("rejected"));
            }
            Ok(())
        }
        fn handle_message(&self, _message: &ChatMessage) -> ExtensionResult<()> {
            Ok(())
        }
        fn handle_notify(&self, _source: Option<&str>, _data: &Value) -> ExtensionResult<()> {
            Ok(())
        }
        fn tick(&self, timestamp_nanos: i64, _interval_nanos: i64) -> ExtensionResult<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(self.delay_ms));
            self.ticks.lock().unwrap().push(timestamp_nanos);
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                panic!("tick exploded");
            }
            Ok(())
        }
        fn unload(&self) -> ExtensionResult<()> {
            Ok(())
        }
    }

    fn dispatcher(workers: usize, max_blame: u32, action: BlameAction) -> Dispatcher {
        let events = EventBus::default();
        let metrics = Arc::new(DispatchMetrics::new());
        let pool = WorkerPool::new(workers, events.clone(), metrics.clone()).unwrap();
        Dispatcher::new(
            Arc::new(pool),
            Arc::new(Registry::new()),
            Arc::new(BlameLedger::new(max_blame, action)),
            events,
            metrics,
            false,
        )
    }

    fn install(dispatcher: &Dispatcher, name: &str, recorder: Arc<Recorder>) -> String {
        let descriptor = ExtensionDescriptor::in_process(name);
        let identity = descriptor.identity.clone();
        let registry = &dispatcher.registry;
        registry.register(Arc::new(descriptor)).unwrap();
        registry.attach(&identity, recorder).unwrap();
        registry
            .transition(&identity, LifecycleState::Configured)
            .unwrap();
        identity
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_buffer_replays_in_order() {
        let dispatcher = dispatcher(2, 1, BlameAction::Buffer);
        let recorder = Arc::new(Recorder {
            delay_ms: 30,
            ..Default::default()
        });
        let id = install(&dispatcher, "a", recorder.clone());

        assert_eq!(
            dispatcher.submit(&id, ExtensionCall::tick(1, 1)).unwrap(),
            Submitted::Queued
        );
        for n in 2..=4 {
            assert!(matches!(
                dispatcher.submit(&id, ExtensionCall::tick(n, 1)).unwrap(),
                Submitted::Deferred { .. }
            ));
        }

        assert!(dispatcher.pool().wait_idle(Duration::from_secs(5)).await);
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.ledger().blame(&id), 0);
        assert_eq!(dispatcher.metrics().snapshot().replayed, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_discard_drops_excess() {
        let dispatcher = dispatcher(2, 1, BlameAction::Discard);
        let recorder = Arc::new(Recorder {
            delay_ms: 50,
            ..Default::default()
        });
        let id = install(&dispatcher, "a", recorder.clone());

        dispatcher.submit(&id, ExtensionCall::tick(1, 1)).unwrap();
        let err = dispatcher
            .submit(&id, ExtensionCall::tick(2, 1))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Backpressure { .. }));

        assert!(dispatcher.pool().wait_idle(Duration::from_secs(5)).await);
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![1]);
        assert_eq!(dispatcher.metrics().snapshot().discarded, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panic_releases_blame() {
        let dispatcher = dispatcher(1, 1, BlameAction::Discard);
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let id = install(&dispatcher, "a", recorder.clone());
        let mut events = dispatcher.events.subscribe();

        dispatcher.submit(&id, ExtensionCall::tick(1, 1)).unwrap();
        assert!(dispatcher.pool().wait_idle(Duration::from_secs(5)).await);
        assert_eq!(dispatcher.ledger().blame(&id), 0);

        loop {
            if let HostEvent::CallbackFailed {
                function, panicked, ..
            } = events.recv().await.unwrap()
            {
                assert_eq!(function, "tick");
                assert!(panicked);
                break;
            }
        }

        dispatcher.submit(&id, ExtensionCall::tick(2, 1)).unwrap();
        assert!(dispatcher.pool().wait_idle(Duration::from_secs(5)).await);
        assert_eq!(recorder.ticks.lock().unwrap().len(), 2);
        assert_eq!(dispatcher.metrics().snapshot().failed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rejects_unknown_and_undispatchable() {
        let dispatcher = dispatcher(1, 1, BlameAction::Discard);
        assert!(matches!(
            dispatcher.submit("missing", ExtensionCall::tick(1, 1)),
            Err(DispatchError::UnknownExtension { .. })
        ));

        let descriptor = ExtensionDescriptor::in_process("loaded");
        dispatcher
            .registry
            .register(Arc::new(descriptor))
            .unwrap();
        dispatcher
            .registry
            .attach("inproc:loaded", Arc::new(Recorder::default()))
            .unwrap();
        assert!(matches!(
            dispatcher.submit("inproc:loaded", ExtensionCall::tick(1, 1)),
            Err(DispatchError::NotDispatchable { .. })
        ));
        assert_eq!(dispatcher.ledger().blame("inproc:loaded"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_call_returns_outcome() {
        let dispatcher = dispatcher(1, 1, BlameAction::Discard);
        let id = install(&dispatcher, "a", Arc::new(Recorder::default()));

        dispatcher
            .call(&id, ExtensionCall::configure(Settings::new()))
            .await
            .unwrap();

        let mut settings = Settings::new();
        settings.insert("reject".into(), Value::Bool(true));
        let err = dispatcher
            .call(&id, ExtensionCall::configure(settings))
            .await
            .unwrap_err();
        match err {
            DispatchError::Callback(e) => {
                assert_eq!(e.function, "configure");
                assert!(!e.panicked);
                assert!(e.reason.contains("rejected"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(dispatcher.ledger().blame(&id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_gate_skips_call() {
        let dispatcher = dispatcher(1, 1, BlameAction::Discard);
        let recorder = Arc::new(Recorder::default());
        let id = install(&dispatcher, "a", recorder.clone());

        dispatcher.registry.lookup(&id).unwrap().gate.close();
        dispatcher.submit(&id, ExtensionCall::tick(1, 1)).unwrap();
        assert!(dispatcher.pool().wait_idle(Duration::from_secs(5)).await);
        assert!(recorder.ticks.lock().unwrap().is_empty());
        assert_eq!(dispatcher.ledger().blame(&id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_after_pool_shutdown() {
        let dispatcher = dispatcher(1, 1, BlameAction::Discard);
        let id = install(&dispatcher, "a", Arc::new(Recorder::default()));
        dispatcher.pool().shutdown(Duration::from_secs(1)).await;
        assert!(matches!(
            dispatcher.submit(&id, ExtensionCall::tick(1, 1)),
            Err(DispatchError::PoolClosed)
        ));
    }
}

//! Admission control across extensions sharing one worker pool.
//!
//! Run: cargo nextest run --test backpressure_tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use overlay_ext::prelude::*;
use serde_json::Value;

/// Sleeps in every event callback and records its peak concurrency.
/// Callbacks that start after `unload` are counted separately.
#[derive(Default)]
struct Slow {
    delay_ms: u64,
    running: AtomicUsize,
    peak: AtomicUsize,
    handled: AtomicUsize,
    unloaded: AtomicBool,
    after_unload: AtomicUsize,
}

impl Slow {
    fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay_ms,
            ..Default::default()
        })
    }

    fn work(&self) -> ExtensionResult<()> {
        if self.unloaded.load(Ordering::SeqCst) {
            self.after_unload.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.delay_ms));
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Extension for Slow {
    fn load(&self, _ctx: &ExtensionContext) -> ExtensionResult<()> {
        Ok(())
    }
    fn configure(&self, _settings: &Settings) -> ExtensionResult<()> {
        Ok(())
    }
    fn handle_message(&self, _message: &ChatMessage) -> ExtensionResult<()> {
        self.work()
    }
    fn handle_notify(&self, _source: Option<&str>, _data: &Value) -> ExtensionResult<()> {
        self.work()
    }
    fn tick(&self, _timestamp_nanos: i64, _interval_nanos: i64) -> ExtensionResult<()> {
        self.work()
    }
    fn unload(&self) -> ExtensionResult<()> {
        self.unloaded.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn host(workers: usize, max_blame: u32, action: BlameAction) -> ExtensionHost {
    ExtensionHost::builder()
        .config(
            HostConfig::default()
                .workers(workers)
                .max_blame(max_blame)
                .blame_action(action),
        )
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buffer_keeps_one_call_per_extension() {
    let host = host(2, 1, BlameAction::Buffer);
    let exts: Vec<(String, Arc<Slow>)> = ["a", "b", "c"]
        .into_iter()
        .map(|name| (name.to_string(), Slow::new(15)))
        .collect();
    for (name, ext) in &exts {
        host.install(name, ext.clone(), Settings::new())
            .await
            .unwrap();
    }

    let mut deferred = 0;
    for n in 0..5 {
        let report =
            host.broadcast_message(ChatMessage::new(ChatAuthor::new("v", "UC"), n.to_string()));
        assert_eq!(report.targets, 3);
        assert_eq!(report.rejected, 0);
        deferred += report.deferred;
    }
    assert!(deferred > 0);

    assert!(host.wait_idle(Duration::from_secs(10)).await);
    for (name, ext) in &exts {
        assert_eq!(ext.handled.load(Ordering::SeqCst), 5, "{name}");
        assert_eq!(ext.peak.load(Ordering::SeqCst), 1, "{name}");
        assert_eq!(host.ledger().blame(&format!("inproc:{name}")), 0);
        assert_eq!(host.ledger().pending(&format!("inproc:{name}")), 0);
    }

    let snapshot = host.metrics().snapshot();
    // 3 configure calls plus 15 messages.
    assert_eq!(snapshot.completed, 18);
    assert_eq!(snapshot.replayed as usize, deferred);
    assert!(host.shutdown().await.drained);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discard_drops_second_tick() {
    let host = host(2, 1, BlameAction::Discard);
    let ext = Slow::new(50);
    host.install("slow", ext.clone(), Settings::new())
        .await
        .unwrap();

    let first = host.tick(1, 1_000_000);
    let second = host.tick(2, 1_000_000);
    assert_eq!(first.submitted, 1);
    assert_eq!(second.rejected, 1);
    assert_eq!(second.deferred, 0);

    assert!(host.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(ext.handled.load(Ordering::SeqCst), 1);
    assert_eq!(host.metrics().snapshot().discarded, 1);
    assert_eq!(host.ledger().blame("inproc:slow"), 0);

    // The slot is free again once the first tick is done.
    assert_eq!(host.tick(3, 1_000_000).submitted, 1);
    assert!(host.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(ext.handled.load(Ordering::SeqCst), 2);
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fail_open_overdraws() {
    let host = host(2, 1, BlameAction::FailOpen);
    let ext = Slow::new(40);
    host.install("slow", ext.clone(), Settings::new())
        .await
        .unwrap();

    host.tick(1, 1);
    host.tick(2, 1);
    assert!(host.ledger().blame("inproc:slow") <= 2);

    assert!(host.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(ext.handled.load(Ordering::SeqCst), 2);
    assert_eq!(host.metrics().snapshot().overdrawn, 1);
    assert_eq!(host.ledger().blame("inproc:slow"), 0);
    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drops_buffered_calls() {
    let host = host(1, 1, BlameAction::Buffer);
    let ext = Slow::new(50);
    host.install("slow", ext.clone(), Settings::new())
        .await
        .unwrap();

    for n in 0..4 {
        host.tick(n, 1);
    }
    assert_eq!(host.ledger().pending("inproc:slow"), 3);

    let report = host.shutdown().await;
    assert_eq!(report.unloaded, 1);
    assert!(ext.handled.load(Ordering::SeqCst) < 4);
    assert_eq!(host.ledger().pending("inproc:slow"), 0);
    assert_eq!(host.tick(9, 1).rejected, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ext.after_unload.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_callback_starts_after_unload() {
    for action in [BlameAction::Buffer, BlameAction::FailOpen, BlameAction::Discard] {
        let host = host(1, 1, action);
        let ext = Slow::new(30);
        host.install("slow", ext.clone(), Settings::new())
            .await
            .unwrap();

        for n in 0..4 {
            host.tick(n, 1);
            host.broadcast_message(ChatMessage::new(ChatAuthor::new("v", "UC"), n.to_string()));
        }
        let report = host.shutdown().await;
        assert_eq!(report.unloaded, 1, "{action:?}");
        assert!(ext.unloaded.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ext.after_unload.load(Ordering::SeqCst), 0, "{action:?}");
        assert_eq!(ext.running.load(Ordering::SeqCst), 0, "{action:?}");
    }
}

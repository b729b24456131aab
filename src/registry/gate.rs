//! Per-extension call gate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Admits callbacks into one extension until closed.
///
/// Once `close` has returned, no later `enter` succeeds, and every pass
/// handed out before is visible to `drain`.
#[derive(Debug, Default)]
pub struct CallGate {
    closed: AtomicBool,
    in_flight: AtomicUsize,
}

/// Proof that a callback is inside the gate. Leaves on drop.
#[derive(Debug)]
pub struct GatePass<'a> {
    gate: &'a CallGate,
}

impl CallGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> Option<GatePass<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(GatePass { gate: self })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no pass is outstanding. Returns `false` on timeout.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

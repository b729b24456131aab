//! Observability for the extension host.
//!
//! - **Structured logs**: every host operation emits `tracing` events carrying
//!   `extension` and `function` fields.
//! - **Events**: [`EventBus`] broadcasts [`HostEvent`]s to external listeners.
//! - **Metrics**: [`DispatchMetrics`] keeps atomic counters, read through
//!   [`DispatchMetrics::snapshot`].
//!
//! ```rust,ignore
//! let mut events = host.events().subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event}");
//! }
//! ```

mod events;
mod metrics;

pub use events::{EventBus, HostEvent};
pub use metrics::{Counter, DispatchMetrics, Gauge, Histogram, MetricsSnapshot};

//! Telemetry for the access layer.
//!
//! Components emit [`AccessEvent`]s through a [`TelemetryHandle`]. The handle never blocks the
//! caller: events go into a bounded channel drained by a worker task that feeds a
//! `tower::Service` sink. When the channel is full the event is dropped and counted.
//!
//! ```rust
//! use lifeline::telemetry::{MemorySink, TelemetryHandle};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = MemorySink::new();
//! let telemetry = TelemetryHandle::spawn(sink.clone(), 1024);
//! # let _ = telemetry;
//! # }
//! ```

pub mod events;
pub mod sinks;

pub use events::{AccessEvent, CacheEvent, MutationEvent, RefreshEvent, RetryEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cheap, cloneable, non-blocking event emitter.
#[derive(Clone, Debug, Default)]
pub struct TelemetryHandle {
    tx: Option<mpsc::Sender<AccessEvent>>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryHandle {
    /// Handle that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Start a worker task delivering events to `sink`.
    ///
    /// Outside a tokio runtime there is nowhere to run the worker, so a disabled handle is
    /// returned instead.
    pub fn spawn<S>(sink: S, capacity: usize) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime; telemetry disabled");
            return Self::disabled();
        };
        let (tx, mut rx) = mpsc::channel::<AccessEvent>(capacity.max(1));
        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                emit_best_effort(sink.clone(), event).await;
            }
        });
        Self { tx: Some(tx), dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn emit(&self, event: AccessEvent) {
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Events lost because the channel was full or the worker was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

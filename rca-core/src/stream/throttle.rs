//! Client-side interaction throttling.
//!
//! Pointer input arrives far faster than a server can render. The
//! throttle queues events while a batch is in flight, and before sending
//! the next batch collapses runs of events that differ only in their
//! `x`/`y` coordinates down to the last one of the run. Wheel events are
//! never collapsed since each notch carries meaning.
//!
//! ```text
//! send_event ─► [queue] ─► compress_events ─► sink (one at a time)
//!                  ▲                             │
//!                  └──── wait out the period ◄───┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::debug;

use crate::error::RcaError;
use crate::stream::input::InteractionEvent;

/// Minimum time between two batches.
pub const DEFAULT_THROTTLE_PERIOD: Duration = Duration::from_millis(100);

/// Event type that is never collapsed.
const WHEEL: &str = "MouseWheel";

/// Fields ignored when deciding whether two events are the same gesture.
const POSITION_FIELDS: [&str; 2] = ["x", "y"];

type EventSink = Arc<dyn Fn(InteractionEvent) -> BoxFuture<'static, Result<(), RcaError>> + Send + Sync>;

// ── Compression ──────────────────────────────────────────────────

/// Whether `next` supersedes `prev`: same type and same fields apart
/// from the pointer position.
pub fn can_compress(prev: &InteractionEvent, next: &InteractionEvent) -> bool {
    if prev.kind == WHEEL || next.kind == WHEEL {
        return false;
    }
    if prev.kind != next.kind || prev.fields.len() != next.fields.len() {
        return false;
    }
    prev.fields
        .iter()
        .filter(|(name, _)| !POSITION_FIELDS.contains(&name.as_str()))
        .all(|(name, value)| next.fields.get(name) == Some(value))
}

/// Keep only the last event of every compressible run.
pub fn compress_events(events: Vec<InteractionEvent>) -> Vec<InteractionEvent> {
    let mut compressed = Vec::with_capacity(events.len());
    let mut iter = events.into_iter().peekable();
    while let Some(current) = iter.next() {
        match iter.peek() {
            Some(next) if can_compress(&current, next) => continue,
            _ => compressed.push(current),
        }
    }
    compressed
}

// ── EventThrottle ────────────────────────────────────────────────

#[derive(Default)]
struct Queue {
    events: Vec<InteractionEvent>,
    processing: bool,
}

/// Rate-limits interaction events on their way to a sink.
///
/// The first event of an idle throttle goes out at once. Events sent
/// while a batch is being delivered wait until at least `period` has
/// passed since that batch started, then go out compressed.
///
/// Must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct EventThrottle {
    queue: Arc<Mutex<Queue>>,
    sink: EventSink,
    period: Duration,
}

impl EventThrottle {
    pub fn new<F, Fut>(period: Duration, sink: F) -> Self
    where
        F: Fn(InteractionEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RcaError>> + Send + 'static,
    {
        Self {
            queue: Arc::new(Mutex::new(Queue::default())),
            sink: Arc::new(move |event| sink(event).boxed()),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Queue `event`. Never blocks; delivery happens on a spawned task.
    pub fn send_event(&self, event: InteractionEvent) {
        let batch = {
            let mut queue = self.lock();
            queue.events.push(event);
            if queue.processing {
                return;
            }
            queue.processing = true;
            std::mem::take(&mut queue.events)
        };

        tokio::spawn(drain(
            Arc::clone(&self.queue),
            Arc::clone(&self.sink),
            self.period,
            batch,
        ));
    }

    /// Events waiting for the next batch.
    pub fn queued(&self) -> usize {
        self.lock().events.len()
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn drain(queue: Arc<Mutex<Queue>>, sink: EventSink, period: Duration, mut batch: Vec<InteractionEvent>) {
    loop {
        let started = Instant::now();
        for event in compress_events(batch) {
            let kind = event.kind.clone();
            if let Err(e) = sink(event).await {
                debug!(event = %kind, "throttled event not delivered: {e}");
            }
            tokio::task::yield_now().await;
        }
        tokio::time::sleep_until(started + period).await;

        let mut pending = queue.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.events.is_empty() {
            pending.processing = false;
            return;
        }
        batch = std::mem::take(&mut pending.events);
    }
}

//! Render scheduler: request coalescing, two-phase quality, ordered push.
//!
//! ```text
//! schedule_render() ──► [requests] ──► quality loop ──► [qualities]
//!                                                          │
//!        ┌─────────────────────────────────────────────────┘
//!        ▼
//!   capture loop ── capture_frame() ── EncodePool::submit ──► [pending]
//!                                                               │
//!        ┌──────────────────────────────────────────────────────┘
//!        ▼
//!   push loop ── await in submission order ── drop stale ──► push callback
//! ```
//!
//! While requests keep arriving every frame is encoded at the
//! interactive quality. Once requests stop for `settle_periods` frame
//! intervals one more frame is produced at the still quality.
//!
//! The capture loop is the only caller of
//! [`FrameSource::capture_frame`](crate::stream::FrameSource::capture_frame),
//! so renders are never concurrent. Encodes run in parallel on the
//! shared [`EncodePool`] and may finish out of order; the push loop
//! restores submission order and additionally refuses to deliver a
//! frame older than the last one delivered.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::RcaError;
use crate::stream::encoder::{Encoder, EncoderKind};
use crate::stream::pool::{EncodePool, JobHandle};
use crate::stream::source::{self, SharedSource};
use crate::stream::types::{EncodedFrame, FrameMetadata, now_ms};

/// Sink for delivered frames.
pub type PushCallback = Arc<dyn Fn(Bytes, FrameMetadata) + Send + Sync>;

// ── SchedulerConfig ──────────────────────────────────────────────

/// Configuration for [`RenderScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Frame-rate ceiling used as the settle polling cadence.
    pub target_fps: f64,
    /// Encode quality while requests keep arriving (0..=100).
    pub interactive_quality: u8,
    /// Encode quality of the settle frame (0..=100).
    pub still_quality: u8,
    /// Idle frame intervals before the settle frame is produced.
    pub settle_periods: u32,
    /// Requested image format.
    pub encoder: EncoderKind,
    /// How long `close()` waits for the loops before aborting them.
    pub close_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            interactive_quality: 50,
            still_quality: 90,
            settle_periods: 5,
            encoder: EncoderKind::Jpeg,
            close_grace: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    pub fn with_target_fps(mut self, fps: f64) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn with_qualities(mut self, interactive: u8, still: u8) -> Self {
        self.interactive_quality = interactive;
        self.still_quality = still;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderKind) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_settle_periods(mut self, periods: u32) -> Self {
        self.settle_periods = periods;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// One frame interval.
    pub fn frame_period(&self) -> Result<Duration, RcaError> {
        match Duration::try_from_secs_f64(1.0 / self.target_fps) {
            Ok(period) if !period.is_zero() => Ok(period),
            _ => Err(RcaError::Configuration(format!(
                "target_fps {} has no usable frame period",
                self.target_fps
            ))),
        }
    }

    /// Time without requests after which the still frame is produced.
    pub fn settle_window(&self) -> Result<Duration, RcaError> {
        self.frame_period()?
            .checked_mul(self.settle_periods)
            .ok_or_else(|| {
                RcaError::Configuration(format!(
                    "settle window of {} periods at {} fps overflows",
                    self.settle_periods, self.target_fps
                ))
            })
    }

    /// Check every field and return the frame period the loops run at.
    fn validate(&self) -> Result<Duration, RcaError> {
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(RcaError::Configuration(format!(
                "target_fps must be positive, got {}",
                self.target_fps
            )));
        }
        if self.interactive_quality > 100 || self.still_quality > 100 {
            return Err(RcaError::Configuration(format!(
                "qualities must be within 0..=100, got {}/{}",
                self.interactive_quality, self.still_quality
            )));
        }
        self.settle_window()?;
        self.frame_period()
    }
}

// ── SchedulerStats ───────────────────────────────────────────────

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames handed to the push callback.
    pub pushed: u64,
    /// Completed encodes dropped because a newer frame was already pushed.
    pub stale: u64,
}

// ── Shared state ─────────────────────────────────────────────────

struct Shared {
    closing: AtomicBool,
    callback: RwLock<Option<PushCallback>>,
    last_pushed_ms: AtomicU64,
    pushed: AtomicU64,
    stale: AtomicU64,
}

impl Shared {
    fn callback(&self) -> Option<PushCallback> {
        self.callback.read().ok().and_then(|cb| cb.clone())
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

// ── RenderScheduler ──────────────────────────────────────────────

/// Drives one frame source: decides when and at which quality to
/// render, and delivers encoded frames in order.
///
/// # Lifetime
///
/// The three internal loops are spawned on the current Tokio runtime by
/// [`new`](Self::new) and run until [`close`](Self::close).
pub struct RenderScheduler {
    config: SchedulerConfig,
    encoder: Encoder,
    requests: mpsc::UnboundedSender<()>,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RenderScheduler {
    /// Validate `config` against `source` and start the loops.
    pub fn new(
        source: SharedSource,
        config: SchedulerConfig,
        pool: Arc<EncodePool>,
    ) -> Result<Self, RcaError> {
        source::ensure_streamable(&source)?;
        let period = config.validate()?;

        let encoder = config.encoder.resolve();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (quality_tx, quality_rx) = mpsc::unbounded_channel();
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            closing: AtomicBool::new(false),
            callback: RwLock::new(None),
            last_pushed_ms: AtomicU64::new(now_ms()),
            pushed: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        });

        let tasks = vec![
            tokio::spawn(quality_loop(
                request_rx,
                quality_tx,
                config.clone(),
                period,
                Arc::clone(&shared),
            )),
            tokio::spawn(capture_loop(
                quality_rx,
                pending_tx,
                source,
                encoder,
                pool,
                Arc::clone(&shared),
            )),
            tokio::spawn(push_loop(pending_rx, Arc::clone(&shared))),
        ];

        info!(
            fps = config.target_fps,
            interactive = config.interactive_quality,
            still = config.still_quality,
            encoder = %encoder.kind(),
            "render scheduler started"
        );

        Ok(Self {
            config,
            encoder,
            requests: request_tx,
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    /// Builder-style variant of [`set_push_callback`](Self::set_push_callback).
    pub fn with_push_callback<F>(self, callback: F) -> Self
    where
        F: Fn(Bytes, FrameMetadata) + Send + Sync + 'static,
    {
        self.set_push_callback(callback);
        self
    }

    /// Replace the sink invoked for every delivered frame.
    pub fn set_push_callback<F>(&self, callback: F)
    where
        F: Fn(Bytes, FrameMetadata) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.shared.callback.write() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Request a render. Never blocks; bursts are coalesced.
    pub fn schedule_render(&self) {
        // Only fails once the quality loop is gone, i.e. after close.
        let _ = self.requests.send(());
    }

    /// Awaitable variant of [`schedule_render`](Self::schedule_render);
    /// resolves once the request is queued, not once it is rendered.
    pub async fn async_schedule_render(&self) {
        self.schedule_render();
        tokio::task::yield_now().await;
    }

    /// Stop all loops. Idempotent. No frame is pushed after this returns.
    pub async fn close(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }
        self.shared.closing.store(true, Ordering::SeqCst);

        // Final wake-up for a loop parked on the request channel.
        self.schedule_render();

        let grace = self.config.close_grace;
        let joined = tokio::time::timeout(grace, async {
            for task in tasks.iter_mut() {
                let _ = task.await;
            }
        })
        .await;

        if joined.is_err() {
            debug!(?grace, "scheduler loops still busy after grace period; aborting");
            for task in tasks.iter() {
                task.abort();
            }
            // Handles already awaited above are finished and must not be
            // polled again.
            for task in tasks.iter_mut().filter(|t| !t.is_finished()) {
                let _ = task.await;
            }
        }
        tasks.clear();

        // Nothing may be delivered past this point.
        if let Ok(mut slot) = self.shared.callback.write() {
            *slot = None;
        }
        info!(pushed = self.shared.pushed.load(Ordering::Relaxed), "render scheduler closed");
    }

    /// Whether [`close`](Self::close) has been called or a loop failed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Encoder actually in use (after fallback).
    pub fn encoder(&self) -> EncoderKind {
        self.encoder.kind()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pushed: self.shared.pushed.load(Ordering::Relaxed),
            stale: self.shared.stale.load(Ordering::Relaxed),
        }
    }

    /// Pretend a frame captured at `ms` was already delivered.
    #[cfg(test)]
    fn hold_pushes_until(&self, ms: u64) {
        self.shared.last_pushed_ms.store(ms, Ordering::SeqCst);
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        // Dropping without close(): stop the loops where they stand.
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Ok(tasks) = self.tasks.try_lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }
}

// ── Loops ────────────────────────────────────────────────────────

async fn quality_loop(
    mut requests: mpsc::UnboundedReceiver<()>,
    qualities: mpsc::UnboundedSender<u8>,
    config: SchedulerConfig,
    period: Duration,
    shared: Arc<Shared>,
) {
    'requests: while requests.recv().await.is_some() {
        if qualities.send(config.interactive_quality).is_err() || shared.is_closing() {
            break;
        }

        // Collapse the rest of the burst into the frame just queued.
        while requests.try_recv().is_ok() {}

        for _ in 0..config.settle_periods {
            tokio::time::sleep(period).await;
            if !requests.is_empty() {
                continue 'requests;
            }
        }

        if shared.is_closing() || qualities.send(config.still_quality).is_err() {
            break;
        }
    }
    debug!("quality loop stopped");
}

async fn capture_loop(
    mut qualities: mpsc::UnboundedReceiver<u8>,
    pending: mpsc::UnboundedSender<JobHandle<EncodedFrame>>,
    source: SharedSource,
    encoder: Encoder,
    pool: Arc<EncodePool>,
    shared: Arc<Shared>,
) {
    while let Some(quality) = qualities.recv().await {
        let captured_at_ms = now_ms();
        let capture_source = Arc::clone(&source);
        let captured = tokio::task::spawn_blocking(move || {
            source::lock(&capture_source)?.capture_frame()
        })
        .await;

        let frame = match captured {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                error!("frame capture failed: {e}");
                shared.closing.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                error!("frame capture task failed: {e}");
                shared.closing.store(true, Ordering::SeqCst);
                break;
            }
        };

        let job = pool.submit(move || encoder.encode_with_meta(&frame, quality, captured_at_ms));
        if pending.send(job).is_err() || shared.is_closing() {
            break;
        }
    }
    debug!("capture loop stopped");
}

async fn push_loop(mut pending: mpsc::UnboundedReceiver<JobHandle<EncodedFrame>>, shared: Arc<Shared>) {
    while let Some(job) = pending.recv().await {
        let frame = match job.await.map_err(RcaError::from).and_then(|r| r) {
            Ok(frame) => frame,
            Err(e) => {
                error!("frame encode failed: {e}");
                shared.closing.store(true, Ordering::SeqCst);
                break;
            }
        };

        let last = shared.last_pushed_ms.load(Ordering::SeqCst);
        if frame.captured_at_ms < last {
            shared.stale.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if let Some(callback) = shared.callback() {
            shared.last_pushed_ms.store(frame.captured_at_ms, Ordering::SeqCst);
            shared.pushed.fetch_add(1, Ordering::Relaxed);
            callback(frame.content, frame.meta);
        }

        if shared.is_closing() {
            break;
        }
    }
    debug!("push loop stopped");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::stream::input::InteractionEvent;
    use crate::stream::source::{FrameSource, SourceCapabilities, shared as share};
    use crate::stream::types::{PixelFormat, RawFrame};

    struct Solid {
        captures: Arc<AtomicU64>,
    }

    impl FrameSource for Solid {
        fn capture_frame(&mut self) -> Result<RawFrame, RcaError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            RawFrame::new(8, 8, PixelFormat::Rgb8, vec![200; 8 * 8 * 3])
        }

        fn resize(&mut self, _width: u32, _height: u32) -> Result<(), RcaError> {
            Ok(())
        }

        fn inject_interaction(&mut self, _event: &InteractionEvent) -> Result<(), RcaError> {
            Ok(())
        }
    }

    struct NoInput;

    impl FrameSource for NoInput {
        fn capture_frame(&mut self) -> Result<RawFrame, RcaError> {
            Ok(RawFrame::empty())
        }

        fn resize(&mut self, _width: u32, _height: u32) -> Result<(), RcaError> {
            Ok(())
        }

        fn inject_interaction(&mut self, _event: &InteractionEvent) -> Result<(), RcaError> {
            Ok(())
        }

        fn capabilities(&self) -> SourceCapabilities {
            SourceCapabilities::CAPTURE | SourceCapabilities::RESIZE
        }
    }

    struct Broken;

    impl FrameSource for Broken {
        fn capture_frame(&mut self) -> Result<RawFrame, RcaError> {
            Err(RcaError::Capture("gpu lost".into()))
        }

        fn resize(&mut self, _width: u32, _height: u32) -> Result<(), RcaError> {
            Ok(())
        }

        fn inject_interaction(&mut self, _event: &InteractionEvent) -> Result<(), RcaError> {
            Ok(())
        }
    }

    type Pushes = Arc<StdMutex<Vec<FrameMetadata>>>;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_target_fps(20.0)
            .with_qualities(0, 100)
            .with_close_grace(Duration::from_millis(500))
    }

    fn start(config: SchedulerConfig) -> (RenderScheduler, Pushes, Arc<AtomicU64>) {
        let captures = Arc::new(AtomicU64::new(0));
        let source = share(Solid {
            captures: Arc::clone(&captures),
        });
        let pushes: Pushes = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&pushes);
        let scheduler = RenderScheduler::new(source, config, Arc::new(EncodePool::new(2)))
            .unwrap()
            .with_push_callback(move |content, meta| {
                assert!(!content.is_empty());
                sink.lock().unwrap().push(meta);
            });
        (scheduler, pushes, captures)
    }

    fn qualities(pushes: &Pushes) -> Vec<u8> {
        pushes.lock().unwrap().iter().map(|m| m.quality).collect()
    }

    #[tokio::test]
    async fn single_request_yields_interactive_then_still() {
        let (scheduler, pushes, _) = start(fast_config());

        scheduler.async_schedule_render().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(qualities(&pushes), vec![0, 100]);
        scheduler.close().await;
    }

    #[tokio::test]
    async fn burst_is_coalesced() {
        let (scheduler, pushes, captures) = start(fast_config());

        for _ in 0..30 {
            scheduler.schedule_render();
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(qualities(&pushes).len(), 2);
        assert_eq!(captures.load(Ordering::SeqCst), 2);
        scheduler.close().await;
    }

    #[tokio::test]
    async fn continuous_requests_postpone_still_frame() {
        let (scheduler, pushes, _) = start(fast_config());

        scheduler.async_schedule_render().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.async_schedule_render().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.async_schedule_render().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(qualities(&pushes), vec![0, 0, 0, 100]);
        scheduler.close().await;
    }

    #[tokio::test]
    async fn idle_scheduler_never_pushes() {
        let (scheduler, pushes, captures) = start(fast_config());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(pushes.lock().unwrap().is_empty());
        assert_eq!(captures.load(Ordering::SeqCst), 0);

        scheduler.close().await;
        assert!(scheduler.is_closed());
    }

    #[tokio::test]
    async fn nothing_is_pushed_after_close() {
        let (scheduler, pushes, _) = start(fast_config());

        scheduler.async_schedule_render().await;
        scheduler.close().await;
        let count = pushes.lock().unwrap().len();

        scheduler.schedule_render();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pushes.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (scheduler, _, _) = start(fast_config());
        scheduler.close().await;
        scheduler.close().await;
        assert!(scheduler.is_closed());
    }

    #[tokio::test]
    async fn pushed_timestamps_are_monotonic() {
        let (scheduler, pushes, _) = start(fast_config().with_settle_periods(1));

        for _ in 0..10 {
            scheduler.schedule_render();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        scheduler.close().await;

        let stamps: Vec<u64> = pushes.lock().unwrap().iter().map(|m| m.st).collect();
        assert!(!stamps.is_empty());
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(scheduler.stats().pushed as usize, stamps.len());
    }

    #[tokio::test]
    async fn metadata_matches_frame() {
        let (scheduler, pushes, _) = start(fast_config().with_encoder(EncoderKind::Png));

        scheduler.async_schedule_render().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.close().await;

        let pushes = pushes.lock().unwrap();
        let first = pushes.first().unwrap();
        assert_eq!(first.mime_type, "image/png");
        assert_eq!((first.w, first.h), (8, 8));
        assert_eq!(first.key, "key");
        assert_eq!(first.codec, "");
    }

    #[tokio::test]
    async fn source_without_interaction_is_rejected() {
        let result = RenderScheduler::new(
            share(NoInput),
            SchedulerConfig::default(),
            Arc::new(EncodePool::new(1)),
        );
        assert!(matches!(result, Err(RcaError::Configuration(_))));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let source = share(Solid {
            captures: Arc::new(AtomicU64::new(0)),
        });
        let result = RenderScheduler::new(
            source,
            SchedulerConfig::default().with_target_fps(0.0),
            Arc::new(EncodePool::new(1)),
        );
        assert!(matches!(result, Err(RcaError::Configuration(_))));
    }

    #[tokio::test]
    async fn capture_failure_stops_scheduler() {
        let scheduler =
            RenderScheduler::new(share(Broken), fast_config(), Arc::new(EncodePool::new(1))).unwrap();

        scheduler.schedule_render();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(scheduler.is_closed());
        assert_eq!(scheduler.stats().pushed, 0);
        scheduler.close().await;
    }

    #[test]
    fn settle_window_follows_fps() {
        let config = SchedulerConfig::default().with_target_fps(20.0);
        assert_eq!(config.frame_period().unwrap(), Duration::from_millis(50));
        assert_eq!(config.settle_window().unwrap(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn unrepresentable_periods_are_rejected() {
        let solid = || {
            share(Solid {
                captures: Arc::new(AtomicU64::new(0)),
            })
        };
        let pool = Arc::new(EncodePool::new(1));

        let too_slow = SchedulerConfig::default().with_target_fps(1e-20);
        assert!(matches!(
            RenderScheduler::new(solid(), too_slow, Arc::clone(&pool)),
            Err(RcaError::Configuration(_))
        ));

        let too_long = SchedulerConfig::default()
            .with_target_fps(1e-10)
            .with_settle_periods(u32::MAX);
        assert!(too_long.frame_period().is_ok());
        assert!(matches!(
            RenderScheduler::new(solid(), too_long, pool),
            Err(RcaError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn frames_older_than_last_push_are_dropped() {
        let (scheduler, pushes, captures) = start(fast_config());
        scheduler.hold_pushes_until(now_ms() + 60_000);

        scheduler.async_schedule_render().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(pushes.lock().unwrap().is_empty());
        assert_eq!(captures.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats(), SchedulerStats { pushed: 0, stale: 2 });
        scheduler.close().await;
    }
}

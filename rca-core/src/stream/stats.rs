//! Receive-side throughput estimation.
//!
//! Tracks frames arriving at a stream client over a rolling window and
//! derives frames/second, bytes/second, and a smoothed capture-to-arrival
//! delay from each frame's `st` timestamp.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Snapshot of the estimator, published by the client after every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Frames received since the client started.
    pub total_frames: u64,
    pub total_bytes: u64,
    pub fps: f64,
    pub bytes_per_sec: u64,
    /// Smoothed delay between capture on the server and arrival here.
    pub delay: Duration,
    /// Size of the most recent frame.
    pub width: u32,
    pub height: u32,
}

/// Rolling-window frame rate and throughput estimator.
pub struct ThroughputEstimator {
    /// Samples: `(arrival, bytes)`.
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    /// Running total of bytes in the window.
    total_bytes: u64,
    frames: u64,
    lifetime_bytes: u64,
    smoothed_delay_us: u64,
}

impl ThroughputEstimator {
    /// Estimator with a 1-second rolling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(128),
            window,
            total_bytes: 0,
            frames: 0,
            lifetime_bytes: 0,
            smoothed_delay_us: 0,
        }
    }

    /// Record a frame of `bytes` arriving now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit arrival time.
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        self.frames += 1;
        self.lifetime_bytes += bytes;
        self.evict(when);
    }

    /// Fold one capture-to-arrival delay into the EWMA (alpha = 1/8).
    pub fn record_delay(&mut self, delay: Duration) {
        let us = delay.as_micros() as u64;
        if self.smoothed_delay_us == 0 {
            self.smoothed_delay_us = us;
        } else {
            self.smoothed_delay_us = self.smoothed_delay_us * 7 / 8 + us / 8;
        }
    }

    pub fn estimate_bps(&self) -> u64 {
        match self.span() {
            Some(secs) => (self.total_bytes as f64 / secs) as u64,
            None => 0,
        }
    }

    /// Frames per second over the window. Needs two samples.
    pub fn estimate_fps(&self) -> f64 {
        match self.span() {
            Some(secs) if self.samples.len() > 1 => (self.samples.len() - 1) as f64 / secs,
            _ => 0.0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_micros(self.smoothed_delay_us)
    }

    /// Current figures, tagged with the latest frame size.
    pub fn snapshot(&self, width: u32, height: u32) -> FrameStats {
        FrameStats {
            total_frames: self.frames,
            total_bytes: self.lifetime_bytes,
            fps: self.estimate_fps(),
            bytes_per_sec: self.estimate_bps(),
            delay: self.delay(),
            width,
            height,
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    /// Seconds between the oldest and newest sample, floored at 1 ms.
    fn span(&self) -> Option<f64> {
        let (first, _) = self.samples.front()?;
        let (last, _) = self.samples.back()?;
        let span = last.duration_since(*first).max(Duration::from_millis(1));
        Some(span.as_secs_f64())
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! View adapter: binds one frame source and its scheduler to an area name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::RcaError;
use crate::protocol::{AreaHandler, Streamer};
use crate::stream::input::{InteractionEvent, ReleaseFilter, SizeSpec};
use crate::stream::pool::EncodePool;
use crate::stream::scheduler::{RenderScheduler, SchedulerConfig};
use crate::stream::source::{self, SharedSource};
use crate::stream::types::FrameMetadata;

/// Smallest accepted viewport extent, in CSS pixels.
pub const MIN_EXTENT: f64 = 10.0;

/// Reported image size before the client has sent a viewport.
pub const DEFAULT_IMAGE_SIZE: (u32, u32) = (300, 300);

#[derive(Debug)]
struct ViewState {
    scale: f64,
    viewport: Option<SizeSpec>,
    last_meta: Option<FrameMetadata>,
    releases: ReleaseFilter,
}

/// One remotely controlled area.
///
/// Resize and interaction requests from the client are applied to the
/// frame source and trigger a render; every frame the scheduler delivers
/// is pushed to the attached [`Streamer`] under this area's name.
pub struct ViewAdapter {
    name: String,
    source: SharedSource,
    scheduler: RenderScheduler,
    state: Mutex<ViewState>,
    streamer: RwLock<Option<Weak<dyn Streamer>>>,
    render_on_interaction: AtomicBool,
}

impl ViewAdapter {
    /// Build the adapter and its scheduler. Must run inside a Tokio runtime.
    pub fn new(
        name: impl Into<String>,
        source: SharedSource,
        config: SchedulerConfig,
        pool: Arc<EncodePool>,
    ) -> Result<Arc<Self>, RcaError> {
        let scheduler = RenderScheduler::new(Arc::clone(&source), config, pool)?;
        let adapter = Arc::new(Self {
            name: name.into(),
            source,
            scheduler,
            state: Mutex::new(ViewState {
                scale: 1.0,
                viewport: None,
                last_meta: None,
                releases: ReleaseFilter::new(),
            }),
            streamer: RwLock::new(None),
            render_on_interaction: AtomicBool::new(true),
        });

        let weak = Arc::downgrade(&adapter);
        adapter.scheduler.set_push_callback(move |content, meta| {
            if let Some(adapter) = weak.upgrade() {
                adapter.push(content, meta);
            }
        });
        Ok(adapter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    /// Whether interaction events trigger a render (default `true`).
    pub fn set_render_on_interaction(&self, enabled: bool) {
        self.render_on_interaction.store(enabled, Ordering::Relaxed);
    }

    pub fn scale(&self) -> f64 {
        self.state().scale
    }

    /// Change the render scale and re-apply the last known viewport.
    pub fn set_scale(&self, scale: f64) -> Result<(), RcaError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RcaError::InvalidArgument(format!(
                "scale must be positive, got {scale}"
            )));
        }
        let viewport = {
            let mut state = self.state();
            state.scale = scale;
            state.viewport
        };
        match viewport {
            Some(size) => self.apply_size("", size),
            None => Ok(()),
        }
    }

    /// Render target size in device pixels.
    pub fn image_size(&self) -> (u32, u32) {
        let state = self.state();
        match state.viewport {
            Some(size) => device_size(size, state.scale),
            None => DEFAULT_IMAGE_SIZE,
        }
    }

    /// Metadata of the most recently pushed frame.
    pub fn last_meta(&self) -> Option<FrameMetadata> {
        self.state().last_meta.clone()
    }

    /// Request a render, e.g. for an animation driven by the application.
    pub fn schedule_render(&self) {
        self.scheduler.schedule_render();
    }

    /// Forward an encoded frame to the attached streamer.
    pub fn push(&self, content: Bytes, meta: FrameMetadata) {
        if content.is_empty() {
            return;
        }
        let Some(streamer) = self.streamer() else {
            return;
        };
        self.state().last_meta = Some(meta.clone());
        streamer.push_content(&self.name, meta, content);
    }

    // ── Internal ─────────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn streamer(&self) -> Option<Arc<dyn Streamer>> {
        self.streamer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn apply_size(&self, origin: &str, size: SizeSpec) -> Result<(), RcaError> {
        let size = SizeSpec::new(size.w.max(MIN_EXTENT), size.h.max(MIN_EXTENT), size.p);
        let (width, height) = {
            let mut state = self.state();
            state.viewport = Some(size);
            device_size(size, state.scale)
        };
        debug!(area = %self.name, origin, width, height, "resizing");
        source::lock(&self.source)?.resize(width, height)?;
        self.scheduler.schedule_render();
        Ok(())
    }
}

fn device_size(size: SizeSpec, scale: f64) -> (u32, u32) {
    let w = (size.w * size.p * scale).floor().max(1.0);
    let h = (size.h * size.p * scale).floor().max(1.0);
    (w as u32, h as u32)
}

impl AreaHandler for ViewAdapter {
    fn area_name(&self) -> &str {
        &self.name
    }

    fn set_streamer(&self, streamer: Option<Weak<dyn Streamer>>) {
        *self.streamer.write().unwrap_or_else(PoisonError::into_inner) = streamer;
    }

    fn update_size(&self, origin: &str, size: SizeSpec) -> Result<(), RcaError> {
        self.apply_size(origin, size)
    }

    fn on_interaction(&self, origin: &str, event: InteractionEvent) -> Result<(), RcaError> {
        if event.is_envelope() {
            return Ok(());
        }
        if self.state().releases.discard_extra_release(&event) {
            debug!(area = %self.name, origin, event = %event.kind, "unmatched release dropped");
            return Ok(());
        }

        source::lock(&self.source)?.inject_interaction(&event)?;
        if self.render_on_interaction.load(Ordering::Relaxed) {
            self.scheduler.schedule_render();
        }
        Ok(())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.scheduler.close())
    }
}

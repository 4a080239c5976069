//! The renderer seam.
//!
//! Anything that can produce pixels on demand (a 3D render window, a
//! game emulator, an image viewer) plugs into the pipeline by
//! implementing [`FrameSource`]. The scheduler is the only caller of
//! [`capture_frame`](FrameSource::capture_frame); view adapters call
//! [`resize`](FrameSource::resize) and
//! [`inject_interaction`](FrameSource::inject_interaction). All calls go
//! through one mutex, so a source never sees two calls at once.

use std::sync::{Arc, Mutex, MutexGuard};

use bitflags::bitflags;

use crate::error::RcaError;
use crate::stream::input::InteractionEvent;
use crate::stream::types::RawFrame;

bitflags! {
    /// Operations a frame source actually supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SourceCapabilities: u8 {
        const CAPTURE  = 0b001;
        const RESIZE   = 0b010;
        const INTERACT = 0b100;
    }
}

impl SourceCapabilities {
    /// What a render scheduler needs from its source.
    pub const STREAMING: Self = Self::all();
}

// ── FrameSource ──────────────────────────────────────────────────

/// An opaque renderable surface.
pub trait FrameSource: Send {
    /// Render (if needed) and read back the current image, top row first.
    fn capture_frame(&mut self) -> Result<RawFrame, RcaError>;

    /// Resize the render target to `width` x `height` device pixels.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), RcaError>;

    /// Apply a client interaction event.
    fn inject_interaction(&mut self, event: &InteractionEvent) -> Result<(), RcaError>;

    /// Declared capability set; checked when a scheduler is built.
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::STREAMING
    }
}

/// A frame source shared between a scheduler and its view adapter.
pub type SharedSource = Arc<Mutex<dyn FrameSource>>;

/// Wrap a concrete source for sharing.
pub fn shared<S: FrameSource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(source))
}

/// Lock a shared source, mapping poisoning to a capture error.
pub(crate) fn lock(source: &SharedSource) -> Result<MutexGuard<'_, dyn FrameSource + 'static>, RcaError> {
    source
        .lock()
        .map_err(|_| RcaError::Capture("frame source mutex poisoned".into()))
}

/// Fail with a configuration error unless `source` can be streamed.
pub fn ensure_streamable(source: &SharedSource) -> Result<(), RcaError> {
    let caps = lock(source)?.capabilities();
    let missing = SourceCapabilities::STREAMING.difference(caps);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RcaError::Configuration(format!(
            "frame source lacks required capabilities: {missing:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::PixelFormat;

    struct Still;

    impl FrameSource for Still {
        fn capture_frame(&mut self) -> Result<RawFrame, RcaError> {
            RawFrame::new(1, 1, PixelFormat::Rgb8, vec![0, 0, 0])
        }

        fn resize(&mut self, _width: u32, _height: u32) -> Result<(), RcaError> {
            Ok(())
        }

        fn inject_interaction(&mut self, _event: &InteractionEvent) -> Result<(), RcaError> {
            Ok(())
        }
    }

    struct CaptureOnly;

    impl FrameSource for CaptureOnly {
        fn capture_frame(&mut self) -> Result<RawFrame, RcaError> {
            Ok(RawFrame::empty())
        }

        fn resize(&mut self, _width: u32, _height: u32) -> Result<(), RcaError> {
            Err(RcaError::Other("read-only".into()))
        }

        fn inject_interaction(&mut self, _event: &InteractionEvent) -> Result<(), RcaError> {
            Err(RcaError::Other("read-only".into()))
        }

        fn capabilities(&self) -> SourceCapabilities {
            SourceCapabilities::CAPTURE
        }
    }

    #[test]
    fn full_source_is_streamable() {
        assert!(ensure_streamable(&shared(Still)).is_ok());
    }

    #[test]
    fn partial_source_is_rejected() {
        let err = ensure_streamable(&shared(CaptureOnly)).unwrap_err();
        assert!(matches!(err, RcaError::Configuration(_)));
        assert!(err.to_string().contains("RESIZE"));
    }

    #[test]
    fn shared_source_captures() {
        let source = shared(Still);
        let frame = lock(&source).unwrap().capture_frame().unwrap();
        assert_eq!((frame.width, frame.height), (1, 1));
    }
}

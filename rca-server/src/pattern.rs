//! Synthetic test-pattern renderer.
//!
//! Draws a colour gradient whose hue is shifted by a per-area seed, with a
//! crosshair at the last pointer position reported by the client. Button
//! presses invert the crosshair colour until released, and wheel events
//! step the gradient period, so every kind of interaction shows up in the
//! streamed frames.

use rca_core::stream::types::PixelFormat;
use rca_core::{FrameSource, InteractionEvent, RawFrame, RcaError};

const MIN_PERIOD: u32 = 8;
const MAX_PERIOD: u32 = 1024;

/// Largest render extent accepted from a client, in device pixels.
pub const MAX_EXTENT: u32 = 8192;

pub struct PatternSource {
    width: u32,
    height: u32,
    seed: u8,
    period: u32,
    pointer: Option<(u32, u32)>,
    pressed: bool,
    frames: u64,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, seed: u8) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            seed,
            period: 256,
            pointer: None,
            pressed: false,
            frames: 0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if let Some((px, py)) = self.pointer {
            if x == px || y == py {
                return if self.pressed { [0, 0, 0] } else { [255, 255, 255] };
            }
        }
        let r = ((x % self.period) * 255 / self.period) as u8;
        let g = ((y % self.period) * 255 / self.period) as u8;
        [r.wrapping_add(self.seed), g, self.seed.wrapping_mul(3)]
    }
}

impl FrameSource for PatternSource {
    fn capture_frame(&mut self) -> Result<RawFrame, RcaError> {
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                data.extend_from_slice(&self.pixel(x, y));
            }
        }
        self.frames += 1;
        RawFrame::new(self.width, self.height, PixelFormat::Rgb8, data)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RcaError> {
        if width == 0 || height == 0 {
            return Err(RcaError::InvalidArgument(format!(
                "cannot render at {width}x{height}"
            )));
        }
        self.width = width.min(MAX_EXTENT);
        self.height = height.min(MAX_EXTENT);
        self.pointer = None;
        Ok(())
    }

    fn inject_interaction(&mut self, event: &InteractionEvent) -> Result<(), RcaError> {
        let coord = |name: &str| event.get(name).and_then(|v| v.as_f64());
        if let (Some(x), Some(y)) = (coord("x"), coord("y")) {
            let x = (x.max(0.0) as u32).min(self.width - 1);
            let y = (y.max(0.0) as u32).min(self.height - 1);
            self.pointer = Some((x, y));
        }

        match event.kind.as_str() {
            "MouseWheelForward" => self.period = (self.period / 2).max(MIN_PERIOD),
            "MouseWheelBackward" => self.period = (self.period * 2).min(MAX_PERIOD),
            _ if event.is_press() => self.pressed = true,
            _ if event.is_release() => self.pressed = false,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_requested_size() {
        let mut source = PatternSource::new(64, 32, 7);
        let frame = source.capture_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert_eq!(frame.data.len(), 64 * 32 * 3);
        assert_eq!(source.frames(), 1);

        source.resize(10, 20).unwrap();
        let frame = source.capture_frame().unwrap();
        assert_eq!((frame.width, frame.height), (10, 20));
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut source = PatternSource::new(8, 8, 0);
        assert!(source.resize(0, 8).is_err());
        assert_eq!(source.size(), (8, 8));
    }

    #[test]
    fn oversized_requests_are_capped() {
        let mut source = PatternSource::new(8, 8, 0);
        source.resize(u32::MAX, 100_000).unwrap();
        assert_eq!(source.size(), (MAX_EXTENT, MAX_EXTENT));

        source.resize(MAX_EXTENT + 1, 12).unwrap();
        assert_eq!(source.size(), (MAX_EXTENT, 12));
    }

    #[test]
    fn pointer_draws_crosshair() {
        let mut source = PatternSource::new(16, 16, 0);
        let move_to = InteractionEvent::new("MouseMove").with("x", 3).with("y", 5);
        source.inject_interaction(&move_to).unwrap();
        assert_eq!(source.pixel(3, 0), [255, 255, 255]);
        assert_eq!(source.pixel(0, 5), [255, 255, 255]);

        source
            .inject_interaction(&InteractionEvent::new("LeftButtonPress"))
            .unwrap();
        assert_eq!(source.pixel(3, 9), [0, 0, 0]);
        source
            .inject_interaction(&InteractionEvent::new("LeftButtonRelease"))
            .unwrap();
        assert_eq!(source.pixel(3, 9), [255, 255, 255]);
    }

    #[test]
    fn pointer_is_clamped_to_canvas() {
        let mut source = PatternSource::new(16, 16, 0);
        let far = InteractionEvent::new("MouseMove").with("x", 500).with("y", -4);
        source.inject_interaction(&far).unwrap();
        assert_eq!(source.pointer, Some((15, 0)));
    }

    #[test]
    fn wheel_changes_period_within_bounds() {
        let mut source = PatternSource::new(16, 16, 0);
        for _ in 0..20 {
            source
                .inject_interaction(&InteractionEvent::new("MouseWheelForward"))
                .unwrap();
        }
        assert_eq!(source.period, MIN_PERIOD);
        for _ in 0..20 {
            source
                .inject_interaction(&InteractionEvent::new("MouseWheelBackward"))
                .unwrap();
        }
        assert_eq!(source.period, MAX_PERIOD);
    }
}

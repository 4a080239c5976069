//! Shared types for the capture → encode → push pipeline.
//!
//! [`RawFrame`] is what a [`FrameSource`](crate::stream::FrameSource)
//! hands to the scheduler; [`EncodedFrame`] is what the encode pool
//! hands back. [`FrameMetadata`] is the JSON object that travels next
//! to every published frame.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RcaError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed frame, row-major, top row first, tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Frame width in pixels (columns).
    pub width: u32,
    /// Frame height in pixels (rows).
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// `width * height * bpp` bytes.
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Wrap a top-down pixel buffer, checking its length.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self, RcaError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(RcaError::InvalidArgument(format!(
                "pixel buffer for {width}x{height} {format:?} must be {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Wrap a bottom-up buffer (OpenGL read-back order) and flip it so the
    /// first row is the top of the image.
    pub fn from_bottom_up(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, RcaError> {
        let mut frame = Self::new(width, height, format, data)?;
        frame.flip_vertical();
        Ok(frame)
    }

    /// A zero-sized frame. Encodes to empty content, which adapters skip.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgb8,
            data: Vec::new(),
        }
    }

    /// Whether the frame has no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Reverse row order in place.
    pub fn flip_vertical(&mut self) {
        let stride = self.stride();
        let rows = self.height as usize;
        for y in 0..rows / 2 {
            let (top, bottom) = self.data.split_at_mut((rows - 1 - y) * stride);
            top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
        }
    }

    /// RGB8 copy of the pixels, dropping alpha when present.
    pub fn to_rgb8(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Rgba8 => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        }
    }
}

// ── FrameMetadata ────────────────────────────────────────────────

/// Value of the `key` field: every frame is independently decodable.
pub const KEYFRAME_TAG: &str = "key";

/// Metadata published next to every frame. Field names are part of the
/// wire contract with the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// MIME type, e.g. `image/jpeg`.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Reserved for video codecs; always empty.
    pub codec: String,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
    /// Capture time, epoch milliseconds.
    pub st: u64,
    /// Always [`KEYFRAME_TAG`].
    pub key: String,
    /// Encoder quality used for this frame (0..=100).
    pub quality: u8,
}

impl FrameMetadata {
    pub fn new(mime_type: &str, width: u32, height: u32, captured_at_ms: u64, quality: u8) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            codec: String::new(),
            w: width,
            h: height,
            st: captured_at_ms,
            key: KEYFRAME_TAG.to_string(),
            quality,
        }
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// Result of one encode job.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Compressed image bytes; empty for an empty capture.
    pub content: Bytes,
    pub meta: FrameMetadata,
    /// Same instant as `meta.st`, kept separately for ordering.
    pub captured_at_ms: u64,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_buffer_length() {
        assert!(RawFrame::new(2, 2, PixelFormat::Rgb8, vec![0; 12]).is_ok());
        assert!(RawFrame::new(2, 2, PixelFormat::Rgba8, vec![0; 12]).is_err());
    }

    #[test]
    fn bottom_up_frames_are_flipped() {
        // Three 1-pixel rows: bottom row first.
        let data = vec![3, 3, 3, 2, 2, 2, 1, 1, 1];
        let frame = RawFrame::from_bottom_up(1, 3, PixelFormat::Rgb8, data).unwrap();
        assert_eq!(frame.data, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn flip_even_height() {
        let mut frame = RawFrame::new(2, 2, PixelFormat::Rgb8, (0..12).collect()).unwrap();
        frame.flip_vertical();
        assert_eq!(frame.data, vec![6, 7, 8, 9, 10, 11, 0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn rgba_to_rgb_drops_alpha() {
        let frame = RawFrame::new(2, 1, PixelFormat::Rgba8, vec![1, 2, 3, 255, 4, 5, 6, 0]).unwrap();
        assert_eq!(frame.to_rgb8(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn metadata_uses_wire_field_names() {
        let meta = FrameMetadata::new("image/jpeg", 640, 480, 1_700_000_000_000, 50);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "image/jpeg");
        assert_eq!(json["codec"], "");
        assert_eq!(json["w"], 640);
        assert_eq!(json["h"], 480);
        assert_eq!(json["st"], 1_700_000_000_000u64);
        assert_eq!(json["key"], "key");
        assert_eq!(json["quality"], 50);
    }

    #[test]
    fn empty_frame() {
        assert!(RawFrame::empty().is_empty());
        assert_eq!(RawFrame::empty().stride(), 0);
    }
}

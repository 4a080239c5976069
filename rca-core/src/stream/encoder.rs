//! Still-image frame encoders.
//!
//! Every frame is encoded independently (no inter-frame prediction), so
//! each encoder is a plain function `(frame, quality) -> bytes`. The
//! format is chosen by name through [`EncoderKind`] and resolved once
//! into an [`Encoder`]; formats that are not compiled into this build
//! are substituted at resolution time, never per call.
//!
//! | Kind   | MIME         | Quality mapping                        |
//! |--------|--------------|----------------------------------------|
//! | `jpeg` | `image/jpeg` | JPEG quality, clamped to 1..=100       |
//! | `png`  | `image/png`  | < 50 fast, < 90 default, else best     |
//! | `webp` | `image/webp` | lossless; quality is informational     |
//! | `avif` | `image/avif` | AVIF quality (requires `avif` feature) |

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RcaError;
use crate::stream::types::{EncodedFrame, FrameMetadata, PixelFormat, RawFrame};

/// Signature shared by every codec backend.
pub type EncodeFn = fn(&RawFrame, u8) -> Result<Vec<u8>, RcaError>;

// ── EncoderKind ──────────────────────────────────────────────────

/// Image formats a scheduler can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    #[default]
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl EncoderKind {
    /// Every known kind, in declaration order.
    pub const ALL: [EncoderKind; 4] = [
        EncoderKind::Jpeg,
        EncoderKind::Png,
        EncoderKind::Webp,
        EncoderKind::Avif,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            EncoderKind::Jpeg => "jpeg",
            EncoderKind::Png => "png",
            EncoderKind::Webp => "webp",
            EncoderKind::Avif => "avif",
        }
    }

    pub const fn mime_type(self) -> &'static str {
        match self {
            EncoderKind::Jpeg => "image/jpeg",
            EncoderKind::Png => "image/png",
            EncoderKind::Webp => "image/webp",
            EncoderKind::Avif => "image/avif",
        }
    }

    /// Whether this build can encode the format.
    pub const fn is_available(self) -> bool {
        match self {
            EncoderKind::Avif => cfg!(feature = "avif"),
            _ => true,
        }
    }

    /// Baseline substitute for an unavailable format.
    const fn fallback(self) -> EncoderKind {
        match self {
            EncoderKind::Avif => EncoderKind::Jpeg,
            other => other,
        }
    }

    /// Resolve to a concrete encoder, substituting the fallback when the
    /// requested format is not compiled in.
    pub fn resolve(self) -> Encoder {
        let mut kind = self;
        while !kind.is_available() {
            let next = kind.fallback();
            warn!(
                requested = self.name(),
                using = next.name(),
                "encoder unavailable in this build; falling back"
            );
            kind = next;
        }
        Encoder {
            kind,
            encode_fn: backend(kind),
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncoderKind {
    type Err = RcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(EncoderKind::Jpeg),
            "png" => Ok(EncoderKind::Png),
            "webp" => Ok(EncoderKind::Webp),
            "avif" => Ok(EncoderKind::Avif),
            other => Err(RcaError::Configuration(format!("unknown encoder: {other}"))),
        }
    }
}

// ── Encoder ──────────────────────────────────────────────────────

/// A resolved encoder: format plus backend function. Cheap to copy into
/// worker jobs.
#[derive(Clone, Copy)]
pub struct Encoder {
    kind: EncoderKind,
    encode_fn: EncodeFn,
}

impl Encoder {
    /// Effective format (after fallback).
    pub fn kind(&self) -> EncoderKind {
        self.kind
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    /// Encode pixels. Empty frames produce empty content.
    pub fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, RcaError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        (self.encode_fn)(frame, quality.min(100))
    }

    /// Encode and attach the frame metadata published with it.
    pub fn encode_with_meta(
        &self,
        frame: &RawFrame,
        quality: u8,
        captured_at_ms: u64,
    ) -> Result<EncodedFrame, RcaError> {
        let content = self.encode(frame, quality)?;
        Ok(EncodedFrame {
            content: Bytes::from(content),
            meta: FrameMetadata::new(
                self.mime_type(),
                frame.width,
                frame.height,
                captured_at_ms,
                quality.min(100),
            ),
            captured_at_ms,
        })
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder").field("kind", &self.kind).finish()
    }
}

// ── Backends ─────────────────────────────────────────────────────

fn backend(kind: EncoderKind) -> EncodeFn {
    match kind {
        EncoderKind::Jpeg => encode_jpeg,
        EncoderKind::Png => encode_png,
        EncoderKind::Webp => encode_webp,
        #[cfg(feature = "avif")]
        EncoderKind::Avif => encode_avif,
        #[cfg(not(feature = "avif"))]
        EncoderKind::Avif => encode_jpeg,
    }
}

fn color_type(format: PixelFormat) -> ExtendedColorType {
    match format {
        PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
        PixelFormat::Rgba8 => ExtendedColorType::Rgba8,
    }
}

fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, RcaError> {
    // JPEG has no alpha channel.
    let rgb = frame.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| RcaError::encode("jpeg", e))?;
    Ok(out)
}

fn encode_png(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, RcaError> {
    let compression = match quality {
        0..50 => CompressionType::Fast,
        50..90 => CompressionType::Default,
        _ => CompressionType::Best,
    };
    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive)
        .write_image(&frame.data, frame.width, frame.height, color_type(frame.format))
        .map_err(|e| RcaError::encode("png", e))?;
    Ok(out)
}

fn encode_webp(frame: &RawFrame, _quality: u8) -> Result<Vec<u8>, RcaError> {
    let mut out = Vec::new();
    WebPEncoder::new_lossless(&mut out)
        .write_image(&frame.data, frame.width, frame.height, color_type(frame.format))
        .map_err(|e| RcaError::encode("webp", e))?;
    Ok(out)
}

#[cfg(feature = "avif")]
fn encode_avif(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, RcaError> {
    use image::codecs::avif::AvifEncoder;

    let mut out = Vec::new();
    AvifEncoder::new_with_speed_quality(&mut out, 8, quality.clamp(1, 100))
        .write_image(&frame.data, frame.width, frame.height, color_type(frame.format))
        .map_err(|e| RcaError::encode("avif", e))?;
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────

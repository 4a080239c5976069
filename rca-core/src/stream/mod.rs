//! # stream: render scheduling and adaptive frame delivery
//!
//! ## Architecture
//!
//! ```text
//! SERVER                                         CLIENT
//! ┌──────────────────────────────┐              ┌─────────────────────┐
//! │ ViewAdapter (per area)       │              │ StreamClient        │
//! │   ↓ resize / interaction     │              │   rca.size          │
//! │ FrameSource                  │  ◄────────── │   rca.event         │
//! │   ↑ capture_frame            │              │                     │
//! │ RenderScheduler              │              │                     │
//! │   ↓ EncodePool (parallel)    │   publish    │   StreamFrame       │
//! │ StreamRegistry::push_content │  ──────────► │   FrameStats        │
//! └──────────────────────────────┘              └─────────────────────┘
//! ```
//!
//! ## Sub-modules
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `types`     | Raw and encoded frame types, frame metadata          |
//! | `source`    | `FrameSource` trait implemented by renderers         |
//! | `input`     | Interaction events, size specs, release filtering    |
//! | `encoder`   | JPEG / PNG / WebP / AVIF still-image encoders        |
//! | `pool`      | Shared worker pool for encode jobs                   |
//! | `scheduler` | Request coalescing, two-phase quality, ordered push  |
//! | `view`      | Per-area adapter registered with a stream registry   |
//! | `stats`     | Receive-side frame rate and throughput estimation    |
//! | `client`    | Client side of a stream connection                   |
//! | `throttle`  | Client-side event rate limiting and compression      |

pub mod client;
pub mod encoder;
pub mod input;
pub mod pool;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod throttle;
pub mod types;
pub mod view;

// ── Re-exports ───────────────────────────────────────────────────

pub use client::{StreamClient, StreamFrame};
pub use encoder::{Encoder, EncoderKind};
pub use input::{InteractionEvent, ReleaseFilter, SizeSpec};
pub use pool::EncodePool;
pub use scheduler::{PushCallback, RenderScheduler, SchedulerConfig, SchedulerStats};
pub use source::{FrameSource, SharedSource, SourceCapabilities};
pub use stats::{FrameStats, ThroughputEstimator};
pub use throttle::EventThrottle;
pub use types::{EncodedFrame, FrameMetadata, PixelFormat, RawFrame};
pub use view::ViewAdapter;

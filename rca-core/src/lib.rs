//! # rca-core
//!
//! Core library for remote-controlled areas: server-side renderers whose
//! frames are streamed to a remote client that drives them with resize
//! and interaction events.
//!
//! This crate contains:
//! - **Stream pipeline**: `RenderScheduler`, `EncodePool`, encoders and the
//!   `FrameSource` renderer seam
//! - **Areas**: `ViewAdapter` and the per-connection `StreamRegistry`
//! - **Wire protocol**: `PacketHeader`, `Packet`, `Message`, `PacketFlags`
//! - **Codec**: `RcaCodec` for framed I/O via `tokio_util`
//! - **Network**: `Connection` over any async byte stream
//! - **Client**: `StreamClient` for the remote side
//! - **Error**: `RcaError`, a typed `thiserror` hierarchy

pub mod codec;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod network;
pub mod packet;
pub mod protocol;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::RcaCodec;
pub use error::RcaError;
pub use flags::PacketFlags;
pub use header::{HEADER_SIZE, PacketHeader};
pub use message::{Message, RpcMethod, STREAM_TOPIC};
pub use network::{Connection, ConnectionInfo, ConnectionSender};
pub use packet::{MAX_FRAME_SIZE, Packet};
pub use protocol::{AreaHandler, StreamRegistry, Streamer};
pub use stream::{
    EncodePool, EncoderKind, EventThrottle, FrameMetadata, FrameSource, InteractionEvent, RawFrame,
    RenderScheduler, SchedulerConfig, SizeSpec, StreamClient, StreamFrame, ViewAdapter,
};

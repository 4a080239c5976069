//! Multi-area relay protocol.
//!
//! Any number of independently rendered areas share one client
//! connection. The [`StreamRegistry`] routes inbound RPCs to the area
//! they name and publishes every area's frames on a single topic, tagged
//! with the area name and carrying the image as a binary attachment.

pub mod registry;

pub use registry::{AreaHandler, StreamRegistry, Streamer};

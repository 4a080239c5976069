//! # rca-server: remote-controlled area stream server
//!
//! Listens for client connections over TCP. Every connection gets its
//! own [`StreamRegistry`](rca_core::StreamRegistry) populated with the
//! configured areas, each backed by a synthetic test-pattern renderer,
//! so the full pipeline (resize, interaction, adaptive encoding, frame
//! publishing) can be exercised without a real 3D scene.

pub mod config;
pub mod pattern;
pub mod service;

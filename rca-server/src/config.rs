//! Configuration for the RCA stream server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rca_core::{EncodePool, EncoderKind, RcaError, SchedulerConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Render scheduling and encoding.
    pub stream: StreamConfig,
    /// Areas offered to every connection.
    pub areas: AreasConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the listener on.
    pub bind_address: String,
    /// TCP port for client connections.
    pub port: u16,
    /// Outbound packets queued per connection before frames are dropped.
    pub outbound_queue: usize,
}

/// Render scheduling and encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame-rate ceiling (1-120).
    pub target_fps: f64,
    /// Encode quality while the client interacts (0-100).
    pub interactive_quality: u8,
    /// Encode quality of the settle frame (0-100).
    pub still_quality: u8,
    /// Idle frame intervals before the settle frame.
    pub settle_periods: u32,
    /// Image format: "jpeg", "png", "webp" or "avif".
    pub encoder: String,
    /// How long closing an area waits for in-flight frames.
    pub close_grace_ms: u64,
    /// Encode threads; 0 uses the shared pool sized to the CPU count.
    pub encode_workers: usize,
    /// Render after every forwarded interaction event.
    pub render_on_interaction: bool,
}

/// Areas created for every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AreasConfig {
    /// Area names.
    pub names: Vec<String>,
    /// Initial render size of the test pattern, in device pixels.
    pub pattern_width: u32,
    pub pattern_height: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 9400,
            outbound_queue: 32,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            target_fps: scheduler.target_fps,
            interactive_quality: scheduler.interactive_quality,
            still_quality: scheduler.still_quality,
            settle_periods: scheduler.settle_periods,
            encoder: scheduler.encoder.name().into(),
            close_grace_ms: scheduler.close_grace.as_millis() as u64,
            encode_workers: 0,
            render_on_interaction: true,
        }
    }
}

impl Default for AreasConfig {
    fn default() -> Self {
        Self {
            names: vec!["view".into()],
            pattern_width: 300,
            pattern_height: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// `host:port` to listen on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.port)
    }

    /// Convert stream settings into a `SchedulerConfig`, clamping values
    /// into their accepted ranges.
    pub fn to_scheduler_config(&self) -> Result<SchedulerConfig, RcaError> {
        let stream = &self.stream;
        let fps = if stream.target_fps.is_finite() {
            stream.target_fps.clamp(1.0, 120.0)
        } else {
            SchedulerConfig::default().target_fps
        };
        let encoder: EncoderKind = stream.encoder.parse()?;

        Ok(SchedulerConfig::default()
            .with_target_fps(fps)
            .with_qualities(stream.interactive_quality.min(100), stream.still_quality.min(100))
            .with_settle_periods(stream.settle_periods.max(1))
            .with_encoder(encoder)
            .with_close_grace(Duration::from_millis(stream.close_grace_ms)))
    }

    /// The encode pool areas should share.
    pub fn encode_pool(&self) -> Arc<EncodePool> {
        match self.stream.encode_workers {
            0 => EncodePool::shared(),
            n => Arc::new(EncodePool::new(n)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

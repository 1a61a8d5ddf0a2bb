//! Configuration for the render node.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tilecast_core::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SOCKET_BUFFER, ImageEncoding, NodeOptions, Pacing, SessionConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    /// How rendered tiles are compressed on the wire.
    pub encoding: EncodingConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Composer host name or IP.
    pub composer_address: String,
    pub port: u16,
    /// Give up connecting after this long.
    pub connect_timeout_ms: u64,
    /// Cap on rendered fragments per second (0 = uncapped).
    pub fragments_per_second: f32,
    /// Re-send the last fragment this often so a lost one heals (0 = never).
    pub resend_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Composer silent for this long counts as gone.
    pub peer_timeout_ms: u64,
    /// Largest datagram sent.
    pub mtu: usize,
    /// Paced send rate per peer in bytes per second (0 = unpaced).
    pub send_rate_bytes: u64,
    /// Kernel socket buffer to request (0 = OS default).
    pub socket_buffer_bytes: usize,
    /// Period of the socket drain between frames.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    Raw,
    Zstd,
    Jpeg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// "raw", "zstd" or "jpeg".
    pub format: EncodingFormat,
    /// zstd level (1-19).
    pub zstd_level: i32,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// CPU ray-marched volume.
    Volume,
    /// One solid color per tile.
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub renderer: RendererKind,
    /// Ray-march samples across the volume.
    pub steps: u32,
    /// Background color, RGB in `[0, 1]`.
    pub background: [f32; 3],
    /// Frame loop rate.
    pub tick_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            encoding: EncodingConfig::default(),
            render: RenderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            composer_address: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            fragments_per_second: 30.0,
            resend_interval_ms: 500,
            heartbeat_interval_ms: 1000,
            peer_timeout_ms: 5000,
            mtu: 1400,
            send_rate_bytes: Pacing::default().rate,
            socket_buffer_bytes: DEFAULT_SOCKET_BUFFER,
            poll_interval_ms: 2,
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            format: EncodingFormat::Zstd,
            zstd_level: 1,
            jpeg_quality: 85,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Volume,
            steps: 96,
            background: [0.05, 0.05, 0.08],
            tick_rate: 120,
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

impl NodeConfig {
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

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            mtu: self.network.mtu.max(64),
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.network.heartbeat_interval_ms.max(10)),
            peer_timeout: Duration::from_millis(self.network.peer_timeout_ms.max(100)),
            pacing: Pacing {
                rate: self.network.send_rate_bytes,
                ..Pacing::default()
            },
            socket_buffer_size: self.network.socket_buffer_bytes,
            ..SessionConfig::default()
        }
    }

    pub fn image_encoding(&self) -> ImageEncoding {
        match self.encoding.format {
            EncodingFormat::Raw => ImageEncoding::Raw,
            EncodingFormat::Zstd => ImageEncoding::Zstd {
                level: self.encoding.zstd_level.clamp(1, 19),
            },
            EncodingFormat::Jpeg => ImageEncoding::Jpeg {
                quality: self.encoding.jpeg_quality.clamp(1, 100),
            },
        }
    }

    pub fn to_node_options(&self) -> NodeOptions {
        NodeOptions {
            encoding: self.image_encoding(),
            fragments_per_second: self.network.fragments_per_second,
            resend_interval: Duration::from_millis(self.network.resend_interval_ms),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

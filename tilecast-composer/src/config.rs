//! Composer configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tilecast_core::{
    CameraIntrinsics, DEFAULT_HOST, DEFAULT_MAX_PEERS, DEFAULT_PORT, DEFAULT_SOCKET_BUFFER, Pacing,
    RenderParameters, SessionConfig, TileError,
};

/// Top-level configuration for the composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub network: NetworkConfig,
    pub camera: CameraConfig,
    pub composite: CompositeConfig,
    /// Initial render parameters broadcast to nodes.
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind.
    pub bind_address: String,
    pub port: u16,
    /// Render nodes beyond this are refused.
    pub max_peers: usize,
    /// State broadcast rate cap (0 = every tick).
    pub updates_per_second: f32,
    pub heartbeat_interval_ms: u64,
    /// Render node silent for this long is dropped.
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Orbit speed in degrees per second.
    pub orbit_speed: f32,
    pub orbit_radius: f32,
    pub orbit_height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub frame_rate: u32,
    /// Where to write PNG snapshots of the composite. Empty disables.
    pub snapshot_path: String,
    pub snapshot_interval_secs: u64,
    /// RGBA shown where no tile has arrived.
    pub background: [u8; 4],
    /// Fixed `[x, y]` grid instead of the automatic shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles: Option<[u32; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// 0 = direct volume rendering, 1 = iso-surface.
    pub pass: i32,
    /// 0.0 to 2.0.
    pub opacity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            camera: CameraConfig::default(),
            composite: CompositeConfig::default(),
            render: RenderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            max_peers: DEFAULT_MAX_PEERS,
            updates_per_second: 30.0,
            heartbeat_interval_ms: 1000,
            peer_timeout_ms: 5000,
            mtu: 1400,
            send_rate_bytes: Pacing::default().rate,
            socket_buffer_bytes: DEFAULT_SOCKET_BUFFER,
            poll_interval_ms: 2,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 60.0,
            near: 0.3,
            far: 1000.0,
            screen_width: 1280,
            screen_height: 720,
            orbit_speed: 20.0,
            orbit_radius: 2.0,
            orbit_height: 0.5,
        }
    }
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            snapshot_path: String::new(),
            snapshot_interval_secs: 5,
            background: [0, 0, 0, 255],
            tiles: None,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        let params = RenderParameters::default();
        Self {
            pass: params.pass,
            opacity: params.opacity,
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

impl ComposerConfig {
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

    pub fn bind_addr(&self) -> Result<SocketAddr, TileError> {
        let ip: IpAddr = self
            .network
            .bind_address
            .parse()
            .map_err(|_| TileError::InvalidAddress(self.network.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.network.port))
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            max_peers: self.network.max_peers,
            mtu: self.network.mtu.max(64),
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

    pub fn camera_intrinsics(&self) -> CameraIntrinsics {
        CameraIntrinsics::for_screen(
            self.camera.fov,
            self.camera.near,
            self.camera.far,
            self.camera.screen_width,
            self.camera.screen_height,
        )
    }

    pub fn render_parameters(&self) -> RenderParameters {
        RenderParameters {
            pass: self.render.pass,
            opacity: self.render.opacity,
        }
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.composite.snapshot_path.is_empty()).then(|| PathBuf::from(&self.composite.snapshot_path))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ComposerConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("max_peers = 12"));
        assert!(text.contains("port = 7075"));
        assert!(!text.contains("tiles"));
    }

    #[test]
    fn roundtrip_config() {
        let mut cfg = ComposerConfig::default();
        cfg.composite.tiles = Some([3, 2]);
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ComposerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.composite.tiles, Some([3, 2]));
        assert_eq!(parsed.camera.screen_width, 1280);
    }

    #[test]
    fn bind_addr_parses() {
        let cfg = ComposerConfig::default();
        assert_eq!(cfg.bind_addr().unwrap(), "127.0.0.1:7075".parse().unwrap());

        let mut bad = ComposerConfig::default();
        bad.network.bind_address = "not an ip".into();
        assert!(matches!(bad.bind_addr(), Err(TileError::InvalidAddress(_))));
    }

    #[test]
    fn session_and_camera_from_config() {
        let mut cfg = ComposerConfig::default();
        cfg.network.max_peers = 4;
        cfg.camera.screen_width = 800;
        cfg.camera.screen_height = 400;
        cfg.network.send_rate_bytes = 0;
        let session = cfg.to_session_config();
        assert_eq!(session.max_peers, 4);
        assert!(!session.pacing.is_paced());
        assert_eq!(session.socket_buffer_size, DEFAULT_SOCKET_BUFFER);
        let cam = cfg.camera_intrinsics();
        assert!((cam.aspect - 2.0).abs() < 1e-6);
        assert!(cfg.snapshot_path().is_none());
    }
}

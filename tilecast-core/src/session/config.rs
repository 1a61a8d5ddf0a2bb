//! Session roles and tuning knobs.

use std::fmt;
use std::time::Duration;

use crate::error::DecodeError;
use crate::net::{DEFAULT_MTU, DEFAULT_SOCKET_BUFFER, Pacing};

/// Port the composer listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 7075;

/// Composer address a render node dials by default.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Render nodes a composer accepts by default.
pub const DEFAULT_MAX_PEERS: usize = 12;

// ── Role ─────────────────────────────────────────────────────────

/// Which side of the session this process plays. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    Composer = 1,
    RenderNode = 2,
}

impl Role {
    /// The role this one accepts connections from.
    pub fn accepts(&self, remote: Role) -> bool {
        matches!((self, remote), (Role::Composer, Role::RenderNode))
    }
}

impl TryFrom<u8> for Role {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Role::Composer),
            2 => Ok(Role::RenderNode),
            _ => Err(DecodeError::InvalidField("role")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Composer => write!(f, "composer"),
            Role::RenderNode => write!(f, "render node"),
        }
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// Runtime parameters of a [`SessionManager`](super::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Composer only: connections beyond this are rejected.
    pub max_peers: usize,
    /// Largest datagram the session sends.
    pub mtu: usize,
    /// Reassembled messages above this size are dropped.
    pub max_message_size: usize,
    pub heartbeat_interval: Duration,
    /// A peer silent for this long is disconnected.
    pub peer_timeout: Duration,
    /// Render node only: give up the handshake after this long.
    pub connect_timeout: Duration,
    /// Render node only: `Connect` retransmit period.
    pub connect_retry: Duration,
    /// Upper bound on datagrams drained by one `poll`.
    pub max_datagrams_per_poll: usize,
    /// Per-peer send pacing for message chunks.
    pub pacing: Pacing,
    /// Kernel socket buffer requested by `start_as_*`. `0` keeps the OS default.
    pub socket_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_peers: DEFAULT_MAX_PEERS,
            mtu: DEFAULT_MTU,
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval: Duration::from_secs(1),
            peer_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            connect_retry: Duration::from_millis(250),
            max_datagrams_per_poll: 4096,
            pacing: Pacing::default(),
            socket_buffer_size: DEFAULT_SOCKET_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composer_accepts_only_render_nodes() {
        assert!(Role::Composer.accepts(Role::RenderNode));
        assert!(!Role::Composer.accepts(Role::Composer));
        assert!(!Role::RenderNode.accepts(Role::Composer));
        assert!(!Role::RenderNode.accepts(Role::RenderNode));
    }

    #[test]
    fn role_byte() {
        assert_eq!(Role::try_from(2).unwrap(), Role::RenderNode);
        assert_eq!(Role::try_from(0), Err(DecodeError::InvalidField("role")));
    }

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_peers, 12);
        assert_eq!(config.mtu, DEFAULT_MTU);
        assert!(config.peer_timeout > config.heartbeat_interval);
        assert!(config.pacing.is_paced());
        // One burst must hold at least a full datagram.
        assert!(config.pacing.burst >= config.mtu);
        assert!(config.pacing.max_queued >= config.max_message_size);
    }
}

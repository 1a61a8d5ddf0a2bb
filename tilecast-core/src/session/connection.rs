//! Per-connection lifecycle.
//!
//! Each [`Connection`] carries a [`ConnectionPhase`] with validated
//! transitions that return `Result` instead of panicking.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::config::Role;
use crate::error::TileError;
use crate::net::{Outbox, Pacing, Reassembler};

// ── ConnectionId ─────────────────────────────────────────────────

/// Opaque handle of one live connection, unique for the session lifetime.
///
/// Ids grow monotonically, so ordering by id is connection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── ConnectionPhase ──────────────────────────────────────────────

/// ```text
///  Connecting ──► Connected ──► Disconnected
///       │                            ▲
///       └────────────────────────────┘
/// ```
///
/// `Disconnected` is terminal; a returning peer gets a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Connecting,

    Connected {
        since: Instant,
    },

    Disconnected,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the connection has been up. `None` unless `Connected`.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete(&mut self, now: Instant) -> Result<(), TileError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected { since: now };
                Ok(())
            }
            _ => Err(TileError::InvalidTransition(
                "cannot complete: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Connected`.
    pub fn close(&mut self) -> Result<(), TileError> {
        match self {
            Self::Connecting | Self::Connected { .. } => {
                *self = Self::Disconnected;
                Ok(())
            }
            Self::Disconnected => Err(TileError::InvalidTransition(
                "cannot close: already Disconnected",
            )),
        }
    }
}

// ── Connection ───────────────────────────────────────────────────

/// Everything the session knows about one remote peer.
pub struct Connection {
    pub id: ConnectionId,
    pub role: Role,
    pub addr: SocketAddr,
    pub phase: ConnectionPhase,
    pub last_heard: Instant,
    pub last_sent: Instant,
    pub(crate) reassembler: Reassembler,
    pub(crate) outbox: Outbox,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        role: Role,
        addr: SocketAddr,
        now: Instant,
        max_message_size: usize,
        pacing: Pacing,
    ) -> Self {
        Self {
            id,
            role,
            addr,
            phase: ConnectionPhase::Connecting,
            last_heard: now,
            last_sent: now,
            reassembler: Reassembler::new(max_message_size),
            outbox: Outbox::new(pacing, now),
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            role: self.role,
            addr: self.addr,
            phase: self.phase.clone(),
        }
    }
}

/// Snapshot of a connection for callers outside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub role: Role,
    pub addr: SocketAddr,
    pub phase: ConnectionPhase,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = ConnectionPhase::default();
        assert_eq!(phase, ConnectionPhase::Connecting);

        phase.complete(Instant::now()).unwrap();
        assert!(phase.is_connected());
        assert!(phase.connected_duration().is_some());

        phase.close().unwrap();
        assert!(phase.is_disconnected());
    }

    #[test]
    fn disconnected_is_terminal() {
        let mut phase = ConnectionPhase::Disconnected;
        assert!(phase.complete(Instant::now()).is_err());
        assert!(phase.close().is_err());
        assert!(phase.is_disconnected());
    }

    #[test]
    fn cannot_complete_twice() {
        let mut phase = ConnectionPhase::Connecting;
        phase.complete(Instant::now()).unwrap();
        assert!(matches!(
            phase.complete(Instant::now()),
            Err(TileError::InvalidTransition(_))
        ));
    }

    #[test]
    fn close_from_connecting() {
        let mut phase = ConnectionPhase::Connecting;
        phase.close().unwrap();
        assert!(phase.is_disconnected());
        assert!(phase.connected_duration().is_none());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::Connecting.to_string(), "Connecting");
        assert_eq!(
            ConnectionPhase::Connected {
                since: Instant::now()
            }
            .to_string(),
            "Connected"
        );
        assert_eq!(ConnectionPhase::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionId(3).to_string(), "#3");
    }
}

//! Domain-specific error types for tilecast.
//!
//! All fallible operations return `Result<T, TileError>`.
//! Per-packet and per-peer failures are logged by the session layer and
//! never unwind into the frame loop; only startup failures reach `main`.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for tilecast.
#[derive(Debug, Error)]
pub enum TileError {
    // ── Startup Errors ───────────────────────────────────────────
    /// The session socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The composer did not answer the handshake in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The composer refused the handshake.
    #[error("connect to {addr} refused: {reason}")]
    ConnectRefused { addr: String, reason: RejectReason },

    /// The remote address could not be resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// A send or receive on the socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The session was shut down (or never started).
    #[error("session is not running")]
    SessionClosed,

    /// A connection was asked to move to a phase it cannot reach.
    #[error("invalid connection transition: {0}")]
    InvalidTransition(&'static str),

    /// No live connection carries this id.
    #[error("unknown connection {0}")]
    UnknownConnection(u32),

    /// A message does not fit in the fragment space of the channel.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    // ── Protocol Errors ──────────────────────────────────────────
    /// A packet or payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A field does not fit its wire representation.
    #[error("{0} out of range for the wire format")]
    FieldRange(&'static str),

    // ── Topology / Domain Errors ─────────────────────────────────
    /// The tile grid is degenerate (no peers, zero tiles).
    #[error("topology error: {0}")]
    Topology(String),

    /// Projection math would divide by zero.
    #[error("domain error: {0}")]
    Domain(&'static str),

    /// Render parameters outside `pass ∈ {0,1}`, `opacity ∈ [0,2]`.
    #[error("invalid render parameters: pass {pass}, opacity {opacity}")]
    InvalidRenderParameters { pass: i32, opacity: f32 },

    // ── Rendering / Encoding Errors ──────────────────────────────
    /// Fragment encoding or decoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The renderer has no tile or no scene state yet.
    #[error("renderer not ready: {0}")]
    NotReady(&'static str),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Typed failure for anything read off the wire.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// The message tag has no registered decoder.
    #[error("unknown message tag {0}")]
    UnknownTag(u16),

    /// The datagram kind byte is not part of the connection layer.
    #[error("unknown datagram kind {0:#x}")]
    UnknownDatagram(u8),

    /// Fewer bytes remain than the field needs.
    #[error("truncated {what}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// Bytes were left over after a fixed-layout payload.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// A field held a value outside its domain.
    #[error("invalid field {0}")]
    InvalidField(&'static str),

    /// The reassembled message failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Decoded image dimensions do not match the cached tile buffer.
    #[error("image is {actual:?}, tile buffer is {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

// ── RejectReason ─────────────────────────────────────────────────

/// Why a composer turned down a `Connect` datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    /// `max_peers` connections are already live.
    Full = 1,
    /// The peer announced a role the composer does not accept.
    WrongRole = 2,
    /// The peer speaks a different protocol version.
    VersionMismatch = 3,
}

impl TryFrom<u8> for RejectReason {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RejectReason::Full),
            2 => Ok(RejectReason::WrongRole),
            3 => Ok(RejectReason::VersionMismatch),
            _ => Err(DecodeError::InvalidField("reject reason")),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Full => write!(f, "composer is full"),
            RejectReason::WrongRole => write!(f, "wrong role"),
            RejectReason::VersionMismatch => write!(f, "protocol version mismatch"),
        }
    }
}

impl From<image::ImageError> for TileError {
    fn from(e: image::ImageError) -> Self {
        TileError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TileError::MessageTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = TileError::Domain("numTiles.x is zero");
        assert!(e.to_string().contains("numTiles.x"));
    }

    #[test]
    fn from_decode() {
        let e: TileError = DecodeError::UnknownTag(4242).into();
        assert!(matches!(e, TileError::Decode(DecodeError::UnknownTag(4242))));
        assert!(e.to_string().contains("4242"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TileError = io_err.into();
        assert!(matches!(e, TileError::Transport(_)));
    }

    #[test]
    fn reject_reason_roundtrip() {
        for reason in [
            RejectReason::Full,
            RejectReason::WrongRole,
            RejectReason::VersionMismatch,
        ] {
            assert_eq!(RejectReason::try_from(reason as u8).unwrap(), reason);
        }
        assert!(RejectReason::try_from(0).is_err());
    }
}

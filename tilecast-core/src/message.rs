//! Message tags for the tilecast wire protocol.
//!
//! Unknown tags surface as [`DecodeError::UnknownTag`].

use crate::error::DecodeError;
use std::fmt;

// ── MessageTag ───────────────────────────────────────────────────

/// Stable numeric tag written as the 16-bit prefix of every message.
///
/// - `1000`: scene state (composer → nodes)
/// - `1001`: tile assignment (composer → one node)
/// - `1002`: render parameters (composer → nodes)
/// - `1003`: tile image fragment (node → composer)
/// - `1004`: tile revoked, empty payload (composer → one node)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    SceneState = 1000,
    TileAssignment = 1001,
    RenderParameters = 1002,
    TileImageFragment = 1003,
    TileRevoked = 1004,
}

impl TryFrom<u16> for MessageTag {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(MessageTag::SceneState),
            1001 => Ok(MessageTag::TileAssignment),
            1002 => Ok(MessageTag::RenderParameters),
            1003 => Ok(MessageTag::TileImageFragment),
            1004 => Ok(MessageTag::TileRevoked),
            _ => Err(DecodeError::UnknownTag(value)),
        }
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl MessageTag {
    /// Returns `true` for the state kinds the composer coalesces per tick.
    pub fn is_coalesced(&self) -> bool {
        matches!(self, MessageTag::SceneState | MessageTag::RenderParameters)
    }
}

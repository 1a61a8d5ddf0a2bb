//! Typed messages and their binary encoding.
//!
//! One [`Message`] per transport message: a `u16` little-endian tag from
//! [`MessageTag`] followed by a fixed-layout payload. [`MessageCodec`] plugs
//! the same encoding into `tokio_util` framing.

pub mod payload;
pub mod wire;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, TileError};
use crate::message::MessageTag;
use crate::tile::ScreenTile;

pub use payload::{RenderParameters, SceneState, TileAssignment, TileImageFragment};
pub use wire::WireReader;

/// Size of the tag prefix.
pub const TAG_SIZE: usize = 2;

// ── Message ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SceneState(SceneState),
    TileAssignment(ScreenTile),
    RenderParameters(RenderParameters),
    TileImageFragment(TileImageFragment),
    /// The receiving node no longer holds a tile.
    TileRevoked,
}

impl Message {
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::SceneState(_) => MessageTag::SceneState,
            Message::TileAssignment(_) => MessageTag::TileAssignment,
            Message::RenderParameters(_) => MessageTag::RenderParameters,
            Message::TileImageFragment(_) => MessageTag::TileImageFragment,
            Message::TileRevoked => MessageTag::TileRevoked,
        }
    }

    /// Append tag and payload to `dst`. On error `dst` is left as it was.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), TileError> {
        let start = dst.len();
        dst.put_u16_le(self.tag() as u16);
        let written = match self {
            Message::SceneState(s) => {
                s.encode(dst);
                Ok(())
            }
            Message::TileAssignment(t) => TileAssignment::encode(t, dst),
            Message::RenderParameters(p) => {
                p.encode(dst);
                Ok(())
            }
            Message::TileImageFragment(f) => f.encode(dst),
            Message::TileRevoked => Ok(()),
        };
        if written.is_err() {
            dst.truncate(start);
        }
        written
    }

    pub fn to_bytes(&self) -> Result<Bytes, TileError> {
        let mut buf = BytesMut::with_capacity(TAG_SIZE + self.payload_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::SceneState(_) => SceneState::SIZE,
            Message::TileAssignment(_) => TileAssignment::SIZE,
            Message::RenderParameters(_) => RenderParameters::SIZE,
            Message::TileImageFragment(f) => f.encoded_len(),
            Message::TileRevoked => 0,
        }
    }

    /// Decode exactly one message; leftover bytes are an error.
    pub fn decode(buf: Bytes) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(buf);
        let tag = MessageTag::try_from(r.u16("tag")?)?;
        let message = match tag {
            MessageTag::SceneState => Message::SceneState(SceneState::decode(&mut r)?),
            MessageTag::TileAssignment => Message::TileAssignment(TileAssignment::decode(&mut r)?),
            MessageTag::RenderParameters => {
                Message::RenderParameters(RenderParameters::decode(&mut r)?)
            }
            MessageTag::TileImageFragment => {
                Message::TileImageFragment(TileImageFragment::decode(&mut r)?)
            }
            MessageTag::TileRevoked => Message::TileRevoked,
        };
        r.finish()?;
        Ok(message)
    }
}

// ── MessageCodec ─────────────────────────────────────────────────

/// Datagram codec: every call to `decode` treats the whole buffer as one
/// message and consumes it, so a malformed message never wedges the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = TileError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let packet = src.split().freeze();
        Ok(Some(Message::decode(packet)?))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = TileError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = TileError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

// ── Tests ────────────────────────────────────────────────────────

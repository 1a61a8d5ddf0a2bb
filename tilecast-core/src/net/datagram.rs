//! Connection-layer datagrams.
//!
//! Every UDP datagram starts with one kind byte. Control datagrams carry a
//! few fixed fields; `Chunk` datagrams carry one slice of an encoded
//! [`Message`](crate::protocol::Message).
//!
//! ## Wire format
//!
//! ```text
//! Connect     0x01  role: u8, version: u16
//! Accept      0x02  connection_id: u32
//! Reject      0x03  reason: u8
//! Disconnect  0x04
//! Heartbeat   0x05
//! Chunk       0x06  sequence: u32, index: u16, count: u16, checksum: u32, data
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, RejectReason, TileError};
use crate::session::Role;

// ── Constants ────────────────────────────────────────────────────

/// Bumped whenever the message layout changes.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default datagram budget: Ethernet MTU minus IP (20) and UDP (8) headers,
/// rounded down.
pub const DEFAULT_MTU: usize = 1400;

const KIND_CONNECT: u8 = 0x01;
const KIND_ACCEPT: u8 = 0x02;
const KIND_REJECT: u8 = 0x03;
const KIND_DISCONNECT: u8 = 0x04;
const KIND_HEARTBEAT: u8 = 0x05;
const KIND_CHUNK: u8 = 0x06;

// ── ChunkHeader ──────────────────────────────────────────────────

/// Per-chunk metadata following the kind byte of a `Chunk` datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Per-sender message counter.
    pub sequence: u32,
    pub index: u16,
    pub count: u16,
    /// First four bytes of the blake3 hash of the whole message.
    pub checksum: u32,
}

impl ChunkHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 12;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..6].copy_from_slice(&self.index.to_le_bytes());
        buf[6..8].copy_from_slice(&self.count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::Truncated {
                what: "chunk header",
                needed: Self::SIZE,
                remaining: data.len(),
            });
        }
        let header = Self {
            sequence: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            index: u16::from_le_bytes([data[4], data[5]]),
            count: u16::from_le_bytes([data[6], data[7]]),
            checksum: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        };
        if header.count == 0 || header.index >= header.count {
            return Err(DecodeError::InvalidField("chunk index"));
        }
        Ok(header)
    }
}

/// Message checksum carried in every chunk.
pub fn checksum(data: &[u8]) -> u32 {
    let hash = blake3::hash(data);
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

// ── Datagram ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    Connect { role: Role, version: u16 },
    Accept { connection_id: u32 },
    Reject { reason: RejectReason },
    Disconnect,
    Heartbeat,
    Chunk { header: ChunkHeader, data: Bytes },
}

impl Datagram {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Datagram::Connect { role, version } => {
                buf.put_u8(KIND_CONNECT);
                buf.put_u8(*role as u8);
                buf.put_u16_le(*version);
            }
            Datagram::Accept { connection_id } => {
                buf.put_u8(KIND_ACCEPT);
                buf.put_u32_le(*connection_id);
            }
            Datagram::Reject { reason } => {
                buf.put_u8(KIND_REJECT);
                buf.put_u8(*reason as u8);
            }
            Datagram::Disconnect => buf.put_u8(KIND_DISCONNECT),
            Datagram::Heartbeat => buf.put_u8(KIND_HEARTBEAT),
            Datagram::Chunk { header, data } => {
                buf.reserve(1 + ChunkHeader::SIZE + data.len());
                buf.put_u8(KIND_CHUNK);
                buf.put_slice(&header.encode());
                buf.put_slice(data);
            }
        }
        buf.freeze()
    }

    pub fn decode(packet: Bytes) -> Result<Self, DecodeError> {
        let Some(&kind) = packet.first() else {
            return Err(DecodeError::Truncated {
                what: "datagram kind",
                needed: 1,
                remaining: 0,
            });
        };
        let body = &packet[1..];
        let exact = |what: &'static str, len: usize| -> Result<(), DecodeError> {
            match body.len() {
                n if n < len => Err(DecodeError::Truncated {
                    what,
                    needed: len,
                    remaining: n,
                }),
                n if n > len => Err(DecodeError::TrailingBytes(n - len)),
                _ => Ok(()),
            }
        };

        match kind {
            KIND_CONNECT => {
                exact("connect", 3)?;
                Ok(Datagram::Connect {
                    role: Role::try_from(body[0])?,
                    version: u16::from_le_bytes([body[1], body[2]]),
                })
            }
            KIND_ACCEPT => {
                exact("accept", 4)?;
                Ok(Datagram::Accept {
                    connection_id: u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
                })
            }
            KIND_REJECT => {
                exact("reject", 1)?;
                Ok(Datagram::Reject {
                    reason: RejectReason::try_from(body[0])?,
                })
            }
            KIND_DISCONNECT => {
                exact("disconnect", 0)?;
                Ok(Datagram::Disconnect)
            }
            KIND_HEARTBEAT => {
                exact("heartbeat", 0)?;
                Ok(Datagram::Heartbeat)
            }
            KIND_CHUNK => {
                let header = ChunkHeader::decode(body)?;
                Ok(Datagram::Chunk {
                    header,
                    data: packet.slice(1 + ChunkHeader::SIZE..),
                })
            }
            other => Err(DecodeError::UnknownDatagram(other)),
        }
    }
}

// ── Fragmentation ────────────────────────────────────────────────

/// Largest chunk payload that fits in one `mtu`-sized datagram.
pub fn chunk_capacity(mtu: usize) -> usize {
    mtu.saturating_sub(1 + ChunkHeader::SIZE).max(1)
}

/// Split an encoded message into `Chunk` datagrams of at most `mtu` bytes.
///
/// An empty message still produces one (empty) chunk.
pub fn fragment(message: &Bytes, sequence: u32, mtu: usize) -> Result<Vec<Bytes>, TileError> {
    let capacity = chunk_capacity(mtu);
    let count = message.len().div_ceil(capacity).max(1);
    if count > u16::MAX as usize {
        return Err(TileError::MessageTooLarge {
            size: message.len(),
            max: capacity * u16::MAX as usize,
        });
    }

    let checksum = checksum(message);
    let datagrams = (0..count)
        .map(|index| {
            let start = index * capacity;
            let end = (start + capacity).min(message.len());
            Datagram::Chunk {
                header: ChunkHeader {
                    sequence,
                    index: index as u16,
                    count: count as u16,
                    checksum,
                },
                data: message.slice(start..end),
            }
            .to_bytes()
        })
        .collect();
    Ok(datagrams)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_header_layout() {
        let header = ChunkHeader {
            sequence: 7,
            index: 3,
            count: 9,
            checksum: 0xDEAD_BEEF,
        };
        let encoded = header.encode();
        assert_eq!(&encoded[0..4], &7u32.to_le_bytes());
        assert_eq!(ChunkHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn chunk_header_too_short() {
        assert!(matches!(
            ChunkHeader::decode(&[0u8; 4]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn chunk_index_must_be_below_count() {
        let header = ChunkHeader {
            sequence: 1,
            index: 2,
            count: 2,
            checksum: 0,
        };
        assert_eq!(
            ChunkHeader::decode(&header.encode()),
            Err(DecodeError::InvalidField("chunk index"))
        );
    }

    #[test]
    fn control_datagrams_decode() {
        for datagram in [
            Datagram::Connect {
                role: Role::RenderNode,
                version: PROTOCOL_VERSION,
            },
            Datagram::Accept { connection_id: 12 },
            Datagram::Reject {
                reason: RejectReason::Full,
            },
            Datagram::Disconnect,
            Datagram::Heartbeat,
        ] {
            assert_eq!(Datagram::decode(datagram.to_bytes()).unwrap(), datagram);
        }
    }

    #[test]
    fn unknown_kind_and_empty_packet() {
        assert_eq!(
            Datagram::decode(Bytes::from_static(&[0x7F])),
            Err(DecodeError::UnknownDatagram(0x7F))
        );
        assert!(matches!(
            Datagram::decode(Bytes::new()),
            Err(DecodeError::Truncated { .. })
        ));
        assert_eq!(
            Datagram::decode(Bytes::from_static(&[KIND_HEARTBEAT, 0])),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn fragment_respects_mtu() {
        let message = Bytes::from(vec![0xAB; 5000]);
        let datagrams = fragment(&message, 3, 1400).unwrap();
        assert_eq!(datagrams.len(), 4);
        assert!(datagrams.iter().all(|d| d.len() <= 1400));

        let mut total = 0;
        for (i, d) in datagrams.into_iter().enumerate() {
            let Datagram::Chunk { header, data } = Datagram::decode(d).unwrap() else {
                panic!("expected chunk");
            };
            assert_eq!(header.sequence, 3);
            assert_eq!(header.index as usize, i);
            assert_eq!(header.count, 4);
            assert_eq!(header.checksum, checksum(&message));
            total += data.len();
        }
        assert_eq!(total, 5000);
    }

    #[test]
    fn empty_message_is_one_chunk() {
        let datagrams = fragment(&Bytes::new(), 0, 1400).unwrap();
        assert_eq!(datagrams.len(), 1);
    }

    #[test]
    fn oversized_message_rejected() {
        let message = Bytes::from(vec![0u8; 70_000]);
        assert!(matches!(
            fragment(&message, 0, 14),
            Err(TileError::MessageTooLarge { .. })
        ));
    }
}

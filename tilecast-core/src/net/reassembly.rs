//! Per-peer message reassembly.
//!
//! Only one message is in flight per sender at a time. A chunk from a newer
//! sequence discards the partial message; chunks from older sequences are
//! dropped. A lost chunk therefore loses its whole message.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::datagram::{ChunkHeader, checksum};
use crate::error::DecodeError;

/// `true` when `a` is after `b` in wrapping sequence space.
fn newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

struct Partial {
    sequence: u32,
    checksum: u32,
    chunks: Vec<Option<Bytes>>,
    received: usize,
    bytes: usize,
}

/// Reassembly state for one sender.
pub struct Reassembler {
    max_message_size: usize,
    partial: Option<Partial>,
    last_completed: Option<u32>,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
            last_completed: None,
        }
    }

    /// Sequence of the message currently being collected, if any.
    pub fn in_flight(&self) -> Option<u32> {
        self.partial.as_ref().map(|p| p.sequence)
    }

    /// Feed one chunk. Returns the whole message once its last chunk lands.
    pub fn push(&mut self, header: ChunkHeader, data: Bytes) -> Result<Option<Bytes>, DecodeError> {
        if let Some(done) = self.last_completed {
            if !newer(header.sequence, done) {
                debug!(sequence = header.sequence, "dropping chunk of completed message");
                return Ok(None);
            }
        }

        // Single-chunk messages skip the buffer entirely.
        if header.count == 1 {
            if let Some(p) = &self.partial {
                if !newer(header.sequence, p.sequence) && header.sequence != p.sequence {
                    return Ok(None);
                }
            }
            self.partial = None;
            return self.complete(header.sequence, header.checksum, data);
        }

        let (same, stale) = match &self.partial {
            Some(p) if p.sequence == header.sequence => (
                true,
                p.chunks.len() != header.count as usize || p.checksum != header.checksum,
            ),
            Some(p) if !newer(header.sequence, p.sequence) => {
                debug!(
                    sequence = header.sequence,
                    in_flight = p.sequence,
                    "dropping chunk of stale message"
                );
                return Ok(None);
            }
            Some(p) => {
                debug!(
                    discarded = p.sequence,
                    received = p.received,
                    total = p.chunks.len(),
                    "newer message started, discarding partial"
                );
                (false, false)
            }
            None => (false, false),
        };
        if same && stale {
            self.partial = None;
            return Err(DecodeError::InvalidField("chunk count"));
        }
        if !same {
            self.partial = Some(Partial {
                sequence: header.sequence,
                checksum: header.checksum,
                chunks: vec![None; header.count as usize],
                received: 0,
                bytes: 0,
            });
        }

        let Some(partial) = self.partial.as_mut() else {
            return Ok(None);
        };
        let slot = &mut partial.chunks[header.index as usize];
        if slot.is_some() {
            return Ok(None); // duplicate
        }
        partial.bytes += data.len();
        if partial.bytes > self.max_message_size {
            self.partial = None;
            return Err(DecodeError::InvalidField("message size"));
        }
        *slot = Some(data);
        partial.received += 1;
        if partial.received < partial.chunks.len() {
            return Ok(None);
        }

        let Some(partial) = self.partial.take() else {
            return Ok(None);
        };
        let mut message = BytesMut::with_capacity(partial.bytes);
        for chunk in partial.chunks.into_iter().flatten() {
            message.extend_from_slice(&chunk);
        }
        self.complete(partial.sequence, partial.checksum, message.freeze())
    }

    fn complete(
        &mut self,
        sequence: u32,
        expected: u32,
        message: Bytes,
    ) -> Result<Option<Bytes>, DecodeError> {
        self.last_completed = Some(sequence);
        if message.len() > self.max_message_size {
            return Err(DecodeError::InvalidField("message size"));
        }
        if checksum(&message) != expected {
            return Err(DecodeError::ChecksumMismatch);
        }
        Ok(Some(message))
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Per-peer send queue with a token-bucket pacer.
//!
//! A large message fragments into thousands of datagrams. Written to the
//! socket back to back they overrun the receiver's socket buffer long
//! before its next poll, and UDP drops the excess silently. The outbox
//! queues every message's datagrams and releases them at `rate` bytes per
//! second, with up to `burst` bytes sent at once.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use super::socket::DatagramSocket;

/// Send-rate limits for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Bytes per second. `0` sends everything immediately.
    pub rate: u64,
    /// Largest amount sent without waiting for refill.
    pub burst: usize,
    /// Queued bytes beyond this drop the oldest messages.
    pub max_queued: usize,
}

impl Pacing {
    pub const fn unpaced() -> Self {
        Self {
            rate: 0,
            burst: usize::MAX,
            max_queued: usize::MAX,
        }
    }

    pub fn is_paced(&self) -> bool {
        self.rate > 0
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            rate: 4 * 1024 * 1024,
            burst: 64 * 1024,
            max_queued: 32 * 1024 * 1024,
        }
    }
}

/// Datagrams of one message not yet on the wire.
struct Pending {
    datagrams: VecDeque<Bytes>,
    bytes: usize,
}

pub struct Outbox {
    pacing: Pacing,
    queue: VecDeque<Pending>,
    queued_bytes: usize,
    /// Send allowance in bytes. May go negative by one datagram.
    tokens: f64,
    last_refill: Instant,
    sent_bytes: u64,
}

impl Outbox {
    pub fn new(pacing: Pacing, now: Instant) -> Self {
        Self {
            pacing,
            queue: VecDeque::new(),
            queued_bytes: 0,
            tokens: pacing.burst as f64,
            last_refill: now,
            sent_bytes: 0,
        }
    }

    /// Queue one message's datagrams. Returns how many older messages were
    /// dropped to stay under `max_queued`.
    pub fn push(&mut self, datagrams: Vec<Bytes>) -> usize {
        let bytes: usize = datagrams.iter().map(Bytes::len).sum();
        let mut dropped = 0;
        while !self.queue.is_empty() && self.queued_bytes.saturating_add(bytes) > self.pacing.max_queued {
            if let Some(old) = self.queue.pop_front() {
                self.queued_bytes -= old.bytes;
                dropped += 1;
            }
        }
        self.queued_bytes += bytes;
        self.queue.push_back(Pending {
            datagrams: datagrams.into(),
            bytes,
        });
        dropped
    }

    /// Send as much as the bucket allows. Returns the datagrams sent.
    ///
    /// `WouldBlock` ends the flush with the datagram still queued. Any other
    /// error drops the message being sent and is returned.
    pub fn flush(&mut self, socket: &dyn DatagramSocket, addr: SocketAddr, now: Instant) -> io::Result<usize> {
        self.refill(now);
        let mut sent = 0;
        while let Some(pending) = self.queue.front_mut() {
            let Some(datagram) = pending.datagrams.front() else {
                self.queue.pop_front();
                continue;
            };
            if self.pacing.is_paced() && self.tokens <= 0.0 {
                break;
            }
            match socket.send_to(datagram, addr) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    if let Some(failed) = self.queue.pop_front() {
                        self.queued_bytes -= failed.bytes;
                    }
                    return Err(e);
                }
            }
            let len = datagram.len();
            pending.datagrams.pop_front();
            pending.bytes -= len;
            self.queued_bytes -= len;
            self.tokens -= len as f64;
            self.sent_bytes += len as u64;
            sent += 1;
            if pending.datagrams.is_empty() {
                self.queue.pop_front();
            }
        }
        Ok(sent)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    /// Total bytes handed to the socket.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    // ── Internal ─────────────────────────────────────────────────

    fn refill(&mut self, now: Instant) {
        if !self.pacing.is_paced() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.pacing.rate as f64)
            .min(self.pacing.burst as f64);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

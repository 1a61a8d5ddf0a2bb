//! Unreliable-fragmented datagram transport.
//!
//! Messages are split into MTU-sized chunks ([`datagram`]), reassembled per
//! sender ([`reassembly`]), paced per peer ([`outbox`]), and carried over
//! any [`DatagramSocket`]: a real non-blocking UDP socket or the in-process
//! [`MemoryNetwork`].

pub mod datagram;
pub mod memory;
pub mod outbox;
pub mod reassembly;
pub mod socket;

pub use datagram::{ChunkHeader, DEFAULT_MTU, Datagram, PROTOCOL_VERSION, fragment};
pub use memory::{MemoryNetwork, MemorySocket};
pub use outbox::{Outbox, Pacing};
pub use reassembly::Reassembler;
pub use socket::{DEFAULT_SOCKET_BUFFER, DatagramSocket, bind_udp};

//! In-process datagram network.
//!
//! Every [`MemorySocket`] bound on a [`MemoryNetwork`] owns one inbound
//! queue. Sending to an address nobody has bound drops the datagram, as
//! UDP would. Addresses can be blocked to simulate loss.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use super::socket::DatagramSocket;

const FIRST_EPHEMERAL_PORT: u16 = 49152;

#[derive(Default)]
struct Inner {
    queues: HashMap<SocketAddr, VecDeque<(SocketAddr, Bytes)>>,
    blocked: HashSet<SocketAddr>,
    next_port: u16,
    sent: u64,
}

/// Shared switchboard for [`MemorySocket`]s.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("memory network lock poisoned"))
    }

    /// Bind `addr`. Port 0 picks a free ephemeral port.
    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemorySocket> {
        let mut inner = self.lock()?;
        let addr = if addr.port() == 0 {
            let mut candidate = addr;
            loop {
                if inner.next_port < FIRST_EPHEMERAL_PORT {
                    inner.next_port = FIRST_EPHEMERAL_PORT;
                }
                candidate.set_port(inner.next_port);
                inner.next_port = inner.next_port.wrapping_add(1);
                if !inner.queues.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            addr
        };
        if inner.queues.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            ));
        }
        inner.queues.insert(addr, VecDeque::new());
        Ok(MemorySocket {
            network: self.clone(),
            addr,
        })
    }

    /// Bind a loopback socket on the given port.
    pub fn bind_port(&self, port: u16) -> io::Result<MemorySocket> {
        self.bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    /// Drop every datagram addressed to `addr` until unblocked.
    pub fn block(&self, addr: SocketAddr) {
        if let Ok(mut inner) = self.lock() {
            inner.blocked.insert(addr);
        }
    }

    pub fn unblock(&self, addr: SocketAddr) {
        if let Ok(mut inner) = self.lock() {
            inner.blocked.remove(&addr);
        }
    }

    /// Datagrams delivered to a queue so far.
    pub fn delivered(&self) -> u64 {
        self.lock().map(|inner| inner.sent).unwrap_or(0)
    }

    /// Datagrams waiting at `addr`.
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.lock()
            .ok()
            .and_then(|inner| inner.queues.get(&addr).map(VecDeque::len))
            .unwrap_or(0)
    }
}

/// One endpoint on a [`MemoryNetwork`]. Unbinds on drop.
pub struct MemorySocket {
    network: MemoryNetwork,
    addr: SocketAddr,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let mut guard = self.network.lock()?;
        let inner = &mut *guard;
        if inner.blocked.contains(&addr) {
            return Ok(buf.len());
        }
        let from = self.addr;
        if let Some(queue) = inner.queues.get_mut(&addr) {
            queue.push_back((from, Bytes::copy_from_slice(buf)));
            inner.sent += 1;
        }
        Ok(buf.len())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut inner = self.network.lock()?;
        let Some((from, datagram)) = inner
            .queues
            .get_mut(&self.addr)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };
        // Oversized datagrams are truncated, like recv_from on a short buffer.
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.network.lock() {
            inner.queues.remove(&self.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_between_sockets() {
        let net = MemoryNetwork::new();
        let a = net.bind_port(0).unwrap();
        let b = net.bind_port(7075).unwrap();
        a.send_to(b"hello", b.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = b.try_recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, a.local_addr().unwrap());
        assert!(b.try_recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn double_bind_fails_until_drop() {
        let net = MemoryNetwork::new();
        let a = net.bind_port(7075).unwrap();
        let err = net.bind_port(7075).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
        drop(a);
        assert!(net.bind_port(7075).is_ok());
    }

    #[test]
    fn ephemeral_ports_are_distinct() {
        let net = MemoryNetwork::new();
        let a = net.bind_port(0).unwrap();
        let b = net.bind_port(0).unwrap();
        assert_ne!(a.local_addr().unwrap(), b.local_addr().unwrap());
    }

    #[test]
    fn blocked_address_loses_datagrams() {
        let net = MemoryNetwork::new();
        let a = net.bind_port(0).unwrap();
        let b = net.bind_port(0).unwrap();
        let b_addr = b.local_addr().unwrap();

        net.block(b_addr);
        a.send_to(b"lost", b_addr).unwrap();
        assert_eq!(net.pending(b_addr), 0);

        net.unblock(b_addr);
        a.send_to(b"kept", b_addr).unwrap();
        assert_eq!(net.pending(b_addr), 1);
        assert_eq!(net.delivered(), 1);
    }
}

//! The datagram socket seam.
//!
//! The session layer pumps its socket from a synchronous frame loop, so
//! sockets here never block: `try_recv_from` returns `Ok(None)` when
//! nothing is queued.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

/// Kernel send/receive buffer requested for session sockets.
pub const DEFAULT_SOCKET_BUFFER: usize = 4 * 1024 * 1024;

/// A connectionless, non-blocking datagram endpoint.
pub trait DatagramSocket: Send {
    /// Send one datagram. Delivery is not guaranteed.
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Take one queued datagram, if any.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Bind a non-blocking UDP socket, asking the kernel for `buffer_size`
/// bytes of send and receive buffer.
///
/// The kernel may clamp the request (`net.core.rmem_max` on Linux); the
/// granted sizes are logged and a refused request is not an error.
pub fn bind_udp(addr: SocketAddr, buffer_size: usize) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if buffer_size > 0 {
        if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
            debug!(requested = buffer_size, error = %e, "receive buffer not resized");
        }
        if let Err(e) = socket.set_send_buffer_size(buffer_size) {
            debug!(requested = buffer_size, error = %e, "send buffer not resized");
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let socket: UdpSocket = socket.into();
    debug!(
        local = %socket.local_addr()?,
        recv_buffer = socket2::SockRef::from(&socket).recv_buffer_size().unwrap_or(0),
        "udp socket bound"
    );
    Ok(socket)
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // ICMP port-unreachable from an earlier send surfaces here on some
            // platforms; it says nothing about the next datagram.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!("ignoring connection reset on udp socket");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_socket_is_non_blocking() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap(), 0).unwrap();
        let mut buf = [0u8; 64];
        assert!(socket.try_recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn udp_loopback_datagram() {
        let a = bind_udp("127.0.0.1:0".parse().unwrap(), DEFAULT_SOCKET_BUFFER).unwrap();
        let b = bind_udp("127.0.0.1:0".parse().unwrap(), DEFAULT_SOCKET_BUFFER).unwrap();
        let b_addr = DatagramSocket::local_addr(&b).unwrap();
        DatagramSocket::send_to(&a, b"tile", b_addr).unwrap();

        let mut buf = [0u8; 64];
        let mut received = None;
        for _ in 0..200 {
            if let Some(r) = b.try_recv_from(&mut buf).unwrap() {
                received = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (len, from) = received.expect("datagram should arrive on loopback");
        assert_eq!(&buf[..len], b"tile");
        assert_eq!(from, DatagramSocket::local_addr(&a).unwrap());
    }

    #[test]
    fn buffer_request_grows_receive_buffer() {
        let small = bind_udp("127.0.0.1:0".parse().unwrap(), 0).unwrap();
        let large = bind_udp("127.0.0.1:0".parse().unwrap(), DEFAULT_SOCKET_BUFFER).unwrap();
        let granted = |s: &UdpSocket| socket2::SockRef::from(s).recv_buffer_size().unwrap();
        // Clamped by the kernel, but never below the default.
        assert!(granted(&large) >= granted(&small));
    }
}

//! The session manager: one socket, many connections.
//!
//! A composer binds and accepts render nodes; a render node dials one
//! composer. Either way the owner pumps the session once per frame with
//! [`SessionManager::poll`], which never blocks and reports what happened
//! as [`SessionEvent`]s. Per-packet and per-peer failures are logged here
//! and never returned to the frame loop.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use super::config::{Role, SessionConfig};
use super::connection::{Connection, ConnectionId, ConnectionInfo};
use crate::error::{RejectReason, TileError};
use crate::net::{
    ChunkHeader, Datagram, DatagramSocket, PROTOCOL_VERSION, bind_udp, fragment,
};
use crate::protocol::{Message, MessageCodec};

/// Largest datagram we ever expect to receive.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Granularity of the render node's handshake wait.
const HANDSHAKE_POLL: Duration = Duration::from_millis(5);

// ── SessionEvent ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerConnected(ConnectionId),
    PeerDisconnected(ConnectionId),
    Message {
        from: ConnectionId,
        message: Message,
    },
}

// ── Handshake ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Handshake {
    /// Composer side: nothing to dial.
    Listening,
    Pending {
        composer: SocketAddr,
        started: Instant,
        last_attempt: Instant,
    },
    Rejected(RejectReason),
    Established,
}

// ── SessionManager ───────────────────────────────────────────────

pub struct SessionManager {
    role: Role,
    config: SessionConfig,
    socket: Option<Box<dyn DatagramSocket>>,
    local_addr: SocketAddr,
    connections: BTreeMap<ConnectionId, Connection>,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    next_id: u32,
    sequence: u32,
    handshake: Handshake,
    /// Render node: the id the composer gave us.
    assigned_id: Option<u32>,
    codec: MessageCodec,
    events: Vec<SessionEvent>,
    recv_buf: Vec<u8>,
}

impl SessionManager {
    fn new(
        role: Role,
        socket: Box<dyn DatagramSocket>,
        config: SessionConfig,
        handshake: Handshake,
    ) -> Result<Self, TileError> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            role,
            config,
            socket: Some(socket),
            local_addr,
            connections: BTreeMap::new(),
            by_addr: HashMap::new(),
            next_id: 1,
            sequence: 0,
            handshake,
            assigned_id: None,
            codec: MessageCodec,
            events: Vec::new(),
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    // ── Startup ──────────────────────────────────────────────────

    /// Bind `addr` and start accepting render nodes.
    pub fn start_as_composer(addr: SocketAddr, config: SessionConfig) -> Result<Self, TileError> {
        let socket = bind_udp(addr, config.socket_buffer_size).map_err(|source| TileError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Self::start_as_composer_with(socket, config)
    }

    /// Start a composer on an already-bound socket.
    pub fn start_as_composer_with(
        socket: impl DatagramSocket + 'static,
        config: SessionConfig,
    ) -> Result<Self, TileError> {
        let session = Self::new(Role::Composer, Box::new(socket), config, Handshake::Listening)?;
        info!(
            local = %session.local_addr,
            max_peers = session.config.max_peers,
            "composer listening"
        );
        Ok(session)
    }

    /// Resolve `host:port`, bind an ephemeral socket and complete the
    /// handshake with the composer.
    pub async fn start_as_render_node(
        host: &str,
        port: u16,
        config: SessionConfig,
    ) -> Result<Self, TileError> {
        let composer = resolve(host, port).await?;
        let bind_addr = match composer.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = bind_udp(bind_addr, config.socket_buffer_size).map_err(|source| TileError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
        Self::start_as_render_node_with(socket, composer, config).await
    }

    /// Complete the handshake over a caller-supplied socket, retransmitting
    /// `Connect` until accepted, refused, or `connect_timeout` elapses.
    pub async fn start_as_render_node_with(
        socket: impl DatagramSocket + 'static,
        composer: SocketAddr,
        config: SessionConfig,
    ) -> Result<Self, TileError> {
        let timeout = config.connect_timeout;
        let mut session = Self::connect(socket, composer, config)?;
        loop {
            let now = Instant::now();
            session.pump(now);
            match session.handshake {
                Handshake::Established => return Ok(session),
                Handshake::Rejected(reason) => {
                    session.shutdown();
                    return Err(TileError::ConnectRefused {
                        addr: composer.to_string(),
                        reason,
                    });
                }
                Handshake::Pending { started, .. } if now.duration_since(started) >= timeout => {
                    session.shutdown();
                    return Err(TileError::ConnectTimeout {
                        addr: composer.to_string(),
                        timeout,
                    });
                }
                _ => {}
            }
            tokio::time::sleep(HANDSHAKE_POLL).await;
        }
    }

    /// Begin a render-node handshake without waiting for it.
    ///
    /// The first `Connect` goes out immediately; [`poll`](Self::poll)
    /// retransmits and reports `PeerConnected` once accepted.
    pub fn connect(
        socket: impl DatagramSocket + 'static,
        composer: SocketAddr,
        config: SessionConfig,
    ) -> Result<Self, TileError> {
        let now = Instant::now();
        let session = Self::new(
            Role::RenderNode,
            Box::new(socket),
            config,
            Handshake::Pending {
                composer,
                started: now,
                last_attempt: now,
            },
        )?;
        info!(local = %session.local_addr, %composer, "connecting to composer");
        session.send_connect(composer);
        Ok(session)
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `false` once shut down.
    pub fn is_running(&self) -> bool {
        self.socket.is_some()
    }

    /// Render node: `true` once the composer accepted us.
    pub fn is_established(&self) -> bool {
        matches!(self.handshake, Handshake::Established) && !self.connections.is_empty()
    }

    /// Render node: the id the composer assigned to this process.
    pub fn assigned_id(&self) -> Option<u32> {
        self.assigned_id
    }

    /// Live connections in connection order.
    pub fn peers(&self) -> Vec<ConnectionInfo> {
        self.connections.values().map(Connection::info).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(Connection::info)
    }

    /// Bytes queued for `id` and not yet released by the pacer.
    pub fn queued_bytes(&self, id: ConnectionId) -> usize {
        self.connections
            .get(&id)
            .map_or(0, |conn| conn.outbox.queued_bytes())
    }

    /// `true` when nothing is waiting to go out to `id`.
    pub fn is_flushed(&self, id: ConnectionId) -> bool {
        self.queued_bytes(id) == 0
    }

    // ── Sending ──────────────────────────────────────────────────

    fn encode(&mut self, message: &Message) -> Result<Vec<Bytes>, TileError> {
        let mut buf = BytesMut::new();
        self.codec.encode(message, &mut buf)?;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        fragment(&buf.freeze(), sequence, self.config.mtu)
    }

    /// Serialize once and queue for every connected peer.
    ///
    /// Returns how many peers the message was queued for. Whatever the pacer
    /// allows goes out now; the rest on later polls. A failed send to one
    /// peer is logged and does not stop the others.
    pub fn broadcast(&mut self, message: &Message) -> Result<usize, TileError> {
        if self.socket.is_none() {
            return Err(TileError::SessionClosed);
        }
        let datagrams = self.encode(message)?;
        let Some(socket) = self.socket.as_deref() else {
            return Err(TileError::SessionClosed);
        };

        let now = Instant::now();
        let mut reached = 0;
        for conn in self.connections.values_mut() {
            if !conn.phase.is_connected() {
                continue;
            }
            enqueue(conn, datagrams.clone());
            if let Err(e) = flush(socket, conn, now) {
                warn!(peer = %conn.id, addr = %conn.addr, error = %e, "broadcast send failed");
                continue;
            }
            reached += 1;
        }
        debug!(tag = %message.tag(), peers = reached, chunks = datagrams.len(), "broadcast");
        Ok(reached)
    }

    /// Send one message to one peer.
    pub fn send_to(&mut self, id: ConnectionId, message: &Message) -> Result<(), TileError> {
        if self.socket.is_none() {
            return Err(TileError::SessionClosed);
        }
        if !self.connections.contains_key(&id) {
            return Err(TileError::UnknownConnection(id.0));
        }
        let datagrams = self.encode(message)?;
        let Some(socket) = self.socket.as_deref() else {
            return Err(TileError::SessionClosed);
        };
        let Some(conn) = self.connections.get_mut(&id) else {
            return Err(TileError::UnknownConnection(id.0));
        };
        enqueue(conn, datagrams);
        flush(socket, conn, Instant::now())?;
        Ok(())
    }

    fn send_datagram(&self, datagram: &Datagram, addr: SocketAddr) {
        let Some(socket) = self.socket.as_deref() else {
            return;
        };
        if let Err(e) = socket.send_to(&datagram.to_bytes(), addr) {
            warn!(%addr, error = %e, "control datagram send failed");
        }
    }

    fn send_connect(&self, composer: SocketAddr) {
        self.send_datagram(
            &Datagram::Connect {
                role: self.role,
                version: PROTOCOL_VERSION,
            },
            composer,
        );
    }

    // ── Polling ──────────────────────────────────────────────────

    /// Drain pending datagrams, run heartbeats and timeouts, and return
    /// everything that happened since the last call.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        self.poll_at(Instant::now())
    }

    /// [`poll`](Self::poll) with an explicit clock.
    pub fn poll_at(&mut self, now: Instant) -> Vec<SessionEvent> {
        self.pump(now);
        std::mem::take(&mut self.events)
    }

    /// Receive and send without taking events; they wait for the next
    /// [`poll`](Self::poll). Call between polls to keep paced sends moving.
    pub fn pump(&mut self, now: Instant) {
        let mut drained = 0;
        while drained < self.config.max_datagrams_per_poll {
            let received = match self.socket.as_deref() {
                Some(socket) => socket.try_recv_from(&mut self.recv_buf),
                None => return,
            };
            let (len, from) = match received {
                Ok(Some(r)) => r,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "socket receive failed");
                    break;
                }
            };
            drained += 1;
            let packet = Bytes::copy_from_slice(&self.recv_buf[..len]);
            self.handle_datagram(from, packet, now);
        }
        self.maintain(now);
        self.flush_outboxes(now);
    }

    fn flush_outboxes(&mut self, now: Instant) {
        let Some(socket) = self.socket.as_deref() else {
            return;
        };
        for conn in self.connections.values_mut() {
            if conn.outbox.is_empty() {
                continue;
            }
            if let Err(e) = flush(socket, conn, now) {
                warn!(peer = %conn.id, addr = %conn.addr, error = %e, "queued send failed");
            }
        }
    }

    fn handle_datagram(&mut self, from: SocketAddr, packet: Bytes, now: Instant) {
        let datagram = match Datagram::decode(packet) {
            Ok(d) => d,
            Err(e) => {
                warn!(%from, error = %e, "dropping malformed datagram");
                return;
            }
        };

        let known = self.by_addr.get(&from).copied();
        if let Some(conn) = known.and_then(|id| self.connections.get_mut(&id)) {
            conn.last_heard = now;
        }

        match (datagram, known) {
            (Datagram::Connect { role, version }, _) => self.on_connect(from, role, version, known, now),
            (Datagram::Accept { connection_id }, _) => self.on_accept(from, connection_id, now),
            (Datagram::Reject { reason }, _) => self.on_reject(from, reason),
            (Datagram::Disconnect, Some(id)) => {
                info!(peer = %id, %from, "peer disconnected");
                self.drop_connection(id);
            }
            (Datagram::Heartbeat, Some(_)) => {}
            (Datagram::Chunk { header, data }, Some(id)) => self.on_chunk(id, header, data),
            (_, None) => debug!(%from, "ignoring datagram from unknown peer"),
        }
    }

    fn on_connect(
        &mut self,
        from: SocketAddr,
        role: Role,
        version: u16,
        known: Option<ConnectionId>,
        now: Instant,
    ) {
        if self.role != Role::Composer {
            debug!(%from, "render node ignoring connect");
            return;
        }
        if let Some(id) = known {
            // Retransmitted connect: our accept was lost.
            self.send_datagram(&Datagram::Accept { connection_id: id.0 }, from);
            return;
        }

        let reject = if version != PROTOCOL_VERSION {
            Some(RejectReason::VersionMismatch)
        } else if !self.role.accepts(role) {
            Some(RejectReason::WrongRole)
        } else if self.connections.len() >= self.config.max_peers {
            Some(RejectReason::Full)
        } else {
            None
        };
        if let Some(reason) = reject {
            warn!(%from, %role, version, %reason, "rejecting peer");
            self.send_datagram(&Datagram::Reject { reason }, from);
            return;
        }

        let id = self.allocate_id();
        let mut conn = Connection::new(id, role, from, now, self.config.max_message_size, self.config.pacing);
        if let Err(e) = conn.phase.complete(now) {
            warn!(peer = %id, error = %e, "connection state");
            return;
        }
        self.connections.insert(id, conn);
        self.by_addr.insert(from, id);
        self.send_datagram(&Datagram::Accept { connection_id: id.0 }, from);
        info!(peer = %id, %from, peers = self.connections.len(), "peer connected");
        self.events.push(SessionEvent::PeerConnected(id));
    }

    fn on_accept(&mut self, from: SocketAddr, connection_id: u32, now: Instant) {
        let Handshake::Pending { composer, .. } = self.handshake else {
            debug!(%from, "ignoring duplicate accept");
            return;
        };
        if from != composer {
            debug!(%from, "ignoring accept from unexpected address");
            return;
        }

        let id = self.allocate_id();
        let mut conn = Connection::new(
            id,
            Role::Composer,
            from,
            now,
            self.config.max_message_size,
            self.config.pacing,
        );
        if let Err(e) = conn.phase.complete(now) {
            warn!(peer = %id, error = %e, "connection state");
            return;
        }
        self.connections.insert(id, conn);
        self.by_addr.insert(from, id);
        self.handshake = Handshake::Established;
        self.assigned_id = Some(connection_id);
        info!(peer = %id, %from, assigned = connection_id, "connected to composer");
        self.events.push(SessionEvent::PeerConnected(id));
    }

    fn on_reject(&mut self, from: SocketAddr, reason: RejectReason) {
        match self.handshake {
            Handshake::Pending { composer, .. } if composer == from => {
                warn!(%from, %reason, "composer refused connection");
                self.handshake = Handshake::Rejected(reason);
            }
            _ => debug!(%from, "ignoring stray reject"),
        }
    }

    fn on_chunk(&mut self, id: ConnectionId, header: ChunkHeader, data: Bytes) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let bytes = match conn.reassembler.push(header, data) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                warn!(peer = %id, sequence = header.sequence, error = %e, "dropping message");
                return;
            }
        };

        let mut buf = BytesMut::from(&bytes[..]);
        match self.codec.decode(&mut buf) {
            Ok(Some(message)) => self.events.push(SessionEvent::Message { from: id, message }),
            Ok(None) => debug!(peer = %id, "empty message"),
            Err(e) => warn!(peer = %id, error = %e, "dropping undecodable message"),
        }
    }

    /// Connect retransmits, heartbeats and silent-peer timeouts.
    fn maintain(&mut self, now: Instant) {
        if let Handshake::Pending {
            composer,
            started,
            last_attempt,
        } = self.handshake
        {
            if now.saturating_duration_since(last_attempt) >= self.config.connect_retry {
                debug!(%composer, "retransmitting connect");
                self.send_connect(composer);
                self.handshake = Handshake::Pending {
                    composer,
                    started,
                    last_attempt: now,
                };
            }
        }

        let Some(socket) = self.socket.as_deref() else {
            return;
        };
        let heartbeat = Datagram::Heartbeat.to_bytes();
        let mut timed_out = Vec::new();
        for conn in self.connections.values_mut() {
            if now.saturating_duration_since(conn.last_heard) >= self.config.peer_timeout {
                timed_out.push(conn.id);
                continue;
            }
            if now.saturating_duration_since(conn.last_sent) >= self.config.heartbeat_interval {
                if let Err(e) = socket.send_to(&heartbeat, conn.addr) {
                    debug!(peer = %conn.id, error = %e, "heartbeat send failed");
                }
                conn.last_sent = now;
            }
        }
        for id in timed_out {
            warn!(peer = %id, timeout = ?self.config.peer_timeout, "peer timed out");
            self.drop_connection(id);
        }
    }

    fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn drop_connection(&mut self, id: ConnectionId) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        self.by_addr.remove(&conn.addr);
        if let Err(e) = conn.phase.close() {
            debug!(peer = %id, error = %e, "connection state");
        }
        self.events.push(SessionEvent::PeerDisconnected(id));
    }

    // ── Shutdown ─────────────────────────────────────────────────

    /// Tell every peer goodbye and release the socket. Safe to call twice.
    pub fn shutdown(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        let bye = Datagram::Disconnect.to_bytes();
        for conn in self.connections.values_mut() {
            if let Err(e) = socket.send_to(&bye, conn.addr) {
                debug!(peer = %conn.id, error = %e, "disconnect send failed");
            }
            if let Err(e) = conn.phase.close() {
                debug!(peer = %conn.id, error = %e, "connection state");
            }
        }
        self.connections.clear();
        self.by_addr.clear();
        self.events.clear();
        info!(role = %self.role, local = %self.local_addr, "session shut down");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn enqueue(conn: &mut Connection, datagrams: Vec<Bytes>) {
    let dropped = conn.outbox.push(datagrams);
    if dropped > 0 {
        warn!(peer = %conn.id, dropped, queued = conn.outbox.queued_bytes(), "send queue full, dropped oldest messages");
    }
}

fn flush(socket: &dyn DatagramSocket, conn: &mut Connection, now: Instant) -> io::Result<()> {
    if conn.outbox.flush(socket, conn.addr, now)? > 0 {
        conn.last_sent = now;
    }
    Ok(())
}

/// Resolve a host name or literal address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TileError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TileError::InvalidAddress(format!("{host}:{port}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| TileError::InvalidAddress(format!("{host}:{port}: no addresses")))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{MemoryNetwork, MemorySocket, Pacing};
    use crate::protocol::{RenderParameters, TileImageFragment};
    use crate::tile::TileIndex;

    fn config() -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_millis(200),
            connect_retry: Duration::from_millis(10),
            ..SessionConfig::default()
        }
    }

    fn composer(net: &MemoryNetwork, config: SessionConfig) -> SessionManager {
        SessionManager::start_as_composer_with(net.bind_port(7075).unwrap(), config).unwrap()
    }

    fn node(net: &MemoryNetwork, composer: &SessionManager) -> SessionManager {
        SessionManager::connect(net.bind_port(0).unwrap(), composer.local_addr(), config()).unwrap()
    }

    #[test]
    fn handshake_connects_both_sides() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let mut n = node(&net, &c);
        assert!(!n.is_established());

        let events = c.poll();
        assert_eq!(events, vec![SessionEvent::PeerConnected(ConnectionId(1))]);

        let events = n.poll();
        assert!(matches!(events.as_slice(), [SessionEvent::PeerConnected(_)]));
        assert!(n.is_established());
        assert_eq!(n.assigned_id(), Some(1));
        assert_eq!(c.peers()[0].role, Role::RenderNode);
    }

    #[test]
    fn retransmitted_connect_is_idempotent() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let n = node(&net, &c);
        n.send_connect(c.local_addr());

        let events = c.poll();
        assert_eq!(events.len(), 1);
        assert_eq!(c.peer_count(), 1);
    }

    #[test]
    fn full_composer_rejects() {
        let net = MemoryNetwork::new();
        let mut c = composer(
            &net,
            SessionConfig {
                max_peers: 1,
                ..config()
            },
        );
        let mut first = node(&net, &c);
        let mut second = node(&net, &c);
        c.poll();
        first.poll();
        second.poll();

        assert!(first.is_established());
        assert!(!second.is_established());
        assert_eq!(second.handshake, Handshake::Rejected(RejectReason::Full));
        assert_eq!(c.peer_count(), 1);
    }

    #[test]
    fn wrong_role_and_version_rejected() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let rogue: MemorySocket = net.bind_port(0).unwrap();
        let c_addr = c.local_addr();

        rogue
            .send_to(
                &Datagram::Connect {
                    role: Role::Composer,
                    version: PROTOCOL_VERSION,
                }
                .to_bytes(),
                c_addr,
            )
            .unwrap();
        rogue
            .send_to(
                &Datagram::Connect {
                    role: Role::RenderNode,
                    version: PROTOCOL_VERSION + 1,
                }
                .to_bytes(),
                c_addr,
            )
            .unwrap();
        assert!(c.poll().is_empty());
        assert_eq!(c.peer_count(), 0);

        let mut buf = [0u8; 64];
        let mut reasons = Vec::new();
        while let Some((len, _)) = rogue.try_recv_from(&mut buf).unwrap() {
            if let Datagram::Reject { reason } =
                Datagram::decode(Bytes::copy_from_slice(&buf[..len])).unwrap()
            {
                reasons.push(reason);
            }
        }
        assert_eq!(
            reasons,
            vec![RejectReason::WrongRole, RejectReason::VersionMismatch]
        );
    }

    #[test]
    fn messages_flow_both_ways() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let mut n = node(&net, &c);
        c.poll();
        n.poll();

        let params = Message::RenderParameters(RenderParameters::new(1, 0.25).unwrap());
        assert_eq!(c.broadcast(&params).unwrap(), 1);
        let events = n.poll();
        let composer_id = n.peers()[0].id;
        assert_eq!(
            events,
            vec![SessionEvent::Message {
                from: composer_id,
                message: params.clone(),
            }]
        );

        n.send_to(composer_id, &params).unwrap();
        let events = c.poll();
        assert_eq!(
            events,
            vec![SessionEvent::Message {
                from: ConnectionId(1),
                message: params,
            }]
        );
    }

    #[test]
    fn send_to_unknown_peer() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let message = Message::RenderParameters(RenderParameters::default());
        assert!(matches!(
            c.send_to(ConnectionId(99), &message),
            Err(TileError::UnknownConnection(99))
        ));
    }

    #[test]
    fn silent_peer_times_out() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let mut n = node(&net, &c);
        c.poll();
        n.poll();

        let later = Instant::now() + c.config().peer_timeout + Duration::from_millis(1);
        let events = c.poll_at(later);
        assert_eq!(events, vec![SessionEvent::PeerDisconnected(ConnectionId(1))]);
        assert_eq!(c.peer_count(), 0);
    }

    #[test]
    fn heartbeats_keep_peers_alive() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let mut n = node(&net, &c);
        c.poll();
        n.poll();

        let step = c.config().heartbeat_interval;
        let mut now = Instant::now();
        for _ in 0..10 {
            now += step;
            assert!(n.poll_at(now).is_empty());
            assert!(c.poll_at(now).is_empty());
        }
        assert_eq!(c.peer_count(), 1);
        assert!(n.is_established());
    }

    #[test]
    fn shutdown_notifies_peers_and_is_idempotent() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let mut n = node(&net, &c);
        c.poll();
        n.poll();

        n.shutdown();
        n.shutdown();
        assert!(!n.is_running());
        assert!(n.poll().is_empty());
        assert!(matches!(
            n.broadcast(&Message::RenderParameters(RenderParameters::default())),
            Err(TileError::SessionClosed)
        ));

        let events = c.poll();
        assert_eq!(events, vec![SessionEvent::PeerDisconnected(ConnectionId(1))]);
    }

    #[test]
    fn shutdown_says_goodbye_to_every_peer() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let mut nodes: Vec<_> = (0..3).map(|_| node(&net, &c)).collect();
        c.poll();
        for n in &mut nodes {
            n.poll();
        }
        assert_eq!(c.peer_count(), 3);

        c.shutdown();
        assert_eq!(c.peer_count(), 0);
        for n in &mut nodes {
            assert_eq!(n.poll(), vec![SessionEvent::PeerDisconnected(ConnectionId(1))]);
            assert!(!n.is_established());
        }
    }

    #[test]
    fn large_message_is_paced_across_pumps() {
        let net = MemoryNetwork::new();
        let mut c = composer(&net, config());
        let paced = SessionConfig {
            pacing: Pacing {
                rate: 100_000,
                burst: 10_000,
                max_queued: usize::MAX,
            },
            ..config()
        };
        let mut n = SessionManager::connect(net.bind_port(0).unwrap(), c.local_addr(), paced).unwrap();
        c.poll();
        n.poll();
        let to_composer = n.peers()[0].id;

        let image = vec![7u8; 100_000];
        let message = Message::TileImageFragment(TileImageFragment::new(TileIndex::new(0, 0), image));
        n.send_to(to_composer, &message).unwrap();
        assert!(!n.is_flushed(to_composer));
        assert!(c.poll().is_empty());

        // 100 KB at 100 KB/s: done within a little over one simulated second.
        let start = Instant::now();
        let mut received = Vec::new();
        for step in 1..=30 {
            n.pump(start + Duration::from_millis(50 * step));
            received.extend(c.poll());
        }
        assert!(n.is_flushed(to_composer));
        assert_eq!(n.queued_bytes(to_composer), 0);
        assert_eq!(
            received,
            vec![SessionEvent::Message {
                from: ConnectionId(1),
                message,
            }]
        );
    }

    #[test]
    fn bind_conflict_is_bind_error() {
        let first = bind_udp("127.0.0.1:0".parse().unwrap(), 0).unwrap();
        let addr = first.local_addr().unwrap();
        let err = SessionManager::start_as_composer(addr, config()).err().unwrap();
        assert!(matches!(err, TileError::Bind { .. }));
    }

    #[tokio::test]
    async fn render_node_times_out_without_composer() {
        let net = MemoryNetwork::new();
        let nobody = "127.0.0.1:9".parse().unwrap();
        let err = SessionManager::start_as_render_node_with(
            net.bind_port(0).unwrap(),
            nobody,
            SessionConfig {
                connect_timeout: Duration::from_millis(30),
                ..config()
            },
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, TileError::ConnectTimeout { .. }));
    }

    #[tokio::test]
    async fn render_node_refused_by_full_composer() {
        let net = MemoryNetwork::new();
        let mut c = composer(
            &net,
            SessionConfig {
                max_peers: 0,
                ..config()
            },
        );
        let addr = c.local_addr();
        let socket = net.bind_port(0).unwrap();
        let pump = tokio::spawn(async move {
            for _ in 0..100 {
                c.poll();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });
        let err = SessionManager::start_as_render_node_with(socket, addr, config())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            TileError::ConnectRefused {
                reason: RejectReason::Full,
                ..
            }
        ));
        pump.abort();
    }

    #[tokio::test]
    async fn resolve_literal_address() {
        let addr = resolve("127.0.0.1", 7075).await.unwrap();
        assert_eq!(addr, "127.0.0.1:7075".parse().unwrap());
    }
}

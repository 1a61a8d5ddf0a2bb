//! Integration tests: composer and render nodes talking over the
//! in-process network, plus one run over real UDP on localhost.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use tilecast_core::net::{
    DEFAULT_MTU, Datagram, DatagramSocket, MemoryNetwork, MemorySocket, PROTOCOL_VERSION, fragment,
};
use tilecast_core::{
    CameraIntrinsics, CompositeTarget, Composer, ConnectionId, FlatRenderer, Framebuffer, GridSize,
    ImageEncoding, Message, NdcRect, NodeOptions, NodeTick, RenderNode, Role, SceneState,
    SessionConfig, SessionEvent, SessionManager, TileImage, TileIndex,
};

// ── Helpers ──────────────────────────────────────────────────────

const BG: [u8; 4] = [0, 0, 0, 255];

fn camera() -> CameraIntrinsics {
    CameraIntrinsics::for_screen(60.0, 0.3, 100.0, 8, 8)
}

fn memory_composer(net: &MemoryNetwork) -> Composer {
    let session =
        SessionManager::start_as_composer_with(net.bind_port(7075).unwrap(), SessionConfig::default())
            .unwrap();
    let mut composer = Composer::new(session, camera(), 0.0, BG);
    composer.set_scene_state(SceneState::default());
    composer
}

fn node_options() -> NodeOptions {
    NodeOptions {
        encoding: ImageEncoding::Zstd { level: 1 },
        fragments_per_second: 0.0,
        resend_interval: Duration::from_millis(200),
    }
}

fn memory_node(net: &MemoryNetwork, composer: &Composer) -> RenderNode {
    let session = SessionManager::connect(
        net.bind_port(0).unwrap(),
        composer.local_addr(),
        SessionConfig::default(),
    )
    .unwrap();
    RenderNode::new(session, Box::new(FlatRenderer::new()), node_options())
}

/// Tick everyone in turn a few times.
fn run(composer: &mut Composer, nodes: &mut [&mut RenderNode], fb: &mut Framebuffer, rounds: usize) {
    for _ in 0..rounds {
        composer.tick(Instant::now(), fb);
        for node in nodes.iter_mut() {
            node.tick(Instant::now());
        }
    }
    composer.tick(Instant::now(), fb);
}

/// Connect a bare socket as a render node and return it once accepted.
fn raw_peer(net: &MemoryNetwork, composer: &mut Composer, fb: &mut Framebuffer) -> MemorySocket {
    let socket = net.bind_port(0).unwrap();
    socket
        .send_to(
            &Datagram::Connect {
                role: Role::RenderNode,
                version: PROTOCOL_VERSION,
            }
            .to_bytes(),
            composer.local_addr(),
        )
        .unwrap();
    composer.tick(Instant::now(), fb);
    socket
}

/// Counts draws instead of rasterizing; full-HD quads are slow to blit.
#[derive(Default)]
struct CountingTarget {
    clears: usize,
    quads: usize,
}

impl CompositeTarget for CountingTarget {
    fn clear(&mut self, _rgba: [u8; 4]) {
        self.clears += 1;
    }

    fn draw_quad(&mut self, _rect: NdcRect, _image: &TileImage) {
        self.quads += 1;
    }
}

fn send_raw(socket: &MemorySocket, to: SocketAddr, message: &[u8], sequence: u32) {
    let message = BytesMut::from(message).freeze();
    for datagram in fragment(&message, sequence, DEFAULT_MTU).unwrap() {
        socket.send_to(&datagram, to).unwrap();
    }
}

// ── Scenario ─────────────────────────────────────────────────────

#[test]
fn test_one_then_two_nodes() {
    let net = MemoryNetwork::new();
    let mut composer = memory_composer(&net);
    let mut fb = Framebuffer::new(8, 8);

    let mut first = memory_node(&net, &composer);
    run(&mut composer, &mut [&mut first], &mut fb, 3);

    assert_eq!(composer.grid(), Some(GridSize::new(1, 1)));
    assert_eq!(first.tile().map(|t| t.tile_index), Some(TileIndex::new(0, 0)));
    let first_color = fb.pixel(0, 0).unwrap();
    assert_ne!(first_color, BG);
    assert_eq!(fb.pixel(7, 7), Some(first_color));

    let mut second = memory_node(&net, &composer);
    run(&mut composer, &mut [&mut first, &mut second], &mut fb, 3);

    assert_eq!(composer.grid(), Some(GridSize::new(1, 2)));
    assert_eq!(first.tile().map(|t| t.tile_index), Some(TileIndex::new(0, 0)));
    assert_eq!(second.tile().map(|t| t.tile_index), Some(TileIndex::new(0, 1)));
    assert_eq!(composer.compositor().received_count(), 2);

    // Tile y = 1 is the upper half; framebuffer rows run top-down.
    let top = fb.pixel(3, 1).unwrap();
    let bottom = fb.pixel(3, 6).unwrap();
    assert_eq!(bottom, first_color);
    assert_ne!(top, bottom);
    assert_ne!(top, BG);
    for x in 0..8 {
        assert_eq!(fb.pixel(x, 0), Some(top));
        assert_eq!(fb.pixel(x, 3), Some(top));
        assert_eq!(fb.pixel(x, 4), Some(bottom));
        assert_eq!(fb.pixel(x, 7), Some(bottom));
    }
}

#[test]
fn test_node_leaving_regrids_survivor() {
    let net = MemoryNetwork::new();
    let mut composer = memory_composer(&net);
    let mut fb = Framebuffer::new(8, 8);

    let mut first = memory_node(&net, &composer);
    let mut second = memory_node(&net, &composer);
    run(&mut composer, &mut [&mut first, &mut second], &mut fb, 3);
    assert_eq!(composer.grid(), Some(GridSize::new(1, 2)));

    first.shutdown();
    run(&mut composer, &mut [&mut second], &mut fb, 3);
    assert_eq!(composer.grid(), Some(GridSize::new(1, 1)));
    assert_eq!(second.tile().map(|t| t.tile_index), Some(TileIndex::new(0, 0)));
    assert_eq!(composer.compositor().received_count(), 1);
}

#[test]
fn test_eight_nodes_leave_two_idle() {
    let net = MemoryNetwork::new();
    let session =
        SessionManager::start_as_composer_with(net.bind_port(7075).unwrap(), SessionConfig::default())
            .unwrap();
    let mut composer = Composer::new(
        session,
        CameraIntrinsics::for_screen(60.0, 0.3, 100.0, 12, 8),
        0.0,
        BG,
    );
    composer.set_scene_state(SceneState::default());
    let mut fb = Framebuffer::new(12, 8);

    // Six render nodes connect first, then two bare sessions.
    let mut nodes: Vec<RenderNode> = (0..6).map(|_| memory_node(&net, &composer)).collect();
    let mut idle: Vec<SessionManager> = (0..2)
        .map(|_| {
            SessionManager::connect(
                net.bind_port(0).unwrap(),
                composer.local_addr(),
                SessionConfig::default(),
            )
            .unwrap()
        })
        .collect();
    let mut idle_events: Vec<Vec<SessionEvent>> = vec![Vec::new(); idle.len()];

    for _ in 0..5 {
        composer.tick(Instant::now(), &mut fb);
        for node in &mut nodes {
            node.tick(Instant::now());
        }
        for (session, events) in idle.iter_mut().zip(&mut idle_events) {
            events.extend(session.poll());
        }
    }
    composer.tick(Instant::now(), &mut fb);

    let grid = GridSize::new(3, 2);
    assert_eq!(composer.grid(), Some(grid));
    assert_eq!(composer.topology().peers().len(), 8);

    let held: BTreeSet<TileIndex> = nodes
        .iter()
        .filter_map(|n| n.tile().map(|t| t.tile_index))
        .collect();
    assert_eq!(held, grid.indices().collect::<BTreeSet<_>>());

    for (session, events) in idle.iter().zip(&idle_events) {
        assert!(session.is_established());
        assert!(!events.iter().any(|e| matches!(
            e,
            SessionEvent::Message {
                message: Message::TileAssignment(_),
                ..
            }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Message {
                message: Message::SceneState(_),
                ..
            }
        )));
    }
    assert!(composer.topology().tile_of(ConnectionId(7)).is_none());
    assert!(composer.topology().tile_of(ConnectionId(8)).is_none());

    let compositor = composer.compositor();
    assert_eq!(compositor.grid(), grid);
    assert_eq!(compositor.received_count(), 6);
    assert!(grid.indices().all(|index| compositor.has_received(index)));
    assert_eq!(grid.indices().count(), 6);
}

// ── Receive loop robustness ──────────────────────────────────────

#[test]
fn test_unknown_tag_is_dropped_and_loop_continues() {
    let net = MemoryNetwork::new();
    let mut composer = memory_composer(&net);
    let mut fb = Framebuffer::new(8, 8);
    let rogue = raw_peer(&net, &mut composer, &mut fb);
    assert_eq!(composer.grid(), Some(GridSize::new(1, 1)));

    let mut unknown = BytesMut::new();
    unknown.put_u16_le(4242);
    unknown.put_slice(&[1, 2, 3, 4]);
    send_raw(&rogue, composer.local_addr(), &unknown, 0);

    // A valid fragment right behind it still gets through.
    let mut image = tilecast_core::TileImage::new(TileIndex::new(0, 0), 8, 8);
    image.fill([9, 8, 7, 255]);
    let encoded = tilecast_core::tile_image::encode(&image, ImageEncoding::Raw).unwrap();
    let message = Message::TileImageFragment(tilecast_core::TileImageFragment::new(
        TileIndex::new(0, 0),
        encoded,
    ));
    send_raw(&rogue, composer.local_addr(), &message.to_bytes().unwrap(), 1);

    let summary = composer.tick(Instant::now(), &mut fb);
    assert_eq!(summary.fragments, 1);
    assert_eq!(fb.pixel(4, 4), Some([9, 8, 7, 255]));
}

#[test]
fn test_scene_updates_coalesce_per_tick() {
    let net = MemoryNetwork::new();
    let mut composer = memory_composer(&net);
    let mut fb = Framebuffer::new(8, 8);
    let mut peers: Vec<SessionManager> = (0..2)
        .map(|_| {
            SessionManager::connect(
                net.bind_port(0).unwrap(),
                composer.local_addr(),
                SessionConfig::default(),
            )
            .unwrap()
        })
        .collect();
    composer.tick(Instant::now(), &mut fb);
    for peer in &mut peers {
        peer.poll();
    }

    let mut a = SceneState::default();
    a.delta_time = 16;
    let mut b = SceneState::default();
    b.delta_time = 33;
    composer.set_scene_state(a);
    composer.set_scene_state(b);
    let summary = composer.tick(Instant::now(), &mut fb);
    assert_eq!(summary.broadcasts, 1);

    for peer in &mut peers {
        let scenes: Vec<SceneState> = peer
            .poll()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Message {
                    message: Message::SceneState(s),
                    ..
                } => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(scenes, vec![b]);
    }
}

#[test]
fn test_lost_fragment_heals_by_resend() {
    let net = MemoryNetwork::new();
    let mut composer = memory_composer(&net);
    let mut fb = Framebuffer::new(8, 8);
    let mut node = memory_node(&net, &composer);
    let t0 = Instant::now();

    composer.tick(t0, &mut fb);
    net.block(composer.local_addr());
    assert_eq!(node.tick(t0), NodeTick::Rendered);
    net.unblock(composer.local_addr());

    composer.tick(t0, &mut fb);
    assert_eq!(composer.compositor().received_count(), 0);

    assert_eq!(node.tick(t0 + Duration::from_millis(250)), NodeTick::Resent);
    composer.tick(t0, &mut fb);
    assert_eq!(composer.compositor().received_count(), 1);
}

// ── Real sockets ─────────────────────────────────────────────────

#[tokio::test]
async fn test_udp_loopback_round_trip() {
    let mut composer = Composer::start(
        "127.0.0.1:0".parse().unwrap(),
        SessionConfig::default(),
        camera(),
        0.0,
        BG,
    )
    .unwrap();
    composer.set_scene_state(SceneState::default());
    let port = composer.local_addr().port();
    let mut fb = Framebuffer::new(8, 8);

    let connecting = tokio::spawn(async move {
        RenderNode::connect(
            "127.0.0.1",
            port,
            SessionConfig::default(),
            Box::new(FlatRenderer::new()),
            node_options(),
        )
        .await
    });
    while !connecting.is_finished() {
        composer.tick(Instant::now(), &mut fb);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut node = connecting.await.unwrap().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while composer.compositor().received_count() == 0 && Instant::now() < deadline {
        composer.tick(Instant::now(), &mut fb);
        node.tick(Instant::now());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(composer.grid(), Some(GridSize::new(1, 1)));
    assert_eq!(composer.compositor().received_count(), 1);
    assert_ne!(fb.pixel(4, 4), Some(BG));

    composer.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(node.tick(Instant::now()), NodeTick::Disconnected);
}

#[tokio::test]
async fn test_udp_full_hd_fragment_arrives() {
    let full_hd = CameraIntrinsics::for_screen(60.0, 0.3, 100.0, 1920, 1080);
    let mut composer = Composer::start(
        "127.0.0.1:0".parse().unwrap(),
        SessionConfig::default(),
        full_hd,
        0.0,
        BG,
    )
    .unwrap();
    composer.set_scene_state(SceneState::default());
    let port = composer.local_addr().port();
    let mut target = CountingTarget::default();

    // Raw RGBA: about 8 MB, some 6000 datagrams.
    let options = NodeOptions {
        encoding: ImageEncoding::Raw,
        fragments_per_second: 0.0,
        resend_interval: Duration::from_secs(10),
    };
    let connecting = tokio::spawn(async move {
        RenderNode::connect(
            "127.0.0.1",
            port,
            SessionConfig::default(),
            Box::new(FlatRenderer::new()),
            options,
        )
        .await
    });
    while !connecting.is_finished() {
        composer.tick(Instant::now(), &mut target);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut node = connecting.await.unwrap().unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while composer.compositor().received_count() == 0 && Instant::now() < deadline {
        composer.tick(Instant::now(), &mut target);
        node.tick(Instant::now());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(composer.grid(), Some(GridSize::new(1, 1)));
    assert_eq!(composer.compositor().received_count(), 1);
    assert_eq!(node.frames_sent(), 1);
    let sent = node.renderer().rendered_image().unwrap();
    assert_eq!((sent.width, sent.height), (1920, 1080));
    assert_eq!(composer.compositor().tile(TileIndex::new(0, 0)), Some(sent));
    assert!(target.quads > 0);
    assert!(target.clears > 0);
}

#[tokio::test]
async fn test_connect_to_silent_port_times_out() {
    let config = SessionConfig {
        connect_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    };
    // Bound but never polled: connects go unanswered.
    let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = silent.local_addr().unwrap().port();

    let result = RenderNode::connect(
        "127.0.0.1",
        port,
        config,
        Box::new(FlatRenderer::new()),
        node_options(),
    )
    .await;
    assert!(matches!(result, Err(tilecast_core::TileError::ConnectTimeout { .. })));
}

//! The composer: owns the screen, hands out tiles, stitches fragments.
//!
//! One [`Composer::tick`] per frame, in order:
//!
//! 1. poll the session
//! 2. route events (membership changes regrid, fragments go to the compositor)
//! 3. flush throttled scene state and render parameters
//! 4. composite into the caller's target

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::compositor::{CompositeTarget, Compositor};
use crate::error::TileError;
use crate::protocol::{Message, RenderParameters, SceneState, TileImageFragment};
use crate::session::{ConnectionId, SessionConfig, SessionEvent, SessionManager, StateSync};
use crate::tile::{CameraIntrinsics, GridSize};
use crate::topology::{Regrid, TopologyController};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposerTick {
    pub joined: usize,
    pub left: usize,
    pub fragments: usize,
    /// State messages broadcast this tick.
    pub broadcasts: usize,
}

pub struct Composer {
    session: SessionManager,
    topology: TopologyController,
    compositor: Compositor,
    sync: StateSync,
    /// Peers that were last sent a tile.
    holding: BTreeSet<ConnectionId>,
}

impl Composer {
    /// Wrap an already-started composer session.
    pub fn new(
        session: SessionManager,
        camera: CameraIntrinsics,
        updates_per_second: f32,
        background: [u8; 4],
    ) -> Self {
        Self {
            session,
            topology: TopologyController::new(camera),
            compositor: Compositor::new(background),
            sync: StateSync::new(updates_per_second),
            holding: BTreeSet::new(),
        }
    }

    /// Bind `addr` and start accepting render nodes.
    pub fn start(
        addr: SocketAddr,
        config: SessionConfig,
        camera: CameraIntrinsics,
        updates_per_second: f32,
        background: [u8; 4],
    ) -> Result<Self, TileError> {
        let session = SessionManager::start_as_composer(addr, config)?;
        Ok(Self::new(session, camera, updates_per_second, background))
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    pub fn grid(&self) -> Option<GridSize> {
        self.topology.grid()
    }

    /// `false` while no render node holds a tile.
    pub fn is_active(&self) -> bool {
        self.topology.is_active() && self.compositor.is_active()
    }

    pub fn camera(&self) -> CameraIntrinsics {
        self.topology.camera()
    }

    // ── State ────────────────────────────────────────────────────

    /// Queue a scene update; only the latest one per broadcast goes out.
    pub fn set_scene_state(&mut self, state: SceneState) {
        self.sync.set_scene_state(state);
    }

    pub fn set_render_parameters(&mut self, params: RenderParameters) -> Result<(), TileError> {
        self.sync.set_render_parameters(params)
    }

    pub fn scene_state(&self) -> Option<SceneState> {
        self.sync.scene_state()
    }

    pub fn render_parameters(&self) -> RenderParameters {
        self.sync.render_parameters()
    }

    /// Force a `w × h` grid, or go back to the automatic shape with `None`.
    pub fn change_number_of_tiles(&mut self, tiles: Option<(u32, u32)>) -> Result<(), TileError> {
        let result = self.topology.change_number_of_tiles(tiles);
        self.apply_regrid(result)
    }

    /// New screen or lens: every tile is reassigned.
    pub fn set_camera(&mut self, camera: CameraIntrinsics) -> Result<(), TileError> {
        let result = self.topology.set_camera(camera);
        self.apply_regrid(result)
    }

    // ── Frame ────────────────────────────────────────────────────

    pub fn tick(&mut self, now: Instant, target: &mut dyn CompositeTarget) -> ComposerTick {
        let mut summary = ComposerTick::default();

        for event in self.session.poll_at(now) {
            match event {
                SessionEvent::PeerConnected(peer) => {
                    summary.joined += 1;
                    let result = self.topology.on_peer_connected(peer);
                    // Errors here are already logged by the topology.
                    let _ = self.apply_regrid(result);
                    self.send_snapshot(peer);
                }
                SessionEvent::PeerDisconnected(peer) => {
                    summary.left += 1;
                    let result = self.topology.on_peer_disconnected(peer);
                    let _ = self.apply_regrid(result);
                }
                SessionEvent::Message {
                    from,
                    message: Message::TileImageFragment(fragment),
                } => {
                    if self.accept_fragment(from, &fragment) {
                        summary.fragments += 1;
                    }
                }
                SessionEvent::Message { from, message } => {
                    debug!(peer = %from, tag = %message.tag(), "ignoring message from render node");
                }
            }
        }

        for message in self.sync.flush(now) {
            match self.session.broadcast(&message) {
                Ok(_) => summary.broadcasts += 1,
                Err(e) => warn!(tag = %message.tag(), error = %e, "state broadcast failed"),
            }
        }

        self.compositor.on_frame(target);
        summary
    }

    /// Receive and send queued datagrams between ticks. Events wait for
    /// the next [`tick`](Self::tick).
    pub fn pump(&mut self, now: Instant) {
        self.session.pump(now);
    }

    /// Disconnect every render node and release the socket.
    pub fn shutdown(&mut self) {
        self.session.shutdown();
        self.compositor.deactivate();
    }

    // ── Internals ────────────────────────────────────────────────

    fn apply_regrid(&mut self, result: Result<Regrid, TileError>) -> Result<(), TileError> {
        let regrid = match result {
            Ok(regrid) => regrid,
            Err(e) => {
                if !self.topology.is_active() {
                    self.compositor.deactivate();
                    self.holding.clear();
                }
                return Err(e);
            }
        };

        let camera = self.topology.camera();
        if let Err(e) = self.compositor.reset(regrid.grid, &camera) {
            warn!(grid = %regrid.grid, error = %e, "compositor reset failed");
            return Err(e);
        }
        let revoked: Vec<ConnectionId> = regrid
            .unassigned
            .iter()
            .copied()
            .filter(|peer| self.holding.contains(peer))
            .collect();
        self.holding = regrid.assignments.iter().map(|(peer, _)| *peer).collect();

        for (peer, tile) in &regrid.assignments {
            if let Err(e) = self.session.send_to(*peer, &Message::TileAssignment(*tile)) {
                warn!(%peer, tile = %tile.tile_index, error = %e, "tile assignment send failed");
            }
        }
        for peer in revoked {
            info!(%peer, grid = %regrid.grid, "revoking tile");
            if let Err(e) = self.session.send_to(peer, &Message::TileRevoked) {
                warn!(%peer, error = %e, "tile revoke send failed");
            }
        }
        Ok(())
    }

    /// Bring a new peer up to date without waiting for the next change.
    fn send_snapshot(&mut self, peer: ConnectionId) {
        for message in self.sync.snapshot() {
            if let Err(e) = self.session.send_to(peer, &message) {
                warn!(%peer, tag = %message.tag(), error = %e, "snapshot send failed");
            }
        }
    }

    /// Only a peer's current tile is accepted; anything else is left over
    /// from before a regrid.
    fn accept_fragment(&mut self, from: ConnectionId, fragment: &TileImageFragment) -> bool {
        match self.topology.tile_of(from) {
            Some(tile) if tile.tile_index == fragment.tile_index => self
                .compositor
                .set_texture(fragment.tile_index, &fragment.image)
                .is_ok(),
            Some(tile) => {
                debug!(
                    peer = %from,
                    fragment = %fragment.tile_index,
                    assigned = %tile.tile_index,
                    "stale fragment dropped"
                );
                false
            }
            None => {
                debug!(peer = %from, "fragment from peer without a tile dropped");
                false
            }
        }
    }
}

impl Drop for Composer {
    fn drop(&mut self) {
        if self.session.is_running() {
            info!("composer dropped, shutting down session");
            self.shutdown();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

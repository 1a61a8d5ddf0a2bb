//! The render node: renders its assigned tile and ships it back.
//!
//! State arriving from the composer is applied last-write-wins and marks
//! the node dirty. A dirty node re-renders at most `fragments_per_second`
//! times a second. The last fragment is re-sent every `resend_interval`
//! so one lost datagram does not leave a hole in the composite. Neither
//! happens while the previous fragment is still draining through the
//! session's pacer.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::TileError;
use crate::protocol::{Message, TileImageFragment};
use crate::render::TileRenderer;
use crate::session::{ConnectionId, SessionConfig, SessionEvent, SessionManager};
use crate::tile::ScreenTile;
use crate::tile_image::{ImageEncoding, encode};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeOptions {
    pub encoding: ImageEncoding,
    /// Render/send rate cap. `<= 0` means no cap.
    pub fragments_per_second: f32,
    /// Period for re-sending an unchanged fragment. Zero disables.
    pub resend_interval: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            encoding: ImageEncoding::default(),
            fragments_per_second: 30.0,
            resend_interval: Duration::from_millis(500),
        }
    }
}

/// Outcome of one [`RenderNode::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTick {
    Idle,
    /// A fresh frame was rendered and sent.
    Rendered,
    /// The previous fragment went out again.
    Resent,
    /// The previous fragment is still queued; nothing new was sent.
    Flushing,
    /// The composer is gone; the node should exit.
    Disconnected,
}

pub struct RenderNode {
    session: SessionManager,
    composer: Option<ConnectionId>,
    renderer: Box<dyn TileRenderer>,
    options: NodeOptions,
    min_interval: Duration,
    dirty: bool,
    last_render: Option<Instant>,
    last_sent: Option<Instant>,
    last_fragment: Option<Message>,
    composer_lost: bool,
    frames_sent: u64,
}

impl RenderNode {
    /// Wrap a session that is connected, or connecting, to a composer.
    pub fn new(session: SessionManager, renderer: Box<dyn TileRenderer>, options: NodeOptions) -> Self {
        let composer = session.peers().first().map(|p| p.id);
        let min_interval = if options.fragments_per_second > 0.0 && options.fragments_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / f64::from(options.fragments_per_second))
        } else {
            Duration::ZERO
        };
        Self {
            session,
            composer,
            renderer,
            options,
            min_interval,
            dirty: false,
            last_render: None,
            last_sent: None,
            last_fragment: None,
            composer_lost: false,
            frames_sent: 0,
        }
    }

    /// Connect to `host:port` and wait for the composer to accept.
    pub async fn connect(
        host: &str,
        port: u16,
        config: SessionConfig,
        renderer: Box<dyn TileRenderer>,
        options: NodeOptions,
    ) -> Result<Self, TileError> {
        let session = SessionManager::start_as_render_node(host, port, config).await?;
        Ok(Self::new(session, renderer, options))
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn tile(&self) -> Option<&ScreenTile> {
        self.renderer.tile()
    }

    pub fn renderer(&self) -> &dyn TileRenderer {
        self.renderer.as_ref()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn is_connected(&self) -> bool {
        !self.composer_lost && self.session.is_running()
    }

    // ── Frame ────────────────────────────────────────────────────

    pub fn tick(&mut self, now: Instant) -> NodeTick {
        for event in self.session.poll_at(now) {
            match event {
                SessionEvent::PeerConnected(id) => self.composer = Some(id),
                SessionEvent::PeerDisconnected(id) if Some(id) == self.composer => {
                    warn!(peer = %id, "composer disconnected");
                    self.composer = None;
                    self.composer_lost = true;
                }
                SessionEvent::PeerDisconnected(_) => {}
                SessionEvent::Message { message, .. } => self.apply(message),
            }
        }

        if !self.is_connected() {
            return NodeTick::Disconnected;
        }
        if self.composer.is_some_and(|id| !self.session.is_flushed(id)) {
            return NodeTick::Flushing;
        }

        if self.dirty && self.render_allowed(now) {
            self.dirty = false;
            self.last_render = Some(now);
            if self.render_and_send(now) {
                return NodeTick::Rendered;
            }
            return NodeTick::Idle;
        }

        if self.resend_due(now) && self.resend(now) {
            return NodeTick::Resent;
        }
        NodeTick::Idle
    }

    /// Move queued datagrams without rendering. Messages that arrive are
    /// handled by the next [`tick`](Self::tick).
    pub fn pump(&mut self, now: Instant) {
        self.session.pump(now);
    }

    pub fn shutdown(&mut self) {
        self.session.shutdown();
    }

    // ── Internals ────────────────────────────────────────────────

    fn apply(&mut self, message: Message) {
        match message {
            Message::SceneState(state) => self.renderer.set_scene_state(state),
            Message::RenderParameters(params) => self.renderer.set_render_parameters(params),
            Message::TileAssignment(tile) => {
                info!(tile = %tile.tile_index, grid = %tile.num_tiles, "tile assigned");
                if let Err(e) = self.renderer.set_tile(tile) {
                    warn!(tile = %tile.tile_index, error = %e, "cannot use tile");
                    return;
                }
                self.last_fragment = None;
            }
            Message::TileRevoked => {
                if let Some(tile) = self.renderer.tile() {
                    info!(tile = %tile.tile_index, "tile revoked");
                }
                self.renderer.clear_tile();
                self.last_fragment = None;
                self.dirty = false;
                return;
            }
            Message::TileImageFragment(_) => {
                debug!("ignoring fragment sent to a render node");
                return;
            }
        }
        self.dirty = true;
    }

    fn render_allowed(&self, now: Instant) -> bool {
        self.last_render
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval)
    }

    fn resend_due(&self, now: Instant) -> bool {
        !self.options.resend_interval.is_zero()
            && self.last_fragment.is_some()
            && self
                .last_sent
                .is_some_and(|last| now.saturating_duration_since(last) >= self.options.resend_interval)
    }

    fn render_and_send(&mut self, now: Instant) -> bool {
        let image = match self.renderer.render_tile() {
            Ok(image) => image,
            Err(TileError::NotReady(what)) => {
                debug!(what, "not ready to render");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "render failed");
                return false;
            }
        };
        let bytes = match encode(image, self.options.encoding) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "fragment encoding failed");
                return false;
            }
        };
        let message = Message::TileImageFragment(TileImageFragment::new(image.tile_index, Bytes::from(bytes)));
        self.last_fragment = Some(message);
        self.resend(now)
    }

    fn resend(&mut self, now: Instant) -> bool {
        let (Some(composer), Some(message)) = (self.composer, self.last_fragment.as_ref()) else {
            return false;
        };
        match self.session.send_to(composer, message) {
            Ok(()) => {
                self.last_sent = Some(now);
                self.frames_sent += 1;
                true
            }
            Err(e) => {
                warn!(peer = %composer, error = %e, "fragment send failed");
                false
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

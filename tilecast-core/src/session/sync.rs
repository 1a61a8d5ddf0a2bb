//! Throttled state broadcast.
//!
//! Scene state and render parameters are coalesced between ticks: setting
//! either one only replaces a pending slot, and a flush emits at most one
//! message of each kind carrying the latest value.

use std::time::{Duration, Instant};

use tracing::error;

use crate::error::TileError;
use crate::protocol::{Message, RenderParameters, SceneState};

pub struct StateSync {
    interval: Duration,
    last_flush: Option<Instant>,
    pending_scene: Option<SceneState>,
    pending_params: Option<RenderParameters>,
    scene: Option<SceneState>,
    params: RenderParameters,
}

impl StateSync {
    /// `updates_per_second <= 0` disables throttling.
    pub fn new(updates_per_second: f32) -> Self {
        let interval = if updates_per_second > 0.0 && updates_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / f64::from(updates_per_second))
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            last_flush: None,
            pending_scene: None,
            pending_params: None,
            scene: None,
            params: RenderParameters::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_scene_state(&mut self, state: SceneState) {
        self.scene = Some(state);
        self.pending_scene = Some(state);
    }

    /// Out-of-range parameters are logged and never sent.
    pub fn set_render_parameters(&mut self, params: RenderParameters) -> Result<(), TileError> {
        if let Err(e) = params.validate() {
            error!(pass = params.pass, opacity = params.opacity, "rejecting render parameters");
            return Err(e);
        }
        self.params = params;
        self.pending_params = Some(params);
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.pending_scene.is_some() || self.pending_params.is_some()
    }

    /// Latest scene state, sent or not.
    pub fn scene_state(&self) -> Option<SceneState> {
        self.scene
    }

    pub fn render_parameters(&self) -> RenderParameters {
        self.params
    }

    /// Messages for a peer that just joined: the current state, whether or
    /// not it is pending.
    pub fn snapshot(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(2);
        if let Some(scene) = self.scene {
            out.push(Message::SceneState(scene));
        }
        out.push(Message::RenderParameters(self.params));
        out
    }

    /// Drain pending state if the throttle interval has elapsed.
    pub fn flush(&mut self, now: Instant) -> Vec<Message> {
        if !self.is_dirty() {
            return Vec::new();
        }
        if let Some(last) = self.last_flush {
            if now.saturating_duration_since(last) < self.interval {
                return Vec::new();
            }
        }
        self.last_flush = Some(now);

        let mut out = Vec::with_capacity(2);
        if let Some(scene) = self.pending_scene.take() {
            out.push(Message::SceneState(scene));
        }
        if let Some(params) = self.pending_params.take() {
            out.push(Message::RenderParameters(params));
        }
        out
    }
}

//! Orbit camera driving the scene state.
//!
//! Circles the volume at a fixed radius and height, always looking at the
//! origin, so render nodes see a continuous stream of scene changes.

use std::time::Duration;

use glam::{Mat4, Vec3};
use tilecast_core::{CameraIntrinsics, SceneState, TileError};

#[derive(Debug, Clone, PartialEq)]
pub struct OrbitCamera {
    pub radius: f32,
    pub height: f32,
    /// Radians per second.
    pub speed: f32,
    /// Current angle around the Y axis, radians.
    pub angle: f32,
    pub target: Vec3,
}

impl OrbitCamera {
    pub fn new(radius: f32, height: f32, degrees_per_second: f32) -> Self {
        Self {
            radius,
            height,
            speed: degrees_per_second.to_radians(),
            angle: 0.0,
            target: Vec3::ZERO,
        }
    }

    pub fn advance(&mut self, dt: Duration) {
        self.angle = (self.angle + self.speed * dt.as_secs_f32()).rem_euclid(std::f32::consts::TAU);
    }

    pub fn eye(&self) -> Vec3 {
        self.target + Vec3::new(self.radius * self.angle.sin(), self.height, self.radius * self.angle.cos())
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    /// Scene state for the current pose. `delta` is the time since the
    /// previous state, sent in milliseconds.
    pub fn scene_state(&self, intrinsics: &CameraIntrinsics, delta: Duration) -> Result<SceneState, TileError> {
        Ok(SceneState {
            delta_time: i64::try_from(delta.as_millis()).unwrap_or(i64::MAX),
            camera_position: self.eye(),
            view_matrix: self.view_matrix(),
            projection_matrix: intrinsics.projection()?,
            volume_world_matrix: Mat4::IDENTITY,
        })
    }
}

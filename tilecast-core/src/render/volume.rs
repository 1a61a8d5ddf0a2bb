//! CPU ray-marching volume renderer.
//!
//! Each pixel of the tile casts a ray through the tile's off-center
//! frustum (`inverse(P_tile · V)`), intersects the volume box in
//! `volumeWorldMatrix` space, and marches the density field:
//!
//! - pass 0: front-to-back emission/absorption, extinction scaled by opacity
//! - pass 1: first hit above the iso threshold, shaded by the field gradient

use glam::{Mat4, Vec3};
use tracing::{debug, trace};

use super::TileRenderer;
use super::field::{DensityField, GaussianBlobs};
use super::ray::Ray;
use crate::error::TileError;
use crate::protocol::{RenderParameters, SceneState};
use crate::tile::ScreenTile;
use crate::tile_image::TileImage;

const BOX_MIN: Vec3 = Vec3::splat(-0.5);
const BOX_MAX: Vec3 = Vec3::splat(0.5);

/// Density at which pass 1 considers the surface hit.
pub const ISO_THRESHOLD: f32 = 0.5;

/// Extinction coefficient applied to `density * opacity`.
const EXTINCTION: f32 = 12.0;

/// Accumulated alpha at which marching stops.
const EARLY_EXIT_ALPHA: f32 = 0.99;

pub struct VolumeRenderer<F: DensityField = GaussianBlobs> {
    field: F,
    /// Samples across the box diagonal.
    steps: u32,
    background: Vec3,
    tile: Option<ScreenTile>,
    scene: Option<SceneState>,
    params: RenderParameters,
    /// Completed frame, handed out by `rendered_image`.
    front: TileImage,
    /// Frame being rendered.
    back: TileImage,
    has_frame: bool,
    frames: u64,
}

impl VolumeRenderer<GaussianBlobs> {
    pub fn with_default_field(steps: u32) -> Self {
        Self::new(GaussianBlobs::default(), steps)
    }
}

impl<F: DensityField> VolumeRenderer<F> {
    pub fn new(field: F, steps: u32) -> Self {
        Self {
            field,
            steps: steps.max(1),
            background: Vec3::new(0.05, 0.05, 0.08),
            tile: None,
            scene: None,
            params: RenderParameters::default(),
            front: TileImage::new(Default::default(), 0, 0),
            back: TileImage::new(Default::default(), 0, 0),
            has_frame: false,
            frames: 0,
        }
    }

    pub fn with_background(mut self, rgb: Vec3) -> Self {
        self.background = rgb;
        self
    }

    pub fn field(&self) -> &F {
        &self.field
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    fn shade_pixel(&self, ray: &Ray, pass: i32, opacity: f32) -> Vec3 {
        let Some((t0, t1)) = ray.intersect_aabb(BOX_MIN, BOX_MAX) else {
            return self.background;
        };
        let dir_len = ray.dir.length();
        if dir_len == 0.0 {
            return self.background;
        }
        // Step length in local units, converted to ray parameter.
        let step = BOX_MAX.distance(BOX_MIN) / self.steps as f32;
        let dt = step / dir_len;
        // A chord never exceeds the diagonal, so `steps + 1` samples cover it
        // even when `t` is too large for `t + dt` to advance.
        let samples = ((t1 - t0) / dt).ceil().clamp(0.0, self.steps as f32 + 1.0) as u32;

        match pass {
            1 => self.iso_surface(ray, t0, samples, dt, opacity),
            _ => self.emission_absorption(ray, t0, samples, dt, step, opacity),
        }
    }

    fn emission_absorption(&self, ray: &Ray, t0: f32, samples: u32, dt: f32, step: f32, opacity: f32) -> Vec3 {
        let mut color = Vec3::ZERO;
        let mut alpha = 0.0f32;
        for i in 0..samples {
            if alpha >= EARLY_EXIT_ALPHA {
                break;
            }
            let p = ray.at(t0 + dt * (i as f32 + 0.5));
            let density = self.field.density(p);
            if density > 1e-4 {
                let a = 1.0 - (-density * opacity * EXTINCTION * step).exp();
                color += (1.0 - alpha) * a * self.field.color(p);
                alpha += (1.0 - alpha) * a;
            }
        }
        color + (1.0 - alpha) * self.background
    }

    fn iso_surface(&self, ray: &Ray, t0: f32, samples: u32, dt: f32, opacity: f32) -> Vec3 {
        let t1 = t0 + dt * samples as f32;
        for i in 0..=samples {
            let p = ray.at((t0 + dt * i as f32).min(t1));
            if self.field.density(p) >= ISO_THRESHOLD {
                let normal = -self.field.gradient(p).normalize_or_zero();
                let light = -ray.dir.normalize_or_zero();
                let diffuse = normal.dot(light).max(0.0);
                let shaded = self.field.color(p) * (0.2 + 0.8 * diffuse);
                let mix = opacity.min(1.0);
                return self.background.lerp(shaded, mix);
            }
        }
        self.background
    }
}

impl<F: DensityField> TileRenderer for VolumeRenderer<F> {
    fn set_tile(&mut self, tile: ScreenTile) -> Result<(), TileError> {
        let (w, h) = tile.pixel_size()?;
        if (w, h) != (self.back.width, self.back.height) {
            debug!(tile = %tile.tile_index, width = w, height = h, "reallocating tile buffers");
            self.front = TileImage::new(tile.tile_index, w, h);
            self.back = TileImage::new(tile.tile_index, w, h);
        } else {
            self.front.tile_index = tile.tile_index;
            self.back.tile_index = tile.tile_index;
        }
        self.has_frame = false;
        self.tile = Some(tile);
        Ok(())
    }

    fn clear_tile(&mut self) {
        self.tile = None;
        self.has_frame = false;
    }

    fn set_scene_state(&mut self, state: SceneState) {
        self.scene = Some(state);
    }

    fn set_render_parameters(&mut self, params: RenderParameters) {
        self.params = params;
    }

    fn tile(&self) -> Option<&ScreenTile> {
        self.tile.as_ref()
    }

    fn render_tile(&mut self) -> Result<&TileImage, TileError> {
        let tile = self.tile.ok_or(TileError::NotReady("no tile assigned"))?;
        let scene = self.scene.ok_or(TileError::NotReady("no scene state"))?;

        let projection = tile.off_center_projection()?;
        let inverse_vp = (projection * scene.view_matrix).inverse();
        let world_to_volume: Mat4 = scene.volume_world_matrix.inverse();
        if !inverse_vp.is_finite() || !world_to_volume.is_finite() {
            return Err(TileError::Domain("singular view or volume matrix"));
        }

        let (w, h) = (self.back.width, self.back.height);
        let RenderParameters { pass, opacity } = self.params;
        let mut back = std::mem::replace(&mut self.back, TileImage::new(tile.tile_index, 0, 0));

        for row in 0..h {
            // Rows are top-down; NDC y points up.
            let ndc_y = 1.0 - (row as f32 + 0.5) / h as f32 * 2.0;
            for col in 0..w {
                let ndc_x = (col as f32 + 0.5) / w as f32 * 2.0 - 1.0;
                let ray = Ray::through_ndc(&inverse_vp, ndc_x, ndc_y).transformed(&world_to_volume);
                let rgb = self.shade_pixel(&ray, pass, opacity).clamp(Vec3::ZERO, Vec3::ONE);
                back.set_pixel(
                    col,
                    row,
                    [
                        (rgb.x * 255.0).round() as u8,
                        (rgb.y * 255.0).round() as u8,
                        (rgb.z * 255.0).round() as u8,
                        255,
                    ],
                );
            }
        }

        self.back = std::mem::replace(&mut self.front, back);
        self.has_frame = true;
        self.frames += 1;
        trace!(tile = %tile.tile_index, frame = self.frames, pass, "tile rendered");
        Ok(&self.front)
    }

    fn rendered_image(&self) -> Option<&TileImage> {
        self.has_frame.then_some(&self.front)
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Render-node side: turning scene state and a tile into pixels.

pub mod field;
pub mod ray;
pub mod volume;

pub use field::{Blob, DensityField, GaussianBlobs};
pub use ray::Ray;
pub use volume::VolumeRenderer;

use crate::error::TileError;
use crate::protocol::{RenderParameters, SceneState};
use crate::tile::ScreenTile;
use crate::tile_image::TileImage;

/// A backend that renders one assigned tile.
///
/// Implementations keep the last completed frame intact while rendering
/// the next one, and reallocate their buffers when the tile's pixel size
/// changes.
pub trait TileRenderer: Send {
    fn set_tile(&mut self, tile: ScreenTile) -> Result<(), TileError>;

    /// Drop the current tile and its frame; `render_tile` is `NotReady`
    /// until a new tile arrives.
    fn clear_tile(&mut self);

    fn set_scene_state(&mut self, state: SceneState);

    fn set_render_parameters(&mut self, params: RenderParameters);

    fn tile(&self) -> Option<&ScreenTile>;

    /// Render with the latest state. Fails with `NotReady` until both a
    /// tile and a scene state have arrived.
    fn render_tile(&mut self) -> Result<&TileImage, TileError>;

    /// The most recently completed frame.
    fn rendered_image(&self) -> Option<&TileImage>;
}

// ── FlatRenderer ─────────────────────────────────────────────────

/// Fills its tile with one color derived from the tile index.
///
/// Makes tile placement visible without any volume data.
pub struct FlatRenderer {
    tile: Option<ScreenTile>,
    scene: Option<SceneState>,
    params: RenderParameters,
    front: Option<TileImage>,
}

impl FlatRenderer {
    pub fn new() -> Self {
        Self {
            tile: None,
            scene: None,
            params: RenderParameters::default(),
            front: None,
        }
    }

    /// Color of a tile: distinct per index, alpha opaque.
    pub fn color_for(tile: &ScreenTile) -> [u8; 4] {
        let i = tile.tile_index;
        [
            (40 + i.x * 70 % 216) as u8,
            (40 + i.y * 90 % 216) as u8,
            (200u32.saturating_sub((i.x + i.y) * 30)) as u8,
            255,
        ]
    }
}

impl Default for FlatRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TileRenderer for FlatRenderer {
    fn set_tile(&mut self, tile: ScreenTile) -> Result<(), TileError> {
        tile.pixel_size()?;
        self.tile = Some(tile);
        self.front = None;
        Ok(())
    }

    fn clear_tile(&mut self) {
        self.tile = None;
        self.front = None;
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
        if self.scene.is_none() {
            return Err(TileError::NotReady("no scene state"));
        }
        let (w, h) = tile.pixel_size()?;
        let mut image = TileImage::new(tile.tile_index, w, h);
        let mut rgba = Self::color_for(&tile);
        let scale = (self.params.opacity / RenderParameters::MAX_OPACITY * 2.0).min(1.0);
        for c in &mut rgba[..3] {
            *c = (*c as f32 * scale) as u8;
        }
        image.fill(rgba);
        Ok(self.front.insert(image))
    }

    fn rendered_image(&self) -> Option<&TileImage> {
        self.front.as_ref()
    }
}

//! Reassembling tile fragments into one frame.
//!
//! The [`Compositor`] keeps one [`TileImage`] per grid cell in a flat,
//! x-major vector. Fragments decode in place into their cell; every frame
//! each received cell is drawn into its NDC rectangle on a
//! [`CompositeTarget`]. Cells that have not received anything yet stay at
//! the background color.

use std::path::Path;

use image::{ExtendedColorType, ImageFormat};
use tracing::{debug, warn};

use crate::error::TileError;
use crate::tile::{CameraIntrinsics, GridSize, NdcRect, TileIndex, ndc_rect};
use crate::tile_image::{TileImage, decode_into};

// ── CompositeTarget ──────────────────────────────────────────────

/// Anything tiles can be drawn onto.
pub trait CompositeTarget {
    fn clear(&mut self, rgba: [u8; 4]);

    /// Draw `image` stretched over `rect` (NDC, y up).
    fn draw_quad(&mut self, rect: NdcRect, image: &TileImage);
}

// ── Framebuffer ──────────────────────────────────────────────────

/// CPU render target, RGBA8 rows top-down.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; TileImage::byte_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at column `x`, row `y` from the top.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Pixel span `[start, end)` covered by NDC `[lo, hi]` on an axis of `extent` pixels.
    fn span(lo: f32, hi: f32, extent: u32) -> (u32, u32) {
        let to_px = |v: f32| (((v + 1.0) * 0.5 * extent as f32).round().max(0.0) as u32).min(extent);
        (to_px(lo), to_px(hi))
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), TileError> {
        image::save_buffer_with_format(
            path,
            &self.pixels,
            self.width,
            self.height,
            ExtendedColorType::Rgba8,
            ImageFormat::Png,
        )?;
        Ok(())
    }
}

impl CompositeTarget for Framebuffer {
    fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    fn draw_quad(&mut self, rect: NdcRect, image: &TileImage) {
        if image.is_empty() {
            return;
        }
        let (x0, x1) = Self::span(rect.left, rect.right, self.width);
        // NDC y points up, rows count down.
        let (b, t) = Self::span(rect.bottom, rect.top, self.height);
        let (r0, r1) = (self.height - t, self.height - b);
        if x1 <= x0 || r1 <= r0 {
            return;
        }

        let (dw, dh) = ((x1 - x0) as f32, (r1 - r0) as f32);
        for row in r0..r1 {
            let v = (row - r0) as f32 + 0.5;
            let src_y = ((v / dh * image.height as f32) as u32).min(image.height - 1);
            for col in x0..x1 {
                let u = (col - x0) as f32 + 0.5;
                let src_x = ((u / dw * image.width as f32) as u32).min(image.width - 1);
                let s = (src_y as usize * image.width as usize + src_x as usize) * 4;
                let d = (row as usize * self.width as usize + col as usize) * 4;
                self.pixels[d..d + 4].copy_from_slice(&image.pixels[s..s + 4]);
            }
        }
    }
}

// ── Compositor ───────────────────────────────────────────────────

struct TileSlot {
    image: TileImage,
    received: bool,
}

pub struct Compositor {
    active: bool,
    grid: GridSize,
    slots: Vec<TileSlot>,
    background: [u8; 4],
}

impl Compositor {
    pub fn new(background: [u8; 4]) -> Self {
        Self {
            active: false,
            grid: GridSize::default(),
            slots: Vec::new(),
            background,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn background(&self) -> [u8; 4] {
        self.background
    }

    /// Drop every cached tile and allocate a blank one per cell, sized
    /// `screen / num_tiles`.
    pub fn reset(&mut self, grid: GridSize, camera: &CameraIntrinsics) -> Result<(), TileError> {
        if grid.is_empty() {
            self.deactivate();
            return Err(TileError::Domain("tile grid has a zero axis"));
        }
        let width = camera.screen_width / grid.x;
        let height = camera.screen_height / grid.y;
        self.slots = grid
            .indices()
            .map(|index| TileSlot {
                image: TileImage::new(index, width, height),
                received: false,
            })
            .collect();
        self.grid = grid;
        self.active = true;
        debug!(%grid, tile_width = width, tile_height = height, "compositor reset");
        Ok(())
    }

    /// Stop drawing and release all tiles.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.grid = GridSize::default();
        self.slots.clear();
    }

    /// Decode a fragment into the cached image of `index`.
    ///
    /// Unknown indices and undecodable fragments are logged and leave the
    /// cache untouched.
    pub fn set_texture(&mut self, index: TileIndex, encoded: &[u8]) -> Result<(), TileError> {
        let Some(slot) = self
            .grid
            .flat_index(index)
            .and_then(|i| self.slots.get_mut(i))
        else {
            warn!(tile = %index, grid = %self.grid, "fragment for unknown tile dropped");
            return Err(TileError::Topology(format!(
                "tile {index} is not part of grid {}",
                self.grid
            )));
        };

        if let Err(e) = decode_into(&mut slot.image, encoded) {
            warn!(tile = %index, error = %e, "fragment dropped");
            return Err(e);
        }
        slot.received = true;
        Ok(())
    }

    pub fn tile(&self, index: TileIndex) -> Option<&TileImage> {
        self.grid
            .flat_index(index)
            .and_then(|i| self.slots.get(i))
            .map(|slot| &slot.image)
    }

    pub fn has_received(&self, index: TileIndex) -> bool {
        self.grid
            .flat_index(index)
            .and_then(|i| self.slots.get(i))
            .is_some_and(|slot| slot.received)
    }

    pub fn received_count(&self) -> usize {
        self.slots.iter().filter(|s| s.received).count()
    }

    /// Draw every received tile. Does nothing while inactive.
    pub fn on_frame(&self, target: &mut dyn CompositeTarget) {
        if !self.active {
            return;
        }
        target.clear(self.background);
        for slot in self.slots.iter().filter(|s| s.received) {
            match ndc_rect(self.grid, slot.image.tile_index) {
                Ok(rect) => target.draw_quad(rect, &slot.image),
                Err(e) => warn!(tile = %slot.image.tile_index, error = %e, "cannot place tile"),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

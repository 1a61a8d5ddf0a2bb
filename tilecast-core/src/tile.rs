//! Screen tiles and off-center projection.
//!
//! A [`ScreenTile`] is one cell of a `num_tiles.x × num_tiles.y` grid laid
//! over the composer's viewport. Tile `x` grows rightward and `y` grows
//! upward. The same per-axis scale factors drive both the projection-space
//! split ([`ScreenTile::off_center_projection`]) and the screen-space split
//! ([`ScreenTile::ndc_rect`]), so the two always line up without seams.

use std::f32::consts::PI;
use std::fmt;

use glam::{Mat4, Vec4};

use crate::error::TileError;

// ── TileIndex / GridSize ─────────────────────────────────────────

/// Zero-based position of a tile inside its grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileIndex {
    pub x: u32,
    pub y: u32,
}

impl TileIndex {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Number of tiles along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GridSize {
    pub x: u32,
    pub y: u32,
}

impl GridSize {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Total number of tiles.
    pub fn len(&self) -> usize {
        self.x as usize * self.y as usize
    }

    /// `true` when either axis is zero.
    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        index.x < self.x && index.y < self.y
    }

    /// Flat slot of `index`, or `None` if it lies outside the grid.
    pub fn flat_index(&self, index: TileIndex) -> Option<usize> {
        self.contains(index)
            .then(|| index.x as usize * self.y as usize + index.y as usize)
    }

    /// All tile indices, x-major: `(0,0), (0,1), …, (1,0), …`.
    pub fn indices(&self) -> impl Iterator<Item = TileIndex> + use<> {
        let (nx, ny) = (self.x, self.y);
        (0..nx).flat_map(move |x| (0..ny).map(move |y| TileIndex::new(x, y)))
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

// ── CameraIntrinsics ─────────────────────────────────────────────

/// Global camera parameters shared by every tile of a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Width / height.
    pub aspect: f32,
    /// Full screen size in pixels.
    pub screen_width: u32,
    pub screen_height: u32,
}

impl CameraIntrinsics {
    /// Intrinsics for a screen, with the aspect derived from its size.
    pub fn for_screen(fov: f32, near: f32, far: f32, screen_width: u32, screen_height: u32) -> Self {
        let aspect = if screen_height == 0 {
            1.0
        } else {
            screen_width as f32 / screen_height as f32
        };
        Self {
            fov,
            near,
            far,
            aspect,
            screen_width,
            screen_height,
        }
    }

    /// The symmetric full-screen frustum at the near plane.
    pub fn full_frustum(&self) -> Frustum {
        let top = self.near * (self.fov * PI / 360.0).tan();
        let bottom = -top;
        Frustum {
            left: bottom * self.aspect,
            right: top * self.aspect,
            bottom,
            top,
            near: self.near,
            far: self.far,
        }
    }

    /// Projection matrix of the whole screen.
    pub fn projection(&self) -> Result<Mat4, TileError> {
        self.full_frustum().perspective()
    }
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self::for_screen(60.0, 0.3, 1000.0, 1280, 720)
    }
}

// ── Frustum ──────────────────────────────────────────────────────

/// Near-plane extents of a (possibly off-center) perspective frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

impl Frustum {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    /// Off-center perspective matrix for these extents.
    ///
    /// Row-major layout:
    /// ```text
    /// | x  0  a  0 |
    /// | 0  y  b  0 |
    /// | 0  0  c  d |
    /// | 0  0 -1  0 |
    /// ```
    pub fn perspective(&self) -> Result<Mat4, TileError> {
        let Frustum {
            left,
            right,
            bottom,
            top,
            near,
            far,
        } = *self;

        if right == left {
            return Err(TileError::Domain("frustum has zero width"));
        }
        if top == bottom {
            return Err(TileError::Domain("frustum has zero height"));
        }
        if far == near {
            return Err(TileError::Domain("frustum has zero depth"));
        }

        let x = 2.0 * near / (right - left);
        let y = 2.0 * near / (top - bottom);
        let a = (right + left) / (right - left);
        let b = (top + bottom) / (top - bottom);
        let c = -(far + near) / (far - near);
        let d = -(2.0 * far * near) / (far - near);

        // glam is column-major.
        Ok(Mat4::from_cols(
            Vec4::new(x, 0.0, 0.0, 0.0),
            Vec4::new(0.0, y, 0.0, 0.0),
            Vec4::new(a, b, c, -1.0),
            Vec4::new(0.0, 0.0, d, 0.0),
        ))
    }
}

// ── NdcRect ──────────────────────────────────────────────────────

/// Axis-aligned rectangle in normalized device coordinates (`[-1, 1]²`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdcRect {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl NdcRect {
    /// The whole viewport.
    pub const FULL: NdcRect = NdcRect {
        left: -1.0,
        right: 1.0,
        bottom: -1.0,
        top: 1.0,
    };

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Area shared with `other` (zero when they only touch).
    pub fn overlap_area(&self, other: &NdcRect) -> f32 {
        let w = self.right.min(other.right) - self.left.max(other.left);
        let h = self.top.min(other.top) - self.bottom.max(other.bottom);
        if w > 0.0 && h > 0.0 { w * h } else { 0.0 }
    }
}

// ── Scale factors ────────────────────────────────────────────────

/// Per-axis scale factors `(s_low, s_high)` of tile `index` out of `count`.
///
/// ```text
/// s_low  = 1 - 2*index/count
/// s_high = -(s_low - 2/count)
/// ```
///
/// Multiplying the full extents `(low, high)` by these yields the tile's
/// extents on that axis.
pub fn tile_scale(index: u32, count: u32) -> Result<(f32, f32), TileError> {
    if count == 0 {
        return Err(TileError::Domain("tile count is zero"));
    }
    let n = count as f32;
    let s_low = 1.0 - 2.0 * index as f32 / n;
    let s_high = -(s_low - 2.0 / n);
    Ok((s_low, s_high))
}

// ── ScreenTile ───────────────────────────────────────────────────

/// One rectangular piece of the composer's screen, assigned to one peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenTile {
    pub num_tiles: GridSize,
    pub tile_index: TileIndex,
    pub camera: CameraIntrinsics,
}

impl ScreenTile {
    /// Build a tile, checking `tile_index` lies inside `num_tiles`.
    pub fn new(
        num_tiles: GridSize,
        tile_index: TileIndex,
        camera: CameraIntrinsics,
    ) -> Result<Self, TileError> {
        if num_tiles.x == 0 {
            return Err(TileError::Domain("numTiles.x is zero"));
        }
        if num_tiles.y == 0 {
            return Err(TileError::Domain("numTiles.y is zero"));
        }
        if !num_tiles.contains(tile_index) {
            return Err(TileError::Topology(format!(
                "tile index {tile_index} outside grid {num_tiles}"
            )));
        }
        Ok(Self {
            num_tiles,
            tile_index,
            camera,
        })
    }

    /// Tile size as a fraction of the screen.
    pub fn size(&self) -> Result<(f32, f32), TileError> {
        self.check_grid()?;
        Ok((1.0 / self.num_tiles.x as f32, 1.0 / self.num_tiles.y as f32))
    }

    /// Tile size in pixels (`screen / num_tiles`, truncated).
    pub fn pixel_size(&self) -> Result<(u32, u32), TileError> {
        self.check_grid()?;
        Ok((
            self.camera.screen_width / self.num_tiles.x,
            self.camera.screen_height / self.num_tiles.y,
        ))
    }

    /// Near-plane extents of this tile's sub-frustum.
    pub fn frustum(&self) -> Result<Frustum, TileError> {
        self.check_grid()?;
        let (sl, sr) = tile_scale(self.tile_index.x, self.num_tiles.x)?;
        let (sb, st) = tile_scale(self.tile_index.y, self.num_tiles.y)?;
        let full = self.camera.full_frustum();
        Ok(Frustum {
            left: full.left * sl,
            right: full.right * sr,
            bottom: full.bottom * sb,
            top: full.top * st,
            near: full.near,
            far: full.far,
        })
    }

    /// Off-center projection matrix of this tile.
    pub fn off_center_projection(&self) -> Result<Mat4, TileError> {
        self.frustum()?.perspective()
    }

    /// Where this tile lands on screen, in NDC.
    pub fn ndc_rect(&self) -> Result<NdcRect, TileError> {
        ndc_rect(self.num_tiles, self.tile_index)
    }

    fn check_grid(&self) -> Result<(), TileError> {
        if self.num_tiles.x == 0 {
            return Err(TileError::Domain("numTiles.x is zero"));
        }
        if self.num_tiles.y == 0 {
            return Err(TileError::Domain("numTiles.y is zero"));
        }
        Ok(())
    }
}

/// NDC rectangle of `index` in a `grid`, from the same scale factors as
/// the projection split.
pub fn ndc_rect(grid: GridSize, index: TileIndex) -> Result<NdcRect, TileError> {
    let (sl, sr) = tile_scale(index.x, grid.x)?;
    let (sb, st) = tile_scale(index.y, grid.y)?;
    Ok(NdcRect {
        left: -sl,
        right: sr,
        bottom: -sb,
        top: st,
    })
}

// ── Tests ────────────────────────────────────────────────────────

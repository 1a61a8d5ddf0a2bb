//! Fixed-layout message payloads.

use bytes::{BufMut, Bytes, BytesMut};
use glam::{Mat4, Vec3};

use super::wire::{self, WireReader};
use crate::error::{DecodeError, TileError};
use crate::tile::{CameraIntrinsics, GridSize, ScreenTile, TileIndex};

// ── SceneState ───────────────────────────────────────────────────

/// Camera and volume transforms broadcast to every render node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneState {
    pub delta_time: i64,
    pub camera_position: Vec3,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub volume_world_matrix: Mat4,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            delta_time: 0,
            camera_position: Vec3::ZERO,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            volume_world_matrix: Mat4::IDENTITY,
        }
    }
}

impl SceneState {
    /// Encoded size: i64 + float3 + 3 × float4x4.
    pub const SIZE: usize = 8 + 12 + 3 * 64;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(Self::SIZE);
        dst.put_i64_le(self.delta_time);
        wire::put_vec3(dst, self.camera_position);
        wire::put_mat4(dst, &self.view_matrix);
        wire::put_mat4(dst, &self.projection_matrix);
        wire::put_mat4(dst, &self.volume_world_matrix);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, DecodeError> {
        Ok(Self {
            delta_time: r.i64("deltaTime")?,
            camera_position: r.vec3("cameraPosition")?,
            view_matrix: r.mat4("viewMatrix")?,
            projection_matrix: r.mat4("projectionMatrix")?,
            volume_world_matrix: r.mat4("volumeWorldMatrix")?,
        })
    }
}

// ── RenderParameters ─────────────────────────────────────────────

/// Shading mode and opacity scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParameters {
    /// 0 = direct volume rendering, 1 = iso-surface.
    pub pass: i32,
    pub opacity: f32,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            pass: 0,
            opacity: 1.0,
        }
    }
}

impl RenderParameters {
    pub const SIZE: usize = 8;
    pub const MAX_OPACITY: f32 = 2.0;

    pub fn new(pass: i32, opacity: f32) -> Result<Self, TileError> {
        let params = Self { pass, opacity };
        params.validate()?;
        Ok(params)
    }

    pub fn is_valid(&self) -> bool {
        (0..=1).contains(&self.pass) && (0.0..=Self::MAX_OPACITY).contains(&self.opacity)
    }

    pub fn validate(&self) -> Result<(), TileError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TileError::InvalidRenderParameters {
                pass: self.pass,
                opacity: self.opacity,
            })
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_i32_le(self.pass);
        dst.put_f32_le(self.opacity);
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, DecodeError> {
        let params = Self {
            pass: r.i32("pass")?,
            opacity: r.f32("opacity")?,
        };
        if !params.is_valid() {
            return Err(DecodeError::InvalidField("render parameters"));
        }
        Ok(params)
    }
}

// ── TileAssignment ───────────────────────────────────────────────

/// Wire form of a [`ScreenTile`].
///
/// Layout: `fov, near, far, aspect: f32`, `screenWidth, screenHeight: i32`,
/// `numTiles: float2`, `tileIndex: float2`.
pub struct TileAssignment;

impl TileAssignment {
    pub const SIZE: usize = 4 * 4 + 2 * 4 + 2 * 8;

    /// Fails without writing when a size or count has no exact wire form.
    pub fn encode(tile: &ScreenTile, dst: &mut BytesMut) -> Result<(), TileError> {
        let screen_width = wire_i32(tile.camera.screen_width, "screenWidth")?;
        let screen_height = wire_i32(tile.camera.screen_height, "screenHeight")?;
        let num_tiles = [
            wire_float(tile.num_tiles.x, "numTiles.x")?,
            wire_float(tile.num_tiles.y, "numTiles.y")?,
        ];
        let tile_index = [
            wire_float(tile.tile_index.x, "tileIndex.x")?,
            wire_float(tile.tile_index.y, "tileIndex.y")?,
        ];

        dst.reserve(Self::SIZE);
        dst.put_f32_le(tile.camera.fov);
        dst.put_f32_le(tile.camera.near);
        dst.put_f32_le(tile.camera.far);
        dst.put_f32_le(tile.camera.aspect);
        dst.put_i32_le(screen_width);
        dst.put_i32_le(screen_height);
        for v in num_tiles.into_iter().chain(tile_index) {
            dst.put_f32_le(v);
        }
        Ok(())
    }

    pub fn decode(r: &mut WireReader) -> Result<ScreenTile, DecodeError> {
        let fov = r.f32("fov")?;
        let near = r.f32("nearPlane")?;
        let far = r.f32("farPlane")?;
        let aspect = r.f32("aspect")?;
        let screen_width = non_negative(r.i32("screenWidth")?, "screenWidth")?;
        let screen_height = non_negative(r.i32("screenHeight")?, "screenHeight")?;
        let num_tiles = GridSize::new(
            integral(r.f32("numTiles.x")?, "numTiles.x")?,
            integral(r.f32("numTiles.y")?, "numTiles.y")?,
        );
        let tile_index = TileIndex::new(
            integral(r.f32("tileIndex.x")?, "tileIndex.x")?,
            integral(r.f32("tileIndex.y")?, "tileIndex.y")?,
        );

        if num_tiles.is_empty() {
            return Err(DecodeError::InvalidField("numTiles"));
        }
        if !num_tiles.contains(tile_index) {
            return Err(DecodeError::InvalidField("tileIndex"));
        }

        Ok(ScreenTile {
            num_tiles,
            tile_index,
            camera: CameraIntrinsics {
                fov,
                near,
                far,
                aspect,
                screen_width,
                screen_height,
            },
        })
    }
}

/// Largest integer an `f32` holds exactly.
const MAX_EXACT_FLOAT: u32 = 1 << 24;

fn wire_i32(value: u32, what: &'static str) -> Result<i32, TileError> {
    i32::try_from(value).map_err(|_| TileError::FieldRange(what))
}

fn wire_float(value: u32, what: &'static str) -> Result<f32, TileError> {
    if value > MAX_EXACT_FLOAT {
        return Err(TileError::FieldRange(what));
    }
    Ok(value as f32)
}

fn non_negative(value: i32, what: &'static str) -> Result<u32, DecodeError> {
    u32::try_from(value).map_err(|_| DecodeError::InvalidField(what))
}

/// Tile coordinates travel as floats; only whole, non-negative values are valid.
fn integral(value: f32, what: &'static str) -> Result<u32, DecodeError> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f32 {
        return Err(DecodeError::InvalidField(what));
    }
    Ok(value as u32)
}

// ── TileImageFragment ────────────────────────────────────────────

/// One encoded tile image on its way back to the composer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImageFragment {
    pub tile_index: TileIndex,
    pub image: Bytes,
}

impl TileImageFragment {
    pub fn new(tile_index: TileIndex, image: impl Into<Bytes>) -> Self {
        Self {
            tile_index,
            image: image.into(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        4 + 4 + 4 + self.image.len()
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), TileError> {
        let x = wire_i32(self.tile_index.x, "tileIndex.x")?;
        let y = wire_i32(self.tile_index.y, "tileIndex.y")?;
        if u32::try_from(self.image.len()).is_err() {
            return Err(TileError::FieldRange("imageBytes"));
        }
        dst.reserve(self.encoded_len());
        dst.put_i32_le(x);
        dst.put_i32_le(y);
        wire::put_sized_bytes(dst, &self.image)
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, DecodeError> {
        let x = non_negative(r.i32("tileIndex.x")?, "tileIndex.x")?;
        let y = non_negative(r.i32("tileIndex.y")?, "tileIndex.y")?;
        let image = r.sized_bytes("imageBytes")?;
        Ok(Self {
            tile_index: TileIndex::new(x, y),
            image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_tile(buf: BytesMut) -> Result<ScreenTile, DecodeError> {
        let mut r = WireReader::new(buf.freeze());
        TileAssignment::decode(&mut r)
    }

    fn raw_assignment(num_tiles: (f32, f32), tile_index: (f32, f32)) -> BytesMut {
        let mut buf = BytesMut::new();
        for v in [60.0f32, 0.3, 1000.0, 1.5] {
            buf.put_f32_le(v);
        }
        buf.put_i32_le(1200);
        buf.put_i32_le(800);
        buf.put_f32_le(num_tiles.0);
        buf.put_f32_le(num_tiles.1);
        buf.put_f32_le(tile_index.0);
        buf.put_f32_le(tile_index.1);
        buf
    }

    #[test]
    fn render_parameter_bounds() {
        assert!(RenderParameters::new(0, 0.0).is_ok());
        assert!(RenderParameters::new(1, 2.0).is_ok());
        assert!(RenderParameters::new(2, 1.0).is_err());
        assert!(RenderParameters::new(-1, 1.0).is_err());
        assert!(RenderParameters::new(0, 2.5).is_err());
        assert!(RenderParameters::new(0, -0.1).is_err());
        assert!(RenderParameters::new(0, f32::NAN).is_err());
    }

    #[test]
    fn assignment_layout() {
        let tile = ScreenTile::new(
            GridSize::new(3, 2),
            TileIndex::new(2, 1),
            CameraIntrinsics::for_screen(45.0, 0.1, 100.0, 1200, 800),
        )
        .unwrap();
        let mut buf = BytesMut::new();
        TileAssignment::encode(&tile, &mut buf).unwrap();
        assert_eq!(buf.len(), TileAssignment::SIZE);
        // numTiles.x is a float on the wire.
        assert_eq!(&buf[24..28], &3.0f32.to_le_bytes());
        assert_eq!(decode_tile(buf).unwrap(), tile);
    }

    #[test]
    fn assignment_rejects_fractional_tiles() {
        let err = decode_tile(raw_assignment((2.5, 1.0), (0.0, 0.0))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidField("numTiles.x"));

        let err = decode_tile(raw_assignment((2.0, 2.0), (0.0, 0.25))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidField("tileIndex.y"));

        let err = decode_tile(raw_assignment((2.0, 2.0), (-1.0, 0.0))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidField("tileIndex.x"));
    }

    #[test]
    fn assignment_rejects_index_outside_grid() {
        let err = decode_tile(raw_assignment((2.0, 1.0), (0.0, 1.0))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidField("tileIndex"));

        let err = decode_tile(raw_assignment((0.0, 1.0), (0.0, 0.0))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidField("numTiles"));
    }

    #[test]
    fn fragment_rejects_negative_index() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-1);
        buf.put_i32_le(0);
        buf.put_u32_le(0);
        let mut r = WireReader::new(buf.freeze());
        assert_eq!(
            TileImageFragment::decode(&mut r).unwrap_err(),
            DecodeError::InvalidField("tileIndex.x")
        );
    }

    #[test]
    fn assignment_refuses_sizes_without_wire_form() {
        let mut tile = ScreenTile::new(
            GridSize::new(1, 1),
            TileIndex::new(0, 0),
            CameraIntrinsics::for_screen(45.0, 0.1, 100.0, 1200, 800),
        )
        .unwrap();
        tile.camera.screen_width = i32::MAX as u32 + 1;
        let mut buf = BytesMut::new();
        assert!(matches!(
            TileAssignment::encode(&tile, &mut buf),
            Err(TileError::FieldRange("screenWidth"))
        ));
        assert!(buf.is_empty());

        tile.camera.screen_width = 1200;
        tile.num_tiles = GridSize::new((1 << 24) + 1, 1);
        assert!(matches!(
            TileAssignment::encode(&tile, &mut buf),
            Err(TileError::FieldRange("numTiles.x"))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn fragment_refuses_index_without_wire_form() {
        let fragment = TileImageFragment::new(TileIndex::new(u32::MAX, 0), Bytes::new());
        let mut buf = BytesMut::new();
        assert!(matches!(
            fragment.encode(&mut buf),
            Err(TileError::FieldRange("tileIndex.x"))
        ));
        assert!(buf.is_empty());
    }
}

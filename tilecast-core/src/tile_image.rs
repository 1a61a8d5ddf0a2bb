//! Tile images and the fragment encodings that carry them.
//!
//! An encoded fragment is `format: u8, width: u32, height: u32` followed
//! by the payload. Decoding always writes into an existing [`TileImage`]
//! of the same dimensions; buffers never grow on the receive path.
//!
//! | format | payload |
//! |---|---|
//! | 0 | raw RGBA8, top-down rows |
//! | 1 | zstd-compressed raw RGBA8 |
//! | 2 | JPEG (alpha dropped, restored opaque) |

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use tracing::trace;

use crate::error::{DecodeError, TileError};
use crate::tile::TileIndex;

/// Size of the fragment header.
pub const HEADER_SIZE: usize = 9;

const FORMAT_RAW: u8 = 0;
const FORMAT_ZSTD: u8 = 1;
const FORMAT_JPEG: u8 = 2;

// ── TileImage ────────────────────────────────────────────────────

/// RGBA8 pixels of one tile, rows top-down.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    pub tile_index: TileIndex,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TileImage {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Transparent black image.
    pub fn new(tile_index: TileIndex, width: u32, height: u32) -> Self {
        Self {
            tile_index,
            width,
            height,
            pixels: vec![0; Self::byte_len(width, height)],
        }
    }

    pub fn from_pixels(
        tile_index: TileIndex,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<Self, TileError> {
        if pixels.len() != Self::byte_len(width, height) {
            return Err(TileError::Encoding(format!(
                "{} bytes for a {width}x{height} RGBA image",
                pixels.len()
            )));
        }
        Ok(Self {
            tile_index,
            width,
            height,
            pixels,
        })
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::BYTES_PER_PIXEL
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(Self::BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Pixel at column `x`, row `y` counted from the top.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        let p = &self.pixels[i..i + Self::BYTES_PER_PIXEL];
        Some([p[0], p[1], p[2], p[3]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        self.pixels[i..i + Self::BYTES_PER_PIXEL].copy_from_slice(&rgba);
    }
}

// ── ImageEncoding ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Raw,
    /// zstd level, 1 (fast) to 19.
    Zstd { level: i32 },
    /// JPEG quality, 1 to 100.
    Jpeg { quality: u8 },
}

impl Default for ImageEncoding {
    fn default() -> Self {
        ImageEncoding::Zstd { level: 1 }
    }
}

impl ImageEncoding {
    fn format_byte(&self) -> u8 {
        match self {
            ImageEncoding::Raw => FORMAT_RAW,
            ImageEncoding::Zstd { .. } => FORMAT_ZSTD,
            ImageEncoding::Jpeg { .. } => FORMAT_JPEG,
        }
    }

    pub fn is_lossless(&self) -> bool {
        !matches!(self, ImageEncoding::Jpeg { .. })
    }
}

// ── Encoding ─────────────────────────────────────────────────────

/// Encode `image` as one fragment payload.
pub fn encode(image: &TileImage, encoding: ImageEncoding) -> Result<Vec<u8>, TileError> {
    if image.pixels.len() != TileImage::byte_len(image.width, image.height) {
        return Err(TileError::Encoding("pixel buffer does not match dimensions".into()));
    }

    let mut out = Vec::with_capacity(HEADER_SIZE + image.pixels.len() / 4);
    out.push(encoding.format_byte());
    out.extend_from_slice(&image.width.to_le_bytes());
    out.extend_from_slice(&image.height.to_le_bytes());

    match encoding {
        ImageEncoding::Raw => out.extend_from_slice(&image.pixels),
        ImageEncoding::Zstd { level } => {
            let compressed = zstd::bulk::compress(&image.pixels, level)
                .map_err(|e| TileError::Encoding(format!("zstd encode failed: {e}")))?;
            out.extend_from_slice(&compressed);
        }
        ImageEncoding::Jpeg { quality } => {
            if image.is_empty() {
                return Err(TileError::Encoding("cannot encode an empty JPEG".into()));
            }
            let rgb: Vec<u8> = image
                .pixels
                .chunks_exact(TileImage::BYTES_PER_PIXEL)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
                &rgb,
                image.width,
                image.height,
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    trace!(
        tile = %image.tile_index,
        raw = image.pixels.len(),
        encoded = out.len(),
        "tile encoded"
    );
    Ok(out)
}

/// Read the `(format, width, height)` header of an encoded fragment.
pub fn peek_header(bytes: &[u8]) -> Result<(u8, u32, u32), DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            what: "image header",
            needed: HEADER_SIZE,
            remaining: bytes.len(),
        });
    }
    let width = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let height = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
    Ok((bytes[0], width, height))
}

/// Decode a fragment into `target`, overwriting its pixels in place.
///
/// `target` is only written once the whole payload decoded; on error it
/// keeps its previous pixels.
pub fn decode_into(target: &mut TileImage, bytes: &[u8]) -> Result<(), TileError> {
    let (format, width, height) = peek_header(bytes)?;
    if (width, height) != (target.width, target.height) {
        return Err(DecodeError::DimensionMismatch {
            expected: (target.width, target.height),
            actual: (width, height),
        }
        .into());
    }
    let payload = &bytes[HEADER_SIZE..];
    let expected = target.pixels.len();

    match format {
        FORMAT_RAW => {
            if payload.len() < expected {
                return Err(DecodeError::Truncated {
                    what: "raw pixels",
                    needed: expected,
                    remaining: payload.len(),
                }
                .into());
            }
            if payload.len() > expected {
                return Err(DecodeError::TrailingBytes(payload.len() - expected).into());
            }
            target.pixels.copy_from_slice(payload);
        }
        FORMAT_ZSTD => {
            let decoded = zstd::bulk::decompress(payload, expected)
                .map_err(|e| TileError::Encoding(format!("zstd decode failed: {e}")))?;
            if decoded.len() != expected {
                return Err(DecodeError::InvalidField("zstd pixel count").into());
            }
            target.pixels.copy_from_slice(&decoded);
        }
        FORMAT_JPEG => {
            let decoded = image::load_from_memory_with_format(payload, ImageFormat::Jpeg)?.to_rgba8();
            if decoded.dimensions() != (width, height) {
                return Err(DecodeError::DimensionMismatch {
                    expected: (width, height),
                    actual: decoded.dimensions(),
                }
                .into());
            }
            target.pixels.copy_from_slice(decoded.as_raw());
        }
        _ => return Err(DecodeError::InvalidField("image format").into()),
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

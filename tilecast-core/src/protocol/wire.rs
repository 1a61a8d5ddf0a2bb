//! Fixed-width little-endian field primitives.
//!
//! Every payload is a flat sequence of these fields in declaration order;
//! nothing on the wire describes its own layout. Matrices are written
//! row-major (`m00, m01, m02, m03, m10, …`).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::{Mat4, Vec3};

use crate::error::{DecodeError, TileError};

// ── Writing ──────────────────────────────────────────────────────

pub fn put_vec3(dst: &mut BytesMut, v: Vec3) {
    dst.put_f32_le(v.x);
    dst.put_f32_le(v.y);
    dst.put_f32_le(v.z);
}

pub fn put_mat4(dst: &mut BytesMut, m: &Mat4) {
    for value in m.transpose().to_cols_array() {
        dst.put_f32_le(value);
    }
}

/// `u32` length prefix followed by the bytes.
pub fn put_sized_bytes(dst: &mut BytesMut, data: &[u8]) -> Result<(), TileError> {
    let len = u32::try_from(data.len()).map_err(|_| TileError::FieldRange("byte array length"))?;
    dst.put_u32_le(len);
    dst.put_slice(data);
    Ok(())
}

// ── Reading ──────────────────────────────────────────────────────

/// Bounds-checked cursor over one payload.
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, what: &'static str, needed: usize) -> Result<(), DecodeError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(DecodeError::Truncated {
                what,
                needed,
                remaining,
            });
        }
        Ok(())
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16, DecodeError> {
        self.need(what, 2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn i32(&mut self, what: &'static str) -> Result<i32, DecodeError> {
        self.need(what, 4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        self.need(what, 4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i64(&mut self, what: &'static str) -> Result<i64, DecodeError> {
        self.need(what, 8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn f32(&mut self, what: &'static str) -> Result<f32, DecodeError> {
        self.need(what, 4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn vec3(&mut self, what: &'static str) -> Result<Vec3, DecodeError> {
        self.need(what, 12)?;
        Ok(Vec3::new(
            self.buf.get_f32_le(),
            self.buf.get_f32_le(),
            self.buf.get_f32_le(),
        ))
    }

    pub fn mat4(&mut self, what: &'static str) -> Result<Mat4, DecodeError> {
        self.need(what, 64)?;
        let mut rows = [0.0f32; 16];
        for value in rows.iter_mut() {
            *value = self.buf.get_f32_le();
        }
        Ok(Mat4::from_cols_array(&rows).transpose())
    }

    /// A `u32`-length-prefixed buffer, sliced without copying.
    pub fn sized_bytes(&mut self, what: &'static str) -> Result<Bytes, DecodeError> {
        let len = self.u32(what)? as usize;
        self.need(what, len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    /// Fail if any bytes are left over.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

//! Writing side of the `.ap` byte layout.

use crate::{PgoError, PgoResult};

/// Little-endian byte sink with back-patching for sizes written after the
/// fact.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Current position as a format offset.
    pub fn offset(&self) -> PgoResult<u32> {
        to_u32(self.buf.len(), "profile size")
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) -> PgoResult<()> {
        let len = u16::try_from(s.len()).map_err(|_| {
            PgoError::InvalidArgument(format!("string of {} bytes does not fit the format", s.len()))
        })?;
        self.write_u16(len);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    /// Writes a zero `u32` and returns where to patch it.
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.buf.len();
        self.write_u32(0);
        at
    }

    pub fn patch_u16(&mut self, at: usize, v: u16) {
        self.buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Patches the `u32` at `at` with the number of bytes written after it.
    pub fn patch_len_since(&mut self, at: usize) -> PgoResult<()> {
        let len = to_u32(self.buf.len() - at - 4, "entry size")?;
        self.patch_u32(at, len);
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) fn to_u32(v: usize, what: &str) -> PgoResult<u32> {
    u32::try_from(v).map_err(|_| PgoError::InvalidArgument(format!("{what} {v} exceeds u32")))
}

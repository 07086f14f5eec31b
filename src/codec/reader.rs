//! Reading side of the `.ap` byte layout.

use crate::{PgoError, PgoResult};

/// Bounds-checked little-endian cursor over a byte slice.
///
/// Offsets in errors are absolute positions in the original buffer, also for
/// sub-readers handed out by [`ByteReader::section`].
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    base: usize,
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            base: 0,
            pos: 0,
        }
    }

    /// Absolute offset of the cursor.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// A reader over `size` bytes at absolute `offset` of this reader's
    /// buffer.
    pub fn section(&self, offset: u32, size: u32) -> PgoResult<ByteReader<'a>> {
        let start = (offset as usize)
            .checked_sub(self.base)
            .ok_or_else(|| PgoError::parse(offset as usize, "section starts before buffer"))?;
        let end = start
            .checked_add(size as usize)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                PgoError::parse(
                    offset as usize,
                    format!("section of {size} bytes exceeds buffer of {}", self.buf.len()),
                )
            })?;
        Ok(ByteReader {
            buf: &self.buf[start..end],
            base: self.base + start,
            pos: 0,
        })
    }

    /// Splits off the next `len` bytes as their own reader.
    pub fn sub(&mut self, len: usize) -> PgoResult<ByteReader<'a>> {
        let base = self.offset();
        let bytes = self.take(len)?;
        Ok(ByteReader {
            buf: bytes,
            base,
            pos: 0,
        })
    }

    pub fn take(&mut self, len: usize) -> PgoResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                PgoError::parse(
                    self.offset(),
                    format!("read of {len} bytes with {} remaining", self.remaining()),
                )
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> PgoResult<()> {
        self.take(len).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> PgoResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> PgoResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> PgoResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> PgoResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> PgoResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// A `u16`-length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> PgoResult<String> {
        let at = self.offset();
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PgoError::parse(at, "string is not utf-8"))
    }

    pub fn skip_str(&mut self) -> PgoResult<()> {
        let len = self.read_u16()? as usize;
        self.skip(len)
    }

    pub fn expect_end(&self, what: &str) -> PgoResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PgoError::parse(
                self.offset(),
                format!("{} trailing bytes after {what}", self.remaining()),
            ))
        }
    }
}

//! `.ap` profile codecs: the binary format and its text rendering.

mod decoder;
mod encoder;
mod header;
mod reader;
mod text;
mod writer;

pub use decoder::*;
pub use encoder::*;
pub use header::*;
pub use reader::*;
pub use text::*;
pub use writer::ByteWriter;

/// Tag of one per-offset sample inside a method entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ItemTag {
    Op = 0,
    Call = 1,
    Define = 2,
    ReadWrite = 3,
}

impl ItemTag {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Op),
            1 => Some(Self::Call),
            2 => Some(Self::Define),
            3 => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

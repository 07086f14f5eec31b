//! `.ap` file header: magic, version, capability flags and section table.
//!
//! ```text
//! magic        [u8; 8]
//! version      major u8, minor u8, patch u8, reserved u8
//! features     u32
//! file_size    u32
//! header_size  u32
//! sections     u32
//! section[i]   kind u32, offset u32, size u32, count u32
//! ```

use serde::Serialize;

use std::collections::BTreeMap;
use std::fmt;

use super::{ByteReader, ByteWriter};
use crate::{PgoError, PgoResult};

pub const AP_MAGIC: [u8; 8] = *b"PGOPROF\0";
const FIXED_HEADER_SIZE: u32 = 8 + 4 + 4 + 4 + 4 + 4;
const SECTION_ENTRY_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ApVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ApVersion {
    pub const CURRENT: Self = Self {
        major: 1,
        minor: 2,
        patch: 0,
    };

    pub fn is_compatible(self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl fmt::Display for ApVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Capability flags. A cleared flag means the matching data is absent from
/// the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ApFeatures(u32);

impl ApFeatures {
    pub const TYPE: Self = Self(1 << 0);
    pub const METHOD_CHECKSUM: Self = Self(1 << 1);
    pub const RECORD_POOL: Self = Self(1 << 2);
    pub const PROFILE_TYPE_WITH_ABC_ID: Self = Self(1 << 3);
    pub const TRACK_FIELD: Self = Self(1 << 4);
    pub const PROTO_TRANSITION: Self = Self(1 << 5);
    pub const ELEMENTS_TRACK: Self = Self(1 << 6);

    pub const ALL: Self = Self(0x7F);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Bits this build does not understand.
    pub const fn unknown(self) -> u32 {
        self.0 & !Self::ALL.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum SectionKind {
    PandaFileInfo = 0,
    RecordMethods = 1,
    LayoutTree = 2,
    RecordPool = 3,
    ProtoTransitionPool = 4,
    ProfileTypePool = 5,
}

impl SectionKind {
    /// Write order. The profile type pool is last.
    pub const ORDER: [Self; 6] = [
        Self::PandaFileInfo,
        Self::RecordMethods,
        Self::LayoutTree,
        Self::RecordPool,
        Self::ProtoTransitionPool,
        Self::ProfileTypePool,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SectionInfo {
    pub offset: u32,
    pub size: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApHeader {
    pub version: ApVersion,
    pub features: ApFeatures,
    pub file_size: u32,
    /// Keyed by raw kind so sections from newer writers survive a decode.
    pub sections: BTreeMap<u32, SectionInfo>,
}

impl ApHeader {
    pub fn new(features: ApFeatures) -> Self {
        Self {
            version: ApVersion::CURRENT,
            features,
            file_size: 0,
            sections: BTreeMap::new(),
        }
    }

    pub fn size_for(section_count: usize) -> u32 {
        FIXED_HEADER_SIZE + SECTION_ENTRY_SIZE * section_count as u32
    }

    pub fn section(&self, kind: SectionKind) -> Option<SectionInfo> {
        self.sections.get(&(kind as u32)).copied()
    }

    pub fn set_section(&mut self, kind: SectionKind, info: SectionInfo) {
        self.sections.insert(kind as u32, info);
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_bytes(&AP_MAGIC);
        w.write_u8(self.version.major);
        w.write_u8(self.version.minor);
        w.write_u8(self.version.patch);
        w.write_u8(0);
        w.write_u32(self.features.bits());
        w.write_u32(self.file_size);
        w.write_u32(Self::size_for(self.sections.len()));
        w.write_u32(self.sections.len() as u32);
        for (kind, info) in &self.sections {
            w.write_u32(*kind);
            w.write_u32(info.offset);
            w.write_u32(info.size);
            w.write_u32(info.count);
        }
    }

    /// Parses and validates the header against the whole buffer.
    pub fn decode(buf: &[u8]) -> PgoResult<Self> {
        let mut r = ByteReader::new(buf);
        if r.take(AP_MAGIC.len())? != AP_MAGIC {
            return Err(PgoError::parse(0, "bad magic"));
        }
        let version = ApVersion {
            major: r.read_u8()?,
            minor: r.read_u8()?,
            patch: r.read_u8()?,
        };
        r.skip(1)?;
        if !version.is_compatible() {
            return Err(PgoError::IncompatibleVersion {
                found: version,
                supported: ApVersion::CURRENT,
            });
        }
        let features = ApFeatures::from_bits(r.read_u32()?);
        if features.unknown() != 0 {
            tracing::debug!(bits = features.unknown(), "profile carries unknown capability flags");
        }
        let file_size = r.read_u32()?;
        if file_size as usize != buf.len() {
            return Err(PgoError::parse(
                buf.len(),
                format!("file declares {file_size} bytes but {} are present", buf.len()),
            ));
        }
        let header_size = r.read_u32()?;
        let count = r.read_u32()?;
        let expected = u64::from(FIXED_HEADER_SIZE) + u64::from(SECTION_ENTRY_SIZE) * u64::from(count);
        if u64::from(header_size) != expected || expected > buf.len() as u64 {
            return Err(PgoError::parse(
                r.offset(),
                format!("header size {header_size} does not match {count} sections"),
            ));
        }
        let mut sections = BTreeMap::new();
        for _ in 0..count {
            let kind = r.read_u32()?;
            let info = SectionInfo {
                offset: r.read_u32()?,
                size: r.read_u32()?,
                count: r.read_u32()?,
            };
            let end = u64::from(info.offset) + u64::from(info.size);
            if info.offset < header_size || end > u64::from(file_size) {
                return Err(PgoError::parse(
                    r.offset(),
                    format!("section {kind} [{}..{end}) outside file", info.offset),
                ));
            }
            if sections.insert(kind, info).is_some() {
                return Err(PgoError::parse(r.offset(), format!("duplicate section {kind}")));
            }
        }
        Ok(Self {
            version,
            features,
            file_size,
            sections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Vec<u8> {
        let mut header = ApHeader::new(ApFeatures::ALL);
        let size = ApHeader::size_for(1);
        header.set_section(
            SectionKind::RecordPool,
            SectionInfo {
                offset: size,
                size: 0,
                count: 0,
            },
        );
        header.file_size = size;
        let mut w = ByteWriter::new();
        header.encode(&mut w);
        w.into_inner()
    }

    #[test]
    fn header_decodes_what_it_encodes() {
        let bytes = sample_header();
        let header = ApHeader::decode(&bytes).expect("decode");
        assert_eq!(header.version, ApVersion::CURRENT);
        assert_eq!(header.section(SectionKind::RecordPool).map(|s| s.count), Some(0));
    }

    #[test]
    fn other_major_version_is_incompatible() {
        let mut bytes = sample_header();
        bytes[8] = ApVersion::CURRENT.major + 1;
        let err = ApHeader::decode(&bytes).expect_err("newer major");
        assert!(matches!(err, PgoError::IncompatibleVersion { .. }));
    }

    #[test]
    fn newer_minor_and_unknown_flags_are_accepted() {
        let mut bytes = sample_header();
        bytes[9] = ApVersion::CURRENT.minor + 3;
        bytes[12..16].copy_from_slice(&(ApFeatures::ALL.bits() | 1 << 20).to_le_bytes());
        let header = ApHeader::decode(&bytes).expect("forward compatible");
        assert_eq!(header.features.unknown(), 1 << 20);
    }

    #[test]
    fn bad_magic_and_size_are_rejected() {
        let mut bytes = sample_header();
        bytes[0] = b'X';
        assert!(ApHeader::decode(&bytes).is_err());
        let mut bytes = sample_header();
        bytes.push(0);
        assert!(ApHeader::decode(&bytes).is_err());
    }
}

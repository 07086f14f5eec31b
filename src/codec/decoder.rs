//! Binary `.ap` decoder.
//!
//! Decoding is two-phase: [`ProfileDecoder::new`] validates the header so a
//! caller can inspect the module table and build an [`AbcIdRemap`] before
//! [`ProfileDecoder::decode`] materializes the rest with that remap applied.

use std::collections::BTreeMap;

use super::{ApFeatures, ApHeader, ByteReader, ItemTag, SectionKind};
use crate::{
    AbcIdRemap, DEFAULT_MAX_POLY_COUNT, DefineOpType, ElementsTrack, FieldDesc, FieldRep,
    LayoutNode, MethodRecord, MethodTypeSet, ObjectInfo, OpType, PandaFileInfo, PandaFileInfos,
    PgoError, PgoInfo, PgoResult, ProfileType, ProtoTransitionType, RwSlot, SampleMode, ShapeTree,
};

#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions<'a> {
    /// Methods observed fewer times are skipped.
    pub hotness_threshold: u32,
    pub max_poly_count: usize,
    pub remap: Option<&'a AbcIdRemap>,
}

impl Default for DecodeOptions<'_> {
    fn default() -> Self {
        Self {
            hotness_threshold: 0,
            max_poly_count: DEFAULT_MAX_POLY_COUNT,
            remap: None,
        }
    }
}

/// Decodes a whole profile in one go.
pub fn decode(bytes: &[u8], opts: &DecodeOptions<'_>) -> PgoResult<PgoInfo> {
    ProfileDecoder::new(bytes)?.decode(opts)
}

pub struct ProfileDecoder<'a> {
    bytes: &'a [u8],
    header: ApHeader,
}

impl<'a> ProfileDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> PgoResult<Self> {
        let header = ApHeader::decode(bytes)?;
        Ok(Self { bytes, header })
    }

    pub fn header(&self) -> &ApHeader {
        &self.header
    }

    fn section(&self, kind: SectionKind) -> PgoResult<Option<(ByteReader<'a>, u32)>> {
        match self.header.section(kind) {
            None => Ok(None),
            Some(info) => {
                let r = ByteReader::new(self.bytes).section(info.offset, info.size)?;
                Ok(Some((r, info.count)))
            }
        }
    }

    /// The module table as stored, before any remap.
    pub fn panda_files(&self) -> PgoResult<PandaFileInfos> {
        let mut files = PandaFileInfos::default();
        let Some((mut r, count)) = self.section(SectionKind::PandaFileInfo)? else {
            return Ok(files);
        };
        for _ in 0..count {
            files.insert(PandaFileInfo {
                abc_id: r.read_u32()?,
                checksum: r.read_u32()?,
                desc: r.read_str()?,
            });
        }
        r.expect_end("module table")?;
        Ok(files)
    }

    pub fn decode(&self, opts: &DecodeOptions<'_>) -> PgoResult<PgoInfo> {
        let mut info = PgoInfo::new(opts.max_poly_count);
        let files = self.panda_files()?;
        info.panda_files = match opts.remap {
            None => files,
            Some(remap) => {
                let mut mapped = PandaFileInfos::default();
                for file in files.iter() {
                    mapped.insert(PandaFileInfo {
                        abc_id: remap.map(file.abc_id),
                        ..file.clone()
                    });
                }
                mapped
            }
        };

        let pool = self.read_type_pool(opts.remap)?;
        let ctx = SectionContext {
            pool: &pool,
            features: self.header.features,
            max_poly: opts.max_poly_count,
        };

        if let Some((mut r, count)) = self.section(SectionKind::RecordMethods)? {
            for _ in 0..count {
                let record = ctx.read_type(&mut r)?;
                let len = r.read_u32()? as usize;
                let mut methods = r.sub(len)?;
                let method_count = methods.read_u32()?;
                for _ in 0..method_count {
                    if let Some(method) = ctx.read_method(&mut methods, opts.hotness_threshold)? {
                        info.details.insert_method(record, method);
                    }
                }
                methods.expect_end("record methods")?;
            }
            r.expect_end("record section")?;
        }

        if let Some((mut r, count)) = self.section(SectionKind::LayoutTree)? {
            for _ in 0..count {
                let tree = ctx.read_tree(&mut r)?;
                info.details.layouts_mut().insert_tree(tree);
            }
            r.expect_end("layout section")?;
        }

        if self.header.features.contains(ApFeatures::RECORD_POOL)
            && let Some((mut r, count)) = self.section(SectionKind::RecordPool)?
        {
            for _ in 0..count {
                let record = ctx.read_type(&mut r)?;
                let name = r.read_str()?;
                info.details.record_pool_mut().add(record, name);
            }
            r.expect_end("record pool")?;
        }

        if self.header.features.contains(ApFeatures::PROTO_TRANSITION)
            && let Some((mut r, count)) = self.section(SectionKind::ProtoTransitionPool)?
        {
            for _ in 0..count {
                let entry = ProtoTransitionType {
                    ihc: ctx.read_type(&mut r)?,
                    base_root: ctx.read_type(&mut r)?,
                    base: ctx.read_type(&mut r)?,
                    transition: ctx.read_type(&mut r)?,
                    transition_proto: ctx.read_type(&mut r)?,
                };
                info.details.proto_transitions_mut().add(entry);
            }
            r.expect_end("proto transition pool")?;
        }

        Ok(info)
    }

    /// Loads the type pool with module ids already remapped. Index 0 is
    /// `None`.
    fn read_type_pool(&self, remap: Option<&AbcIdRemap>) -> PgoResult<Vec<ProfileType>> {
        let mut pool = vec![ProfileType::None];
        let Some((mut r, count)) = self.section(SectionKind::ProfileTypePool)? else {
            return Ok(pool);
        };
        let with_abc = self.header.features.contains(ApFeatures::PROFILE_TYPE_WITH_ABC_ID);
        for _ in 0..count {
            let at = r.offset();
            let raw = r.read_u64()?;
            let abc_id = if with_abc { r.read_u32()? } else { 0 };
            let t = ProfileType::from_raw(raw, abc_id)
                .ok_or_else(|| PgoError::parse(at, format!("invalid profile type {raw:#x}")))?;
            pool.push(match remap {
                Some(remap) => remap.map_type(t),
                None => t,
            });
        }
        r.expect_end("profile type pool")?;
        Ok(pool)
    }
}

struct SectionContext<'p> {
    pool: &'p [ProfileType],
    features: ApFeatures,
    max_poly: usize,
}

impl SectionContext<'_> {
    fn read_type(&self, r: &mut ByteReader<'_>) -> PgoResult<ProfileType> {
        let at = r.offset();
        let idx = r.read_u32()? as usize;
        self.pool
            .get(idx)
            .copied()
            .ok_or_else(|| PgoError::parse(at, format!("profile type index {idx} out of range")))
    }

    fn read_method(&self, r: &mut ByteReader<'_>, threshold: u32) -> PgoResult<Option<MethodRecord>> {
        let len = r.read_u32()? as usize;
        let mut entry = r.sub(len)?;
        let method_id = entry.read_u32()?;
        let count = entry.read_u32()?;
        let mode_at = entry.offset();
        let mode = SampleMode::from_u8(entry.read_u8()?)
            .ok_or_else(|| PgoError::parse(mode_at, "invalid sample mode"))?;
        let name = entry.read_str()?;
        let checksum = if self.features.contains(ApFeatures::METHOD_CHECKSUM) {
            let present = entry.read_u8()? != 0;
            let value = entry.read_u32()?;
            present.then_some(value)
        } else {
            None
        };

        if count < threshold {
            if self.features.contains(ApFeatures::TYPE) {
                self.skip_types(&mut entry)?;
            }
            self.finish_entry(&entry, "method entry")?;
            return Ok(None);
        }

        let types = if self.features.contains(ApFeatures::TYPE) {
            self.parse_types(&mut entry)?
        } else {
            MethodTypeSet::default()
        };
        self.finish_entry(&entry, "method entry")?;
        Ok(Some(MethodRecord {
            method_id,
            count,
            mode,
            name,
            checksum,
            types,
        }))
    }

    /// Entries written with capabilities this build lacks may carry data it
    /// cannot parse; everything else must be consumed exactly.
    fn finish_entry(&self, entry: &ByteReader<'_>, what: &str) -> PgoResult<()> {
        if self.features.unknown() != 0 {
            return Ok(());
        }
        entry.expect_end(what)
    }

    fn read_item_header<'b>(r: &mut ByteReader<'b>) -> PgoResult<(u8, u32, ByteReader<'b>)> {
        let tag = r.read_u8()?;
        let offset = r.read_u32()?;
        let len = r.read_u16()? as usize;
        let payload = r.sub(len)?;
        Ok((tag, offset, payload))
    }

    fn skip_types(&self, r: &mut ByteReader<'_>) -> PgoResult<()> {
        let count = r.read_u32()?;
        for _ in 0..count {
            Self::read_item_header(r)?;
        }
        Ok(())
    }

    fn parse_types(&self, r: &mut ByteReader<'_>) -> PgoResult<MethodTypeSet> {
        let mut types = MethodTypeSet::default();
        let count = r.read_u32()?;
        for _ in 0..count {
            let at = r.offset();
            let (tag, offset, mut payload) = Self::read_item_header(r)?;
            match ItemTag::from_u8(tag) {
                Some(ItemTag::Op) => {
                    types.add_op_type(offset, OpType::from_bits(payload.read_u32()?));
                }
                Some(ItemTag::Call) => {
                    types.add_call_target(offset, self.read_type(&mut payload)?);
                }
                Some(ItemTag::Define) => {
                    let define = self.read_define(&mut payload)?;
                    types.add_define(offset, define);
                }
                Some(ItemTag::ReadWrite) => {
                    let slot = self.read_rw_slot(&mut payload)?;
                    types.rw_slots.insert(offset, slot);
                }
                None => {
                    tracing::debug!(tag, at, "skipping unknown sample kind");
                    continue;
                }
            }
            payload.expect_end("sample")?;
        }
        Ok(types)
    }

    fn read_define(&self, r: &mut ByteReader<'_>) -> PgoResult<DefineOpType> {
        let mut define = DefineOpType::new(self.read_type(r)?);
        define.ctor = self.read_type(r)?;
        define.prototype = self.read_type(r)?;
        if self.features.contains(ApFeatures::ELEMENTS_TRACK) && r.read_u8()? != 0 {
            define.elements = Some(ElementsTrack {
                elements_kind: r.read_u32()?,
                length: r.read_u32()?,
                space_flag: r.read_u8()?,
            });
        }
        Ok(define)
    }

    fn read_rw_slot(&self, r: &mut ByteReader<'_>) -> PgoResult<RwSlot> {
        if r.read_u8()? != 0 {
            return Ok(RwSlot::Mega);
        }
        let mut slot = RwSlot::default();
        let count = r.read_u8()?;
        for _ in 0..count {
            let mut info = ObjectInfo {
                receiver_root: self.read_type(r)?,
                receiver: self.read_type(r)?,
                holder_root: self.read_type(r)?,
                holder: self.read_type(r)?,
                holder_tra_root: self.read_type(r)?,
                holder_tra: self.read_type(r)?,
                accessor: self.read_type(r)?,
                proto_chain: Vec::new(),
            };
            let chain_len = r.read_u16()?;
            for _ in 0..chain_len {
                let root = self.read_type(r)?;
                let shape = self.read_type(r)?;
                info.proto_chain.push((root, shape));
            }
            slot.insert(info, self.max_poly);
        }
        Ok(slot)
    }

    fn read_tree(&self, r: &mut ByteReader<'_>) -> PgoResult<ShapeTree> {
        let len = r.read_u32()? as usize;
        let mut entry = r.sub(len)?;
        let root = self.read_type(&mut entry)?;
        let proto = self.read_type(&mut entry)?;
        let track_field = self.features.contains(ApFeatures::TRACK_FIELD);
        let node_count = entry.read_u32()?;
        let mut nodes = BTreeMap::new();
        for _ in 0..node_count {
            let shape = self.read_type(&mut entry)?;
            let field_count = entry.read_u16()?;
            let mut node = LayoutNode::default();
            for _ in 0..field_count {
                let key = entry.read_str()?;
                let rep = if track_field {
                    let at = entry.offset();
                    FieldRep::from_u8(entry.read_u8()?)
                        .ok_or_else(|| PgoError::parse(at, "invalid field representation"))?
                } else {
                    FieldRep::None
                };
                node.fields.push(FieldDesc { key, rep });
            }
            let child_count = entry.read_u32()?;
            for _ in 0..child_count {
                node.children.insert(self.read_type(&mut entry)?);
            }
            nodes.insert(shape, node);
        }
        if !root.is_root() {
            return Err(PgoError::parse(entry.offset(), format!("layout tree keyed by non-root {root}")));
        }
        self.finish_entry(&entry, "layout tree")?;
        Ok(ShapeTree { root, proto, nodes })
    }
}

//! Binary `.ap` encoder.

use rustc_hash::FxHashMap;

use super::writer::to_u32;
use super::{ApFeatures, ApHeader, ByteWriter, ItemTag, SectionInfo, SectionKind};
use crate::{
    MethodRecord, MethodTypeSet, ObjectInfo, PandaFileInfos, PgoError, PgoInfo, PgoResult,
    ProfileType, RecordDetailInfos, RwSlot,
};

/// Encodes with every capability this build supports.
pub fn encode(info: &PgoInfo) -> PgoResult<Vec<u8>> {
    encode_with_features(info, ApFeatures::ALL)
}

/// Encodes only the data covered by `features`.
pub fn encode_with_features(info: &PgoInfo, features: ApFeatures) -> PgoResult<Vec<u8>> {
    let kinds: Vec<SectionKind> = SectionKind::ORDER
        .into_iter()
        .filter(|kind| match kind {
            SectionKind::RecordPool => features.contains(ApFeatures::RECORD_POOL),
            SectionKind::ProtoTransitionPool => features.contains(ApFeatures::PROTO_TRANSITION),
            _ => true,
        })
        .collect();
    let header_size = ApHeader::size_for(kinds.len()) as usize;

    let mut encoder = ProfileEncoder {
        features,
        pool: TypePool::default(),
        w: ByteWriter::new(),
    };
    encoder.w.write_bytes(&vec![0u8; header_size]);

    let mut header = ApHeader::new(features);
    for kind in kinds {
        let offset = encoder.w.offset()?;
        let count = match kind {
            SectionKind::PandaFileInfo => encoder.write_panda_files(&info.panda_files)?,
            SectionKind::RecordMethods => encoder.write_records(&info.details)?,
            SectionKind::LayoutTree => encoder.write_layouts(&info.details)?,
            SectionKind::RecordPool => encoder.write_record_pool(&info.details)?,
            SectionKind::ProtoTransitionPool => encoder.write_proto_transitions(&info.details)?,
            SectionKind::ProfileTypePool => encoder.write_type_pool()?,
        };
        let size = encoder.w.offset()? - offset;
        header.set_section(kind, SectionInfo { offset, size, count });
    }
    header.file_size = encoder.w.offset()?;

    let mut bytes = encoder.w.into_inner();
    let mut head = ByteWriter::new();
    header.encode(&mut head);
    bytes[..header_size].copy_from_slice(&head.into_inner());
    Ok(bytes)
}

/// Interns profile types; index 0 is reserved for `None`.
#[derive(Debug, Default)]
struct TypePool {
    index: FxHashMap<ProfileType, u32>,
    entries: Vec<ProfileType>,
}

impl TypePool {
    fn intern(&mut self, t: ProfileType) -> u32 {
        if t.is_none() {
            return 0;
        }
        *self.index.entry(t).or_insert_with(|| {
            self.entries.push(t);
            self.entries.len() as u32
        })
    }
}

struct ProfileEncoder {
    features: ApFeatures,
    pool: TypePool,
    w: ByteWriter,
}

impl ProfileEncoder {
    fn write_type(&mut self, t: ProfileType) {
        let idx = self.pool.intern(t);
        self.w.write_u32(idx);
    }

    fn write_panda_files(&mut self, files: &PandaFileInfos) -> PgoResult<u32> {
        for file in files.iter() {
            self.w.write_u32(file.abc_id);
            self.w.write_u32(file.checksum);
            self.w.write_str(&file.desc)?;
        }
        to_u32(files.len(), "module count")
    }

    fn write_records(&mut self, details: &RecordDetailInfos) -> PgoResult<u32> {
        for (record, methods) in details.records() {
            self.write_type(*record);
            let size_at = self.w.reserve_u32();
            self.w.write_u32(to_u32(methods.len(), "method count")?);
            for method in methods.values() {
                self.write_method(method)?;
            }
            self.w.patch_len_since(size_at)?;
        }
        to_u32(details.record_count(), "record count")
    }

    fn write_method(&mut self, method: &MethodRecord) -> PgoResult<()> {
        let size_at = self.w.reserve_u32();
        self.w.write_u32(method.method_id);
        self.w.write_u32(method.count);
        self.w.write_u8(method.mode.to_u8());
        self.w.write_str(&method.name)?;
        if self.features.contains(ApFeatures::METHOD_CHECKSUM) {
            match method.checksum {
                Some(checksum) => {
                    self.w.write_u8(1);
                    self.w.write_u32(checksum);
                }
                None => {
                    self.w.write_u8(0);
                    self.w.write_u32(0);
                }
            }
        }
        if self.features.contains(ApFeatures::TYPE) {
            self.write_types(&method.types)?;
        }
        self.w.patch_len_since(size_at)
    }

    fn write_types(&mut self, types: &MethodTypeSet) -> PgoResult<()> {
        self.w.write_u32(to_u32(types.len(), "sample count")?);
        for (&offset, op) in &types.op_types {
            self.item(ItemTag::Op, offset, |enc| {
                enc.w.write_u32(op.bits());
                Ok(())
            })?;
        }
        for (&offset, &target) in &types.call_targets {
            self.item(ItemTag::Call, offset, |enc| {
                enc.write_type(target);
                Ok(())
            })?;
        }
        for (&offset, define) in &types.defines {
            self.item(ItemTag::Define, offset, |enc| {
                enc.write_type(define.profile_type);
                enc.write_type(define.ctor);
                enc.write_type(define.prototype);
                if enc.features.contains(ApFeatures::ELEMENTS_TRACK) {
                    match define.elements {
                        Some(track) => {
                            enc.w.write_u8(1);
                            enc.w.write_u32(track.elements_kind);
                            enc.w.write_u32(track.length);
                            enc.w.write_u8(track.space_flag);
                        }
                        None => enc.w.write_u8(0),
                    }
                }
                Ok(())
            })?;
        }
        for (&offset, slot) in &types.rw_slots {
            self.item(ItemTag::ReadWrite, offset, |enc| enc.write_rw_slot(slot))?;
        }
        Ok(())
    }

    /// Writes one tagged sample: tag, offset, payload length, payload.
    fn item(
        &mut self,
        tag: ItemTag,
        offset: u32,
        payload: impl FnOnce(&mut Self) -> PgoResult<()>,
    ) -> PgoResult<()> {
        self.w.write_u8(tag as u8);
        self.w.write_u32(offset);
        let len_at = self.w.position();
        self.w.write_u16(0);
        payload(self)?;
        let len = self.w.position() - len_at - 2;
        let len = u16::try_from(len).map_err(|_| {
            PgoError::InvalidArgument(format!("sample payload of {len} bytes at offset {offset}"))
        })?;
        self.w.patch_u16(len_at, len);
        Ok(())
    }

    fn write_rw_slot(&mut self, slot: &RwSlot) -> PgoResult<()> {
        match slot {
            RwSlot::Mega => self.w.write_u8(1),
            RwSlot::Poly(infos) => {
                self.w.write_u8(0);
                self.w.write_u8(u8::try_from(infos.len()).map_err(|_| {
                    PgoError::InvalidArgument(format!("{} object infos at one offset", infos.len()))
                })?);
                for info in infos {
                    self.write_object_info(info)?;
                }
            }
        }
        Ok(())
    }

    fn write_object_info(&mut self, info: &ObjectInfo) -> PgoResult<()> {
        for t in info.key() {
            self.write_type(t);
        }
        let chain_len = u16::try_from(info.proto_chain.len()).map_err(|_| {
            PgoError::InvalidArgument("prototype chain too long".to_string())
        })?;
        self.w.write_u16(chain_len);
        for (root, shape) in &info.proto_chain {
            self.write_type(*root);
            self.write_type(*shape);
        }
        Ok(())
    }

    fn write_layouts(&mut self, details: &RecordDetailInfos) -> PgoResult<u32> {
        let track_field = self.features.contains(ApFeatures::TRACK_FIELD);
        for tree in details.layouts().iter() {
            let size_at = self.w.reserve_u32();
            self.write_type(tree.root);
            self.write_type(tree.proto);
            self.w.write_u32(to_u32(tree.nodes.len(), "layout node count")?);
            for (shape, node) in &tree.nodes {
                self.write_type(*shape);
                let field_count = u16::try_from(node.fields.len()).map_err(|_| {
                    PgoError::InvalidArgument(format!("{} fields in one layout", node.fields.len()))
                })?;
                self.w.write_u16(field_count);
                for field in &node.fields {
                    self.w.write_str(&field.key)?;
                    if track_field {
                        self.w.write_u8(field.rep.to_u8());
                    }
                }
                self.w.write_u32(to_u32(node.children.len(), "child count")?);
                for child in &node.children {
                    self.write_type(*child);
                }
            }
            self.w.patch_len_since(size_at)?;
        }
        to_u32(details.layouts().len(), "layout count")
    }

    fn write_record_pool(&mut self, details: &RecordDetailInfos) -> PgoResult<u32> {
        for (record, name) in details.record_pool().iter() {
            self.write_type(*record);
            self.w.write_str(name)?;
        }
        to_u32(details.record_pool().len(), "record pool size")
    }

    fn write_proto_transitions(&mut self, details: &RecordDetailInfos) -> PgoResult<u32> {
        for entry in details.proto_transitions().iter() {
            for t in entry.types() {
                self.write_type(t);
            }
        }
        to_u32(details.proto_transitions().len(), "proto transition count")
    }

    fn write_type_pool(&mut self) -> PgoResult<u32> {
        let with_abc = self.features.contains(ApFeatures::PROFILE_TYPE_WITH_ABC_ID);
        for t in &self.pool.entries {
            self.w.write_u64(t.to_raw());
            if with_abc {
                self.w.write_u32(t.abc_id().unwrap_or(0));
            }
        }
        to_u32(self.pool.entries.len(), "profile type count")
    }
}

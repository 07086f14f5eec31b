//! Per-record method tables and the pools that travel with them.

use serde::Serialize;

use std::collections::BTreeMap;

use crate::{
    DefineOpType, MethodTypeSet, ObjectInfo, OpType, ProfileType, ProtoTransitionPool, RecordPool,
    ShapeLayoutTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleMode {
    CallMode,
    HotnessMode,
}

impl SampleMode {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::CallMode => 0,
            Self::HotnessMode => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::CallMode),
            1 => Some(Self::HotnessMode),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallMode => "CALL_MODE",
            Self::HotnessMode => "HOTNESS_MODE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CALL_MODE" => Some(Self::CallMode),
            "HOTNESS_MODE" => Some(Self::HotnessMode),
            _ => None,
        }
    }

    /// Hotness wins over call mode.
    pub fn union(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodRecord {
    pub method_id: u32,
    pub count: u32,
    pub mode: SampleMode,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
    pub types: MethodTypeSet,
}

impl MethodRecord {
    pub fn new(method_id: u32, name: impl Into<String>, checksum: Option<u32>, mode: SampleMode) -> Self {
        Self {
            method_id,
            count: 1,
            mode,
            name: name.into(),
            checksum,
            types: MethodTypeSet::default(),
        }
    }
}

/// Where a merged method went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMerge {
    Inserted,
    Merged,
    /// Both sides carry a checksum and they differ; the source was dropped.
    StaleChecksum,
}

/// Everything recorded for every record, plus the pools it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDetailInfos {
    max_poly_count: usize,
    records: BTreeMap<ProfileType, BTreeMap<u32, MethodRecord>>,
    record_pool: RecordPool,
    proto_transitions: ProtoTransitionPool,
    layouts: ShapeLayoutTable,
}

impl RecordDetailInfos {
    pub fn new(max_poly_count: usize) -> Self {
        Self {
            max_poly_count: max_poly_count.max(1),
            records: BTreeMap::new(),
            record_pool: RecordPool::default(),
            proto_transitions: ProtoTransitionPool::default(),
            layouts: ShapeLayoutTable::default(),
        }
    }

    pub fn max_poly_count(&self) -> usize {
        self.max_poly_count
    }

    /// Adds one observation of a method. Returns `true` when the method was
    /// not known before.
    pub fn add_method(
        &mut self,
        record: ProfileType,
        method_id: u32,
        name: &str,
        checksum: Option<u32>,
        mode: SampleMode,
    ) -> bool {
        let methods = self.records.entry(record).or_default();
        match methods.get_mut(&method_id) {
            Some(existing) => {
                existing.count = existing.count.saturating_add(1);
                existing.mode = existing.mode.union(mode);
                if existing.checksum.is_none() {
                    existing.checksum = checksum;
                }
                false
            }
            None => {
                methods.insert(method_id, MethodRecord::new(method_id, name, checksum, mode));
                true
            }
        }
    }

    fn with_types(
        &mut self,
        record: &ProfileType,
        method_id: u32,
        apply: impl FnOnce(&mut MethodTypeSet, usize),
    ) -> bool {
        let max_poly = self.max_poly_count;
        match self.records.get_mut(record).and_then(|m| m.get_mut(&method_id)) {
            Some(method) => {
                apply(&mut method.types, max_poly);
                true
            }
            None => false,
        }
    }

    pub fn add_type(&mut self, record: &ProfileType, method_id: u32, offset: u32, op: OpType) -> bool {
        self.with_types(record, method_id, |types, _| {
            types.add_op_type(offset, op)
        })
    }

    pub fn add_call_target(
        &mut self,
        record: &ProfileType,
        method_id: u32,
        offset: u32,
        target: ProfileType,
    ) -> bool {
        self.with_types(record, method_id, |types, _| {
            types.add_call_target(offset, target)
        })
    }

    pub fn add_define(
        &mut self,
        record: &ProfileType,
        method_id: u32,
        offset: u32,
        define: DefineOpType,
    ) -> bool {
        self.with_types(record, method_id, |types, _| {
            types.add_define(offset, define)
        })
    }

    pub fn add_object_info(
        &mut self,
        record: &ProfileType,
        method_id: u32,
        offset: u32,
        info: ObjectInfo,
    ) -> bool {
        self.with_types(record, method_id, |types, max_poly| {
            types.add_object_info(offset, info, max_poly)
        })
    }

    pub fn add_object_info_mega(&mut self, record: &ProfileType, method_id: u32, offset: u32) -> bool {
        self.with_types(record, method_id, |types, _| {
            types.add_object_info_mega(offset)
        })
    }

    /// Inserts a decoded method as-is, folding into an existing entry.
    pub fn insert_method(&mut self, record: ProfileType, method: MethodRecord) -> MethodMerge {
        let max_poly = self.max_poly_count;
        merge_method(self.records.entry(record).or_default(), &method, max_poly)
    }

    pub fn method(&self, record: &ProfileType, method_id: u32) -> Option<&MethodRecord> {
        self.records.get(record)?.get(&method_id)
    }

    pub fn methods(&self, record: &ProfileType) -> Option<&BTreeMap<u32, MethodRecord>> {
        self.records.get(record)
    }

    pub fn records(&self) -> impl Iterator<Item = (&ProfileType, &BTreeMap<u32, MethodRecord>)> {
        self.records.iter()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn method_count(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    pub fn record_pool(&self) -> &RecordPool {
        &self.record_pool
    }

    pub fn record_pool_mut(&mut self) -> &mut RecordPool {
        &mut self.record_pool
    }

    pub fn proto_transitions(&self) -> &ProtoTransitionPool {
        &self.proto_transitions
    }

    pub fn proto_transitions_mut(&mut self) -> &mut ProtoTransitionPool {
        &mut self.proto_transitions
    }

    pub fn layouts(&self) -> &ShapeLayoutTable {
        &self.layouts
    }

    pub fn layouts_mut(&mut self) -> &mut ShapeLayoutTable {
        &mut self.layouts
    }

    /// Folds `other` in. Module ids must already agree.
    pub fn merge(&mut self, other: &RecordDetailInfos) -> usize {
        let max_poly = self.max_poly_count;
        let mut stale = 0;
        for (record, methods) in &other.records {
            let target = self.records.entry(*record).or_default();
            for method in methods.values() {
                if merge_method(target, method, max_poly) == MethodMerge::StaleChecksum {
                    stale += 1;
                }
            }
        }
        self.record_pool.merge(&other.record_pool);
        self.proto_transitions.merge(&other.proto_transitions);
        self.layouts.merge(&other.layouts);
        stale
    }

    pub fn map_types(&mut self, f: &impl Fn(ProfileType) -> ProfileType) {
        let max_poly = self.max_poly_count;
        let records = std::mem::take(&mut self.records);
        for (record, methods) in records {
            let target = self.records.entry(f(record)).or_default();
            for mut method in methods.into_values() {
                method.types.map_types(f, max_poly);
                merge_method(target, &method, max_poly);
            }
        }
        self.record_pool.map_types(f);
        self.proto_transitions.map_types(f);
        self.layouts.map_types(f);
    }

    /// Drops methods observed fewer than `threshold` times.
    pub fn retain_hot(&mut self, threshold: u32) {
        for methods in self.records.values_mut() {
            methods.retain(|_, m| m.count >= threshold);
        }
        self.records.retain(|_, methods| !methods.is_empty());
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.record_pool.clear();
        self.proto_transitions.clear();
        self.layouts.clear();
    }
}

fn merge_method(target: &mut BTreeMap<u32, MethodRecord>, source: &MethodRecord, max_poly: usize) -> MethodMerge {
    let Some(existing) = target.get_mut(&source.method_id) else {
        target.insert(source.method_id, source.clone());
        return MethodMerge::Inserted;
    };
    if let (Some(have), Some(got)) = (existing.checksum, source.checksum)
        && have != got
    {
        tracing::error!(
            method_id = source.method_id,
            name = %source.name,
            expected = have,
            found = got,
            "method checksum mismatch, dropping stale samples"
        );
        return MethodMerge::StaleChecksum;
    }
    existing.count = existing.count.saturating_add(source.count);
    existing.mode = existing.mode.union(source.mode);
    if existing.name.is_empty() {
        existing.name = source.name.clone();
    }
    if existing.checksum.is_none() {
        existing.checksum = source.checksum;
    }
    existing.types.merge(&source.types, max_poly);
    MethodMerge::Merged
}

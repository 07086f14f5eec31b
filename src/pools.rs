//! Value pools shared by every record: record names, proto transitions and
//! the compiled-module (panda file) table.

use serde::Serialize;

use std::collections::BTreeMap;

use crate::{ApEntityId, PgoError, PgoResult, ProfileType};

/// Record identity to display name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordPool {
    names: BTreeMap<ProfileType, String>,
}

impl RecordPool {
    pub fn add(&mut self, record: ProfileType, name: impl Into<String>) {
        self.names.entry(record).or_insert_with(|| name.into());
    }

    pub fn name(&self, record: &ProfileType) -> Option<&str> {
        self.names.get(record).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProfileType, &str)> {
        self.names.iter().map(|(t, n)| (t, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn merge(&mut self, other: &RecordPool) {
        for (record, name) in &other.names {
            self.add(*record, name.clone());
        }
    }

    pub fn map_types(&mut self, f: &impl Fn(ProfileType) -> ProfileType) {
        let names = std::mem::take(&mut self.names);
        for (record, name) in names {
            self.add(f(record), name);
        }
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}

/// A synthetic root produced by `Sub.prototype = Object.create(Base)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProtoTransitionType {
    pub ihc: ProfileType,
    pub base_root: ProfileType,
    pub base: ProfileType,
    pub transition: ProfileType,
    pub transition_proto: ProfileType,
}

impl ProtoTransitionType {
    pub fn types(&self) -> [ProfileType; 5] {
        [
            self.ihc,
            self.base_root,
            self.base,
            self.transition,
            self.transition_proto,
        ]
    }

    fn map_types(self, f: &impl Fn(ProfileType) -> ProfileType) -> Self {
        Self {
            ihc: f(self.ihc),
            base_root: f(self.base_root),
            base: f(self.base),
            transition: f(self.transition),
            transition_proto: f(self.transition_proto),
        }
    }
}

/// Proto transitions keyed by their synthetic root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtoTransitionPool {
    entries: BTreeMap<ProfileType, ProtoTransitionType>,
}

impl ProtoTransitionPool {
    /// Conflicting entries for the same root keep the smaller value.
    pub fn add(&mut self, entry: ProtoTransitionType) {
        self.entries
            .entry(entry.ihc)
            .and_modify(|current| *current = (*current).min(entry))
            .or_insert(entry);
    }

    pub fn get(&self, ihc: &ProfileType) -> Option<&ProtoTransitionType> {
        self.entries.get(ihc)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtoTransitionType> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merge(&mut self, other: &ProtoTransitionPool) {
        for entry in other.entries.values() {
            self.add(*entry);
        }
    }

    pub fn map_types(&mut self, f: &impl Fn(ProfileType) -> ProfileType) {
        let entries = std::mem::take(&mut self.entries);
        for entry in entries.into_values() {
            self.add(entry.map_types(f));
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PandaFileInfo {
    pub abc_id: ApEntityId,
    pub checksum: u32,
    pub desc: String,
}

/// Module id translation applied while merging.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AbcIdRemap {
    ids: BTreeMap<ApEntityId, ApEntityId>,
}

impl AbcIdRemap {
    pub fn insert(&mut self, from: ApEntityId, to: ApEntityId) {
        self.ids.insert(from, to);
    }

    /// Unmapped ids translate to themselves.
    pub fn map(&self, id: ApEntityId) -> ApEntityId {
        self.ids.get(&id).copied().unwrap_or(id)
    }

    pub fn map_type(&self, t: ProfileType) -> ProfileType {
        t.map_abc_id(|id| self.map(id))
    }

    pub fn is_identity(&self) -> bool {
        self.ids.iter().all(|(from, to)| from == to)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ApEntityId, ApEntityId)> + '_ {
        self.ids.iter().map(|(from, to)| (*from, *to))
    }
}

/// Checksum table of every compiled module a profile refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PandaFileInfos {
    files: BTreeMap<ApEntityId, PandaFileInfo>,
}

impl PandaFileInfos {
    /// Registers a module and returns its id. A known desc keeps its id; a
    /// changed checksum replaces the stored one.
    pub fn sample(&mut self, desc: &str, checksum: u32) -> ApEntityId {
        if let Some(existing) = self.files.values_mut().find(|f| f.desc == desc) {
            if existing.checksum != checksum {
                tracing::warn!(
                    desc,
                    old = existing.checksum,
                    new = checksum,
                    "module checksum changed"
                );
                existing.checksum = checksum;
            }
            return existing.abc_id;
        }
        let abc_id = self.next_id();
        self.insert(PandaFileInfo {
            abc_id,
            checksum,
            desc: desc.to_string(),
        });
        abc_id
    }

    pub fn insert(&mut self, info: PandaFileInfo) {
        self.files.insert(info.abc_id, info);
    }

    pub fn get(&self, abc_id: ApEntityId) -> Option<&PandaFileInfo> {
        self.files.get(&abc_id)
    }

    pub fn id_of(&self, desc: &str) -> Option<ApEntityId> {
        self.files
            .values()
            .find(|f| f.desc == desc)
            .map(|f| f.abc_id)
    }

    pub fn checksum_of(&self, desc: &str) -> Option<u32> {
        self.files
            .values()
            .find(|f| f.desc == desc)
            .map(|f| f.checksum)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PandaFileInfo> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn next_id(&self) -> ApEntityId {
        self.files
            .keys()
            .next_back()
            .map(|id| id.saturating_add(1))
            .unwrap_or(0)
    }

    /// Matches `other`'s modules against this table.
    ///
    /// A module with the same desc must carry the same checksum. Otherwise a
    /// module is matched by checksum; unmatched modules keep their id when it
    /// is free here and get a fresh one when it is not.
    pub fn build_remap(&self, other: &PandaFileInfos) -> PgoResult<AbcIdRemap> {
        let mut remap = AbcIdRemap::default();
        let mut taken: Vec<ApEntityId> = self.files.keys().copied().collect();
        let mut fresh = self.next_id();
        for src in other.files.values() {
            if let Some(dst) = self.files.values().find(|f| f.desc == src.desc) {
                if dst.checksum != src.checksum {
                    return Err(PgoError::ChecksumMismatch {
                        desc: src.desc.clone(),
                        expected: dst.checksum,
                        found: src.checksum,
                    });
                }
                remap.insert(src.abc_id, dst.abc_id);
                continue;
            }
            if let Some(dst) = self.files.values().find(|f| f.checksum == src.checksum) {
                remap.insert(src.abc_id, dst.abc_id);
                continue;
            }
            let id = if taken.contains(&src.abc_id) {
                while taken.contains(&fresh) {
                    fresh = fresh.saturating_add(1);
                }
                fresh
            } else {
                src.abc_id
            };
            taken.push(id);
            remap.insert(src.abc_id, id);
        }
        Ok(remap)
    }

    /// Adds `other`'s modules that the remap placed on ids not yet present.
    pub fn absorb(&mut self, other: &PandaFileInfos, remap: &AbcIdRemap) {
        for src in other.files.values() {
            let id = remap.map(src.abc_id);
            self.files.entry(id).or_insert_with(|| PandaFileInfo {
                abc_id: id,
                checksum: src.checksum,
                desc: src.desc.clone(),
            });
        }
    }
}

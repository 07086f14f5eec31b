//! The in-memory profile aggregate.

use crate::{ApEntityId, PandaFileInfos, ProfileType, RecordDetailInfos};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgoInfo {
    pub panda_files: PandaFileInfos,
    pub details: RecordDetailInfos,
}

impl PgoInfo {
    pub fn new(max_poly_count: usize) -> Self {
        Self {
            panda_files: PandaFileInfos::default(),
            details: RecordDetailInfos::new(max_poly_count),
        }
    }

    pub fn sample_panda_file(&mut self, desc: &str, checksum: u32) -> ApEntityId {
        self.panda_files.sample(desc, checksum)
    }

    /// Finds the record named `record_name` inside module `abc_id`.
    pub fn record_by_name(&self, abc_id: ApEntityId, record_name: &str) -> Option<ProfileType> {
        self.details
            .record_pool()
            .iter()
            .find(|(record, name)| record.abc_id() == Some(abc_id) && *name == record_name)
            .map(|(record, _)| *record)
    }

    /// Whether a profiled method exists for this module, record and method
    /// id, and its stored checksum (if any) still matches the bytecode.
    pub fn method_matches(
        &self,
        abc_desc: &str,
        record_name: &str,
        method_id: u32,
        checksum: Option<u32>,
    ) -> bool {
        let Some(abc_id) = self.panda_files.id_of(abc_desc) else {
            return false;
        };
        let Some(record) = self.record_by_name(abc_id, record_name) else {
            return false;
        };
        let Some(method) = self.details.method(&record, method_id) else {
            return false;
        };
        match (method.checksum, checksum) {
            (Some(stored), Some(current)) if stored != current => {
                tracing::error!(
                    abc = abc_desc,
                    record = record_name,
                    method_id,
                    stored = format_args!("{stored:#010x}"),
                    current = format_args!("{current:#010x}"),
                    "method checksum mismatch; profile entry is stale"
                );
                false
            }
            _ => true,
        }
    }

    pub fn method_count(&self) -> usize {
        self.details.method_count()
    }

    pub fn clear(&mut self) {
        self.details.clear();
    }
}

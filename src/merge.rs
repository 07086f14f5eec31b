//! Merging profiles from several runs into one.

use serde::Serialize;

use std::path::Path;

use rustc_hash::FxHashSet;

use crate::{
    AbcIdRemap, DecodeOptions, PgoError, PgoInfo, PgoResult, ProfileDecoder, encode,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub remap: AbcIdRemap,
    /// Source methods dropped because their bytecode checksum changed.
    pub stale_methods: usize,
    pub methods: usize,
}

/// Folds `source` into `target`, translating module ids by desc/checksum.
///
/// Fails without touching `target` when a shared module has a different
/// checksum on each side.
pub fn merge_info(target: &mut PgoInfo, source: &PgoInfo) -> PgoResult<MergeStats> {
    let remap = target.panda_files.build_remap(&source.panda_files)?;
    let mut details = source.details.clone();
    if !remap.is_identity() {
        details.map_types(&|t| remap.map_type(t));
    }
    target.panda_files.absorb(&source.panda_files, &remap);
    let stale_methods = target.details.merge(&details);
    Ok(MergeStats {
        remap,
        stale_methods,
        methods: details.method_count(),
    })
}

/// Digest of a profile's canonical encoding. Copies of the same content
/// share it however they were written.
pub fn fingerprint(info: &PgoInfo) -> PgoResult<[u8; 32]> {
    Ok(*blake3::hash(&encode(info)?).as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeInputStatus {
    Merged,
    Skipped,
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeInputReport {
    pub input: String,
    pub status: MergeInputStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub methods: usize,
    pub stale_methods: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub inputs: Vec<MergeInputReport>,
    pub merged: usize,
    pub skipped: usize,
    pub modules: usize,
    pub methods: usize,
}

impl MergeReport {
    fn push(&mut self, entry: MergeInputReport) {
        match entry.status {
            MergeInputStatus::Merged => self.merged += 1,
            MergeInputStatus::Skipped | MergeInputStatus::Duplicate => self.skipped += 1,
        }
        self.inputs.push(entry);
    }
}

/// Accumulates `.ap` inputs one at a time. A bad input is reported and
/// skipped; it never poisons what was merged before it.
pub struct ProfileMerger {
    info: PgoInfo,
    hotness_threshold: u32,
    max_poly_count: usize,
    seen: FxHashSet<[u8; 32]>,
    report: MergeReport,
    base_loaded: bool,
}

impl ProfileMerger {
    pub fn new(hotness_threshold: u32, max_poly_count: usize) -> Self {
        Self {
            info: PgoInfo::new(max_poly_count),
            hotness_threshold,
            max_poly_count,
            seen: FxHashSet::default(),
            report: MergeReport::default(),
            base_loaded: false,
        }
    }

    /// Starts from an existing profile, e.g. the current output file when
    /// merging instead of overwriting. An input with the same content as
    /// `base` is then reported as a duplicate.
    pub fn with_base(base: PgoInfo, hotness_threshold: u32) -> PgoResult<Self> {
        let max_poly_count = base.details.max_poly_count();
        let mut seen = FxHashSet::default();
        seen.insert(fingerprint(&base)?);
        Ok(Self {
            info: base,
            hotness_threshold,
            max_poly_count,
            seen,
            report: MergeReport::default(),
            base_loaded: true,
        })
    }

    pub fn info(&self) -> &PgoInfo {
        &self.info
    }

    /// Merges one encoded profile. Inputs whose content was already merged
    /// are reported as duplicates and contribute nothing.
    pub fn add_bytes(&mut self, label: &str, bytes: &[u8]) -> PgoResult<MergeStats> {
        let decoder = ProfileDecoder::new(bytes)?;
        let content = decoder.decode(&DecodeOptions {
            hotness_threshold: 0,
            max_poly_count: self.max_poly_count,
            remap: None,
        })?;
        let digest = fingerprint(&content)?;
        if self.seen.contains(&digest) {
            tracing::debug!(input = label, "identical profile already merged");
            self.report.push(MergeInputReport {
                input: label.to_string(),
                status: MergeInputStatus::Duplicate,
                reason: Some("same content as an earlier input".to_string()),
                methods: 0,
                stale_methods: 0,
            });
            return Ok(MergeStats {
                remap: AbcIdRemap::default(),
                stale_methods: 0,
                methods: 0,
            });
        }

        let stats = self.merge_decoder(&decoder)?;
        self.seen.insert(digest);
        self.report.push(MergeInputReport {
            input: label.to_string(),
            status: MergeInputStatus::Merged,
            reason: None,
            methods: stats.methods,
            stale_methods: stats.stale_methods,
        });
        Ok(stats)
    }

    fn merge_decoder(&mut self, decoder: &ProfileDecoder<'_>) -> PgoResult<MergeStats> {
        let files = decoder.panda_files()?;
        let remap = self.info.panda_files.build_remap(&files)?;
        let opts = DecodeOptions {
            hotness_threshold: self.hotness_threshold,
            max_poly_count: self.max_poly_count,
            remap: Some(&remap),
        };
        let decoded = decoder.decode(&opts)?;
        self.info.panda_files.absorb(&files, &remap);
        let stale_methods = self.info.details.merge(&decoded.details);
        Ok(MergeStats {
            remap,
            stale_methods,
            methods: decoded.method_count(),
        })
    }

    /// Reads and merges one file. Returns `false` when it was skipped.
    pub fn add_file(&mut self, path: &Path) -> bool {
        let label = path.display().to_string();
        let result = std::fs::read(path)
            .map_err(PgoError::from)
            .and_then(|bytes| self.add_bytes(&label, &bytes));
        match result {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(input = %label, "skipping profile: {err}");
                self.report.push(MergeInputReport {
                    input: label,
                    status: MergeInputStatus::Skipped,
                    reason: Some(err.to_string()),
                    methods: 0,
                    stale_methods: 0,
                });
                false
            }
        }
    }

    /// Returns the merged profile, or an error when nothing usable was read.
    pub fn finish(self) -> PgoResult<(PgoInfo, MergeReport)> {
        let mut report = self.report;
        if report.merged == 0 && !self.base_loaded {
            return Err(PgoError::Merge(format!(
                "no usable profile among {} input(s)",
                report.inputs.len()
            )));
        }
        report.modules = self.info.panda_files.len();
        report.methods = self.info.method_count();
        Ok((self.info, report))
    }
}

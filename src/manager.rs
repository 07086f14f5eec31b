//! Process-level owner of the profile aggregate.
//!
//! One manager is built at startup and shared by every profiler in the
//! process; it owns the info mutex, the module registry and the save path.

use parking_lot::{Mutex, MutexGuard};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{ApEntityId, PgoInfo, PgoResult, ProfilerConfig, encode, write_atomic};

#[derive(Debug)]
pub struct PgoProfilerManager {
    config: ProfilerConfig,
    info: Mutex<PgoInfo>,
    force_save: AtomicBool,
    saves: AtomicU64,
}

impl PgoProfilerManager {
    pub fn new(config: ProfilerConfig) -> Self {
        let info = PgoInfo::new(config.max_poly_count);
        tracing::info!(
            enable = config.enable,
            output = %config.output.display(),
            "profiler manager initialised"
        );
        Self {
            config,
            info: Mutex::new(info),
            force_save: AtomicBool::new(false),
            saves: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Locks the aggregate. Held for a whole drain or save.
    pub fn lock_info(&self) -> MutexGuard<'_, PgoInfo> {
        self.info.lock()
    }

    /// Registers a loaded module and returns its id in this aggregate.
    pub fn sample_panda_file(&self, desc: &str, checksum: u32) -> ApEntityId {
        self.info.lock().sample_panda_file(desc, checksum)
    }

    pub fn panda_file_id(&self, desc: &str) -> Option<ApEntityId> {
        self.info.lock().panda_files.id_of(desc)
    }

    /// Asks the next drain to save regardless of the thresholds.
    pub fn request_save(&self) {
        self.force_save.store(true, Ordering::Release);
    }

    pub fn take_save_request(&self) -> bool {
        self.force_save.swap(false, Ordering::AcqRel)
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Encodes the aggregate and writes it to the configured output.
    /// Returns `None` when profile dumping is disabled.
    pub fn save(&self) -> PgoResult<Option<PathBuf>> {
        if !self.config.enable_profile_dump {
            return Ok(None);
        }
        let (bytes, methods) = {
            let info = self.info.lock();
            (encode(&info)?, info.method_count())
        };
        let path = self.config.output.clone();
        write_atomic(&path, &bytes)?;
        self.saves.fetch_add(1, Ordering::Relaxed);
        tracing::info!(path = %path.display(), methods, bytes = bytes.len(), "profile saved");
        Ok(Some(path))
    }

    /// Final save at shutdown. Profilers must have run their last drain.
    pub fn teardown(&self) -> PgoResult<Option<PathBuf>> {
        let saved = self.save()?;
        tracing::info!("profiler manager torn down");
        Ok(saved)
    }
}

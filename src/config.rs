//! `pgoprof.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_POLY_COUNT: usize = 4;
pub const DEFAULT_HOTNESS_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Default reporter for CLI commands.
    #[serde(default = "default_reporter")]
    pub reporter: Reporter,

    #[serde(default)]
    pub profiler: ProfilerConfig,
}

fn default_reporter() -> Reporter {
    Reporter::Pretty
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reporter: default_reporter(),
            profiler: ProfilerConfig::default(),
        }
    }
}

/// Knobs of the in-process profiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ProfilerConfig {
    pub enable: bool,
    /// Whether collected profiles are ever written to disk.
    pub enable_profile_dump: bool,
    /// Distinct shapes a property site may see before it goes mega.
    pub max_poly_count: usize,
    /// Minimum observation count for a method to be loaded or merged.
    pub hotness_threshold: u32,
    /// Newly dumped methods needed before a timed save is considered.
    pub merged_every_count: u32,
    pub save_min_interval_secs: u64,
    /// Save after every dump instead of waiting for the thresholds.
    pub force_dump: bool,
    pub output: PathBuf,
    /// Run dump drains on a background thread.
    pub background_dump: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            enable_profile_dump: true,
            max_poly_count: DEFAULT_MAX_POLY_COUNT,
            hotness_threshold: DEFAULT_HOTNESS_THRESHOLD,
            merged_every_count: 50,
            save_min_interval_secs: 30,
            force_dump: false,
            output: PathBuf::from(".pgoprof/profile.ap"),
            background_dump: true,
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }
}

//! Crate-wide error types.

use thiserror::Error;

use crate::ApVersion;

pub type PgoResult<T> = Result<T, PgoError>;

#[derive(Debug, Error)]
pub enum PgoError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed profile at byte {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("incompatible profile version {found} (this build reads {supported}); regenerate the profile")]
    IncompatibleVersion { found: ApVersion, supported: ApVersion },

    #[error("checksum mismatch for {desc:?}: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { desc: String, expected: u32, found: u32 },

    #[error("merge error: {0}")]
    Merge(String),

    #[error("text profile error at line {line}: {reason}")]
    Text { line: usize, reason: String },
}

impl PgoError {
    pub(crate) fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn text(line: usize, reason: impl Into<String>) -> Self {
        Self::Text {
            line,
            reason: reason.into(),
        }
    }
}

//! pgoprof: profile-guided feedback collection for a dynamic-language VM.
//!
//! The live side ([`PgoProfiler`], [`PgoProfilerManager`]) turns inline
//! cache feedback into per-method samples and shape lineage trees. The
//! offline side reads, merges and writes the `.ap` profile format.

mod cmd;
mod codec;
mod config;
mod layout;
mod manager;
mod merge;
mod pgo_info;
mod platform;
mod pools;
mod profile_type;
mod profiler;
mod record;
mod runtime;
mod sample;

pub use cmd::*;
pub use codec::*;
pub use config::*;
pub use layout::*;
pub use manager::*;
pub use merge::*;
pub use pgo_info::*;
pub use platform::*;
pub use pools::*;
pub use profile_type::*;
pub use profiler::*;
pub use record::*;
pub use runtime::*;
pub use sample::*;

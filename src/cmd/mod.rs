//! CLI subcommands. Each returns a JSON value the binary renders.

mod convert_cmd;
mod dump_cmd;
mod merge_cmd;

pub use convert_cmd::*;
pub use dump_cmd::*;
pub use merge_cmd::*;

//! Diff sources available to the Glance core.

mod canned;
mod git_cli;

pub use canned::CannedSource;
pub use git_cli::{GitCliSource, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT};

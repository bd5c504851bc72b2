use std::time::Duration;

use glance_api::{DiffText, DETACHED_HEAD};

/// Output of a single diff computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutput {
    /// Current branch name, or [`DETACHED_HEAD`].
    pub branch: String,
    /// Diff body or the no-changes marker.
    pub diff: DiffText,
    /// Whether the diff was cut at the output cap.
    pub truncated: bool,
}

impl SourceOutput {
    /// Build an output from raw branch and diff text.
    #[must_use]
    pub fn new(branch: Option<String>, diff: String, truncated: bool) -> Self {
        let branch = branch
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DETACHED_HEAD.to_owned());
        Self {
            branch,
            diff: DiffText::from_output(diff),
            truncated,
        }
    }
}

/// Errors surfaced by diff sources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The path has no repository marker; nothing was executed.
    #[error("path is not a repository")]
    NotARepository,
    /// The diff did not complete within the allotted time.
    #[error("diff timed out after {after:?}")]
    OperationTimeout {
        /// Limit that was exceeded.
        after: Duration,
    },
    /// The underlying tool failed or could not be driven.
    #[error("diff command failed: {detail}")]
    CommandFailure {
        /// Diagnostic detail for logs. Never sent to clients.
        detail: String,
    },
}

impl SourceError {
    /// Helper to construct a command failure from any displayable detail.
    #[must_use]
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::CommandFailure {
            detail: detail.into(),
        }
    }
}

/// Convenience result alias for diff source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

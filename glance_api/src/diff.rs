use serde::{Deserialize, Serialize};

/// Text shown to viewers when a repository has no pending changes.
pub const NO_CHANGES_SENTINEL: &str = "No changes to show";

/// Branch label used when HEAD does not point at a branch.
pub const DETACHED_HEAD: &str = "HEAD (detached)";

/// Diff body produced for a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffText {
    /// Raw unified diff output.
    Changes(String),
    /// The working tree matches the index.
    NoChanges,
}

impl DiffText {
    /// Classify raw diff output, treating blank output as [`DiffText::NoChanges`].
    #[must_use]
    pub fn from_output(output: String) -> Self {
        if output.trim().is_empty() {
            Self::NoChanges
        } else {
            Self::Changes(output)
        }
    }

    /// Text to display, substituting the sentinel for an empty diff.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Changes(text) => text,
            Self::NoChanges => NO_CHANGES_SENTINEL,
        }
    }

    /// Whether the diff carries any pending changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        matches!(self, Self::Changes(_))
    }
}

/// Result of a successful diff request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    /// Current branch name, or [`DETACHED_HEAD`].
    pub branch: String,
    /// Repository path relative to its approved root (e.g. `~/proj`).
    pub repository_path: String,
    /// Diff body or the no-changes sentinel.
    pub diff: DiffText,
    /// Set when the diff was cut at the configured output cap.
    pub truncated: bool,
}

/// JSON body returned to the rendering frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResponse {
    /// Unified diff text or [`NO_CHANGES_SENTINEL`].
    pub diff: String,
    /// Current branch name.
    pub branch: String,
    /// Shortened repository path.
    pub repository_path: String,
    /// Whether `diff` was cut short.
    #[serde(default)]
    pub truncated: bool,
    /// `false` when `diff` holds the sentinel rather than diff output.
    #[serde(default)]
    pub has_changes: bool,
}

impl From<DiffResult> for DiffResponse {
    fn from(result: DiffResult) -> Self {
        let has_changes = result.diff.has_changes();
        let diff = match result.diff {
            DiffText::Changes(text) => text,
            DiffText::NoChanges => NO_CHANGES_SENTINEL.to_owned(),
        };
        Self {
            diff,
            branch: result.branch,
            repository_path: result.repository_path,
            truncated: result.truncated,
            has_changes,
        }
    }
}

mod types;

use std::path::Path;

pub use types::{SourceError, SourceOutput, SourceResult};

/// Read-only producer of diff text for a confirmed repository path.
///
/// Callers must only pass paths that already went through path confinement;
/// implementations never widen what they are given.
#[async_trait::async_trait]
pub trait DiffSource: Send + Sync {
    /// Stable identifier used for logging.
    fn id(&self) -> &'static str;

    /// Compute the pending diff and current branch for `repository`.
    ///
    /// Dropping the returned future must abandon any work it started.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotARepository`] without running anything when
    /// `repository` carries no repository marker, and timeout or command
    /// failures otherwise.
    async fn run(&self, repository: &Path) -> SourceResult<SourceOutput>;
}

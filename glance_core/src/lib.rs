//! Core library for Glance's remote diff viewer.
//!
//! The crate is layered around three responsibilities:
//! - signed, time-bounded access tokens bound to one repository path
//! - confinement of repository paths to the approved roots
//! - the diff service that ties both to a read-only diff source

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]
#![cfg_attr(
    not(test),
    deny(
        clippy::dbg_macro,
        clippy::expect_used,
        clippy::panic,
        clippy::print_stderr,
        clippy::print_stdout,
        clippy::todo,
        clippy::unwrap_used
    )
)]

/// Path canonicalization and approved-root confinement.
pub mod guard;
/// Diff service orchestrating tokens, confinement and diff sources.
pub mod service;
/// Diff source interface and bundled implementations.
pub mod sources;
/// Access token issuance and verification.
pub mod token;

pub use glance_api::{
    DiffResponse, DiffResult, DiffText, ErrorBody, ErrorKind, DETACHED_HEAD, NO_CHANGES_SENTINEL,
};

use guard::PathError;
use sources::SourceError;
use token::TokenError;

/// Common result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token could not be issued or verified.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Path failed confinement or is not a repository.
    #[error(transparent)]
    Path(#[from] PathError),
    /// Diff source failed to produce a diff.
    #[error(transparent)]
    Source(SourceError),
    /// No diff slot became free within the admission wait.
    #[error("all {limit} diff slots are busy")]
    Busy {
        /// Configured concurrency limit.
        limit: usize,
    },
    /// Internal invariant failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable public classification of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Token(err) => err.kind(),
            Self::Path(err) => err.kind(),
            Self::Source(SourceError::NotARepository) => ErrorKind::NotARepository,
            Self::Source(SourceError::OperationTimeout { .. }) => ErrorKind::OperationTimeout,
            Self::Source(SourceError::CommandFailure { .. }) => ErrorKind::CommandFailure,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<SourceError> for Error {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::NotARepository => Self::Path(PathError::NotARepository),
            other => Self::Source(other),
        }
    }
}

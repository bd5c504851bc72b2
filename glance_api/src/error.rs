use serde::{Deserialize, Serialize};

/// Stable, public classification of a failed diff request.
///
/// The kind is the only part of a failure that crosses the process boundary;
/// detailed causes stay in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Token could not be parsed into the expected claims.
    TokenMalformed,
    /// Token lifetime has elapsed.
    TokenExpired,
    /// Token was not signed with the configured secret.
    TokenSignatureMismatch,
    /// Path is relative, not canonical, or otherwise unusable.
    InvalidPath,
    /// Path resolves outside every approved root.
    PathNotAllowed,
    /// Path is missing, not a directory, or not a repository.
    NotARepository,
    /// Diff command did not finish in time.
    OperationTimeout,
    /// Diff command failed.
    CommandFailure,
    /// All diff slots are busy.
    Busy,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Human-readable message safe to return to any caller.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::TokenMalformed => "invalid token",
            Self::TokenExpired => "token expired",
            Self::TokenSignatureMismatch => "invalid token signature",
            Self::InvalidPath => "invalid repository path",
            Self::PathNotAllowed => "access denied",
            Self::NotARepository => "repository not found",
            Self::OperationTimeout => "diff timed out",
            Self::CommandFailure => "diff failed",
            Self::Busy => "too many concurrent diff requests",
            Self::Internal => "internal error",
        }
    }

    /// Whether the failure is attributable to the presented token.
    #[must_use]
    pub const fn is_token_failure(self) -> bool {
        matches!(
            self,
            Self::TokenMalformed | Self::TokenExpired | Self::TokenSignatureMismatch
        )
    }
}

/// JSON body returned for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable message, see [`ErrorKind::message`].
    pub error: String,
    /// Machine-readable code.
    pub code: ErrorKind,
}

impl From<ErrorKind> for ErrorBody {
    fn from(kind: ErrorKind) -> Self {
        Self {
            error: kind.message().to_owned(),
            code: kind,
        }
    }
}

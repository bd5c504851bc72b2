use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use glance_api::DiffResult;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use crate::guard::{Confined, PathGuard};
use crate::sources::DiffSource;
use crate::token::TokenCodec;
use crate::{Error, Result};

/// Default number of diffs allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;
/// Default time a request waits for a free diff slot.
pub const DEFAULT_ADMISSION_WAIT: Duration = Duration::from_secs(2);

/// Concurrency limits applied by [`DiffService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLimits {
    /// Maximum diffs running at once. Values below one are raised to one.
    pub max_concurrent: usize,
    /// How long a request waits for a slot before failing with [`Error::Busy`].
    pub admission_wait: Duration,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            admission_wait: DEFAULT_ADMISSION_WAIT,
        }
    }
}

/// Serves diffs for token holders.
///
/// Cloning is cheap; clones share the admission gate.
#[derive(Clone)]
pub struct DiffService {
    codec: TokenCodec,
    guard: PathGuard,
    source: Arc<dyn DiffSource>,
    permits: Arc<Semaphore>,
    limits: ServiceLimits,
}

impl std::fmt::Debug for DiffService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffService")
            .field("codec", &self.codec)
            .field("guard", &self.guard)
            .field("source", &self.source.id())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl DiffService {
    /// Build a service with the default [`ServiceLimits`].
    #[must_use]
    pub fn new(codec: TokenCodec, guard: PathGuard, source: Arc<dyn DiffSource>) -> Self {
        Self::with_limits(codec, guard, source, ServiceLimits::default())
    }

    /// Build a service with explicit limits.
    #[must_use]
    pub fn with_limits(
        codec: TokenCodec,
        guard: PathGuard,
        source: Arc<dyn DiffSource>,
        limits: ServiceLimits,
    ) -> Self {
        let limits = ServiceLimits {
            max_concurrent: limits.max_concurrent.max(1),
            ..limits
        };
        Self {
            codec,
            guard,
            source,
            permits: Arc::new(Semaphore::new(limits.max_concurrent)),
            limits,
        }
    }

    /// Limits in effect.
    #[must_use]
    pub const fn limits(&self) -> ServiceLimits {
        self.limits
    }

    /// Approved-root policy in effect.
    #[must_use]
    pub const fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Resolve `token` to the diff of the repository it names.
    ///
    /// The source is not consulted unless the token verifies and the claimed
    /// path is still confined to an approved root.
    ///
    /// # Errors
    ///
    /// - [`Error::Token`] if the token is malformed, expired or forged.
    /// - [`Error::Path`] if the claimed path is no longer an allowed repository.
    /// - [`Error::Busy`] if no diff slot frees up within the admission wait.
    /// - [`Error::Source`] if the diff itself fails or times out.
    pub async fn get_diff(&self, token: &str) -> Result<DiffResult> {
        let claimed = self.codec.verify(token).map_err(|err| {
            debug!(kind = ?err.kind(), "token rejected");
            Error::from(err)
        })?;

        let guard = self.guard.clone();
        let confined = tokio::task::spawn_blocking(move || guard.confine(claimed))
            .await
            .map_err(|err| Error::Internal(format!("confinement task failed: {err}")))?
            .map_err(|err| {
                warn!(kind = ?err.kind(), "claimed path rejected");
                Error::from(err)
            })?;

        let display_path = confined.display_path();
        let _permit = self.admit().await.inspect_err(|_| {
            warn!(
                repository = %display_path,
                limit = self.limits.max_concurrent,
                "diff slots exhausted"
            );
        })?;

        let output = self
            .source
            .run(confined.path().as_std_path())
            .await
            .map_err(|err| {
                let err = Error::from(err);
                warn!(
                    repository = %display_path,
                    source = self.source.id(),
                    kind = ?err.kind(),
                    error = %err,
                    "diff failed"
                );
                err
            })?;

        info!(
            repository = %display_path,
            branch = %output.branch,
            has_changes = output.diff.has_changes(),
            truncated = output.truncated,
            "served diff"
        );

        Ok(DiffResult {
            branch: output.branch,
            repository_path: display_path,
            diff: output.diff,
            truncated: output.truncated,
        })
    }

    /// Issue a token for the repository at `path`.
    ///
    /// Only repositories that pass confinement can be linked; the token
    /// carries the canonical path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Path`] when `path` is not an allowed repository and
    /// [`Error::Token`] if signing fails.
    pub fn issue_token(&self, path: impl AsRef<Path>) -> Result<String> {
        let confined = self.guard.confine(path)?;
        self.issue_for(&confined)
    }

    /// Issue a token for an already confined repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if signing fails.
    pub fn issue_for(&self, confined: &Confined) -> Result<String> {
        let token = self.codec.issue(confined.path())?;
        info!(repository = %confined.display_path(), "issued diff token");
        Ok(token)
    }

    async fn admit(&self) -> Result<SemaphorePermit<'_>> {
        match tokio::time::timeout(self.limits.admission_wait, self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(closed)) => Err(Error::Internal(format!("admission gate closed: {closed}"))),
            Err(_) => Err(Error::Busy {
                limit: self.limits.max_concurrent,
            }),
        }
    }
}

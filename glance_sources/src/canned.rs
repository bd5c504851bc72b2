use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use glance_source_api::{DiffSource, SourceError, SourceOutput, SourceResult};

/// Source that returns a fixed outcome without spawning anything.
///
/// Used to exercise token and confinement logic in isolation, and to hold
/// admission slots for a configurable delay.
#[derive(Debug)]
pub struct CannedSource {
    outcome: SourceResult<SourceOutput>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CannedSource {
    /// Always report `diff` on `branch`.
    #[must_use]
    pub fn with_diff(branch: impl Into<String>, diff: impl Into<String>) -> Self {
        Self::from_outcome(Ok(SourceOutput::new(
            Some(branch.into()),
            diff.into(),
            false,
        )))
    }

    /// Always report a clean working tree on `branch`.
    #[must_use]
    pub fn no_changes(branch: impl Into<String>) -> Self {
        Self::with_diff(branch, String::new())
    }

    /// Always fail with `error`.
    #[must_use]
    pub fn failing(error: SourceError) -> Self {
        Self::from_outcome(Err(error))
    }

    /// Sleep for `delay` before answering each call.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times [`DiffSource::run`] has been invoked.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn from_outcome(outcome: SourceResult<SourceOutput>) -> Self {
        Self {
            outcome,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl DiffSource for CannedSource {
    fn id(&self) -> &'static str {
        "canned"
    }

    async fn run(&self, _repository: &Path) -> SourceResult<SourceOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

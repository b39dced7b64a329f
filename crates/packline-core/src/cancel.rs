use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generation counter shared between the dev loop and running builds.
///
/// A build captures the generation it started under; bumping the counter
/// makes that build stale. Stale builds stop at the next checkpoint and
/// their results are discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    generation: Arc<AtomicU64>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate every build started so far; returns the new generation.
    pub fn supersede(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether a build started at `generation` has been superseded.
    #[must_use]
    pub fn is_stale(&self, generation: u64) -> bool {
        self.current() != generation
    }
}

//! Decision stage error types.

use thiserror::Error;
use venc_core::error::Error as CoreError;

/// Error type for the decision subsystem.
#[derive(Error, Debug)]
pub enum DecisionError {
    /// Core error (sequencing, capacity, configuration, consistency).
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A reference lookup found no live entry where the fallback policy
    /// does not apply (e.g. a completion report for a recycled slot).
    #[error("no live reference entry for coding order {coding_order}")]
    UnknownSlot { coding_order: u64 },

    /// A consumer reported consumption of a reference it holds no
    /// outstanding dependency on; duplicate or stray report.
    #[error(
        "duplicate consumption report for reference {coding_order} \
         from consumer {consumer}"
    )]
    DuplicateReport { coding_order: u64, consumer: u64 },

    /// Shutdown requested while a reference still has live dependencies.
    #[error(
        "reference {coding_order} still has {count} outstanding \
         dependencies"
    )]
    OutstandingDependencies { coding_order: u64, count: usize },

    /// Drain check failed: slots are still live after end of stream.
    #[error("reference queue not drained; live coding orders: {live_slots:?}")]
    NotDrained { live_slots: Vec<u64> },
}

/// Decision result type.
pub type Result<T> = std::result::Result<T, DecisionError>;

impl DecisionError {
    /// Whether this error aborts the encode session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecisionError::Core(e) if e.is_fatal())
    }
}

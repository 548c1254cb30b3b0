//! Error types for the venc pipeline.
//!
//! The taxonomy distinguishes protocol bugs (sequencing), fatal session
//! errors (capacity, configuration) and diagnostic consistency violations.

use crate::picture::DecisionState;
use thiserror::Error;

/// Core error type shared by all pipeline stages.
#[derive(Error, Debug)]
pub enum Error {
    /// Out-of-order picture ingestion. Upstream protocol bug; the caller
    /// must not retry with the same picture.
    #[error("sequencing error: display order must exceed {expected}, got {got}")]
    Sequencing { expected: u64, got: u64 },

    /// Reference window full after a complete probe cycle. The configured
    /// window is inconsistent with the requested GOP structure; fatal for
    /// the encode session.
    #[error(
        "reference window exhausted at coding order {coding_order}: \
         {occupied}/{capacity} slots live"
    )]
    CapacityExhausted {
        coding_order: u64,
        occupied: usize,
        capacity: usize,
    },

    /// Invalid startup configuration. Reported before any picture is
    /// processed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Protocol non-compliance detected at runtime (forced release with
    /// outstanding dependencies, double-freed buffer handle). Does not
    /// corrupt in-memory state further.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Decision-state advance not present in the transition table.
    #[error("invalid decision state transition: {from} -> {to}")]
    InvalidTransition {
        from: DecisionState,
        to: DecisionState,
    },

    /// End of stream reached.
    #[error("end of stream")]
    EndOfStream,
}

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a consistency violation.
    pub fn consistency(msg: impl Into<String>) -> Self {
        Error::Consistency(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if this error aborts the encode session. Sequencing and
    /// consistency errors reject the offending operation but leave the
    /// session able to continue; capacity and configuration errors do not.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CapacityExhausted { .. } | Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Sequencing {
            expected: 7,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "sequencing error: display order must exceed 7, got 3"
        );

        let err = Error::CapacityExhausted {
            coding_order: 42,
            occupied: 8,
            capacity: 8,
        };
        assert!(err.to_string().contains("coding order 42"));
        assert!(err.to_string().contains("8/8"));
    }

    #[test]
    fn test_is_fatal() {
        assert!(Error::config("bad window").is_fatal());
        assert!(Error::CapacityExhausted {
            coding_order: 0,
            occupied: 1,
            capacity: 1,
        }
        .is_fatal());
        assert!(!Error::Sequencing { expected: 1, got: 0 }.is_fatal());
        assert!(!Error::consistency("late report").is_fatal());
    }

    #[test]
    fn test_is_eof() {
        assert!(Error::EndOfStream.is_eof());
        assert!(!Error::config("x").is_eof());
    }
}

use thiserror::Error;

use crate::analysis::AnalysisKind;

pub type Result<T> = std::result::Result<T, PreError>;

/// Reasons the pass gave up on a procedure. Every variant is fatal for the
/// procedure: the caller compiles it without partial redundancy elimination.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PreError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("interrupted during {phase}")]
    Interrupted { phase: &'static str },

    #[error("{candidates} candidates exceed the capacity of {capacity}")]
    CapacityExceeded { candidates: usize, capacity: usize },

    #[error("{stage:?} ran before {missing:?} completed")]
    StageOrder { stage: AnalysisKind, missing: AnalysisKind },
}

impl PreError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

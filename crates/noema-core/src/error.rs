//! Crate-wide error taxonomy
//!
//! One enum for every failure kind named by the engine's error-handling
//! policy. Subsystem-local errors (e.g. [`crate::training::history::HistoryError`])
//! convert into this type at the boundary where they stop being recoverable
//! locally and start needing to reach a caller.

use thiserror::Error;

/// The kind of entity a [`NoemaError::NotFound`] failed to locate.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Hyperedge,
    Trajectory,
    TrainingRecord,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Node => "node",
            EntityKind::Hyperedge => "hyperedge",
            EntityKind::Trajectory => "trajectory",
            EntityKind::TrainingRecord => "training record",
        };
        write!(f, "{s}")
    }
}

/// Crate-wide error type.
///
/// Propagation policy (see SPEC_FULL.md §7): dimension errors are fatal to
/// the call that raised them; numerical instability is recovered locally
/// and never surfaces as this variant; tracker/learner forwarding failures
/// are logged and never constructed into a response error; training
/// timeouts/cancellation never become `Err` at all (see
/// [`crate::training::TrainingSummary`]).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NoemaError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionError { expected: usize, got: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("component not initialized: {0}")]
    NotInitialized(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("numerical instability in {op}: {detail}")]
    NumericalInstability { op: String, detail: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("external collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NoemaError>;

//! Error types for the processing engine.
//!
//! Two kinds of errors exist:
//!
//! - [`ProcessingError`]: misuse of the engine itself (an inactive pool, a
//!   malformed index, a worker that could not be spawned).
//! - [`StageError`]: the failure of a single element inside a stage. These
//!   never abort a pipeline; they travel downstream as ordinary elements.

use thiserror::Error;

/// Usage errors raised by the engine.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// `exec` was called on a pool that has no active user.
    #[error("processor pool is not active (exec without request)")]
    PoolNotActive,

    /// `release` was called more often than `request`.
    #[error("processor pool released while idle")]
    PoolNotRequested,

    /// An index component exceeds the sibling bound of its level.
    #[error("index position {position} >= sibling bound {bound}")]
    InvalidIndex { position: usize, bound: usize },

    /// A worker or feeder thread could not be started.
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single element, carried through the pipeline as a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The stage function panicked while processing the element.
    #[error("{stage} stage panicked: {message}")]
    Panicked { stage: &'static str, message: String },

    /// A fallible stage function returned an error.
    #[error("{stage} stage failed: {message}")]
    Failed { stage: &'static str, message: String },

    /// The task feeding the stage terminated before delivering its results.
    #[error("stage aborted: {message}")]
    Aborted { message: String },
}

impl StageError {
    /// Build a [`StageError::Panicked`] from a panic payload.
    pub fn from_panic(stage: &'static str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        StageError::Panicked { stage, message }
    }

    /// Name of the stage that produced the failure, if known.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            StageError::Panicked { stage, .. } | StageError::Failed { stage, .. } => Some(stage),
            StageError::Aborted { .. } => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// One element as seen by a consumer: a value or the failure that replaced it.
pub type Outcome<T> = std::result::Result<T, StageError>;

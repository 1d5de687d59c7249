//! Error types for the monitoring engine
//!
//! The taxonomy follows the engine's contract: validation problems are
//! rejected synchronously and never partially applied, insufficient data is
//! a non-fatal skip surfaced to the caller, and timeouts abort the task
//! without persisting anything.

use std::fmt;

use crate::storage::StorageError;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the monitoring engine
#[derive(Debug)]
pub enum EngineError {
    /// Bad condition config, bad override request, or an invalid
    /// configuration table. Rejected before any state is touched.
    Validation(String),

    /// An analytics task was asked to run over too few samples.
    /// Nothing is persisted; the caller may retry once more data exists.
    InsufficientData {
        /// Samples required for the computation
        needed: usize,
        /// Samples actually available in the window
        got: usize,
    },

    /// A scheduled task exceeded its execution budget and was aborted.
    Timeout {
        /// Human-readable task description (e.g. "aggregation web-01 2026-08-05")
        task: String,
        /// Budget that was exceeded, in seconds
        budget_secs: u64,
    },

    /// A task for the same (server, task-type) pair is already running.
    TaskBusy {
        server_id: String,
        task: String,
    },

    /// A running task was cancelled because a newer trigger superseded it.
    Cancelled { task: String },

    /// The sample store failed
    Storage(StorageError),

    /// The engine (or one of its actors) is shutting down
    Shutdown,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {}", msg),
            EngineError::InsufficientData { needed, got } => {
                write!(f, "insufficient data: need {} samples, got {}", needed, got)
            }
            EngineError::Timeout { task, budget_secs } => {
                write!(f, "task {} exceeded its {}s budget", task, budget_secs)
            }
            EngineError::TaskBusy { server_id, task } => {
                write!(f, "task {} already running for server {}", task, server_id)
            }
            EngineError::Cancelled { task } => {
                write!(f, "task {} cancelled by a newer trigger", task)
            }
            EngineError::Storage(err) => write!(f, "storage error: {}", err),
            EngineError::Shutdown => write!(f, "engine is shutting down"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::Storage(err)
    }
}

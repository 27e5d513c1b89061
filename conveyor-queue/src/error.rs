//! Error types for the queue surface.

use conveyor_error::JobError;
use thiserror::Error;
use uuid::Uuid;

use crate::types::JobState;

/// Errors that may occur while interacting with the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue backend is unavailable")]
    Unavailable,

    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {id} is not in failed state (current state: {state})")]
    NotFailed { id: Uuid, state: JobState },

    #[error("job execution failed: {0}")]
    Execution(#[from] JobError),
}

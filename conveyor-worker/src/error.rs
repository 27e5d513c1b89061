//! Worker subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Startup found no registered handlers; every submitted job would be
    /// undeliverable.
    #[error("no job handlers registered")]
    NoHandlers,

    #[error("duplicate handler registered for job type '{0}'")]
    DuplicateHandler(String),

    #[error(transparent)]
    Queue(#[from] conveyor_queue::QueueError),
}

//! Job handler trait.

use async_trait::async_trait;
use conveyor_error::JobError;
use conveyor_queue::Job;
use serde_json::Value;

/// Errors a handler may surface; classified by the dispatcher before the
/// queue sees them.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A named processor for jobs of one type.
///
/// Handlers must be idempotent: delivery is at-least-once, and a job may be
/// re-executed after a forced shutdown or a timed-out attempt whose underlying
/// work was never cancelled.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job name this handler processes.
    fn name(&self) -> &str;

    /// Execute one attempt. The returned value is stored on the job
    /// unchanged. Errors may be any error type; the dispatcher classifies
    /// them into the failure taxonomy.
    async fn run(&self, job: &Job) -> Result<Value, HandlerError>;

    /// Called after a failed attempt that will be retried. Best-effort: an
    /// error here is logged and never replaces the handler error.
    async fn on_retry(&self, _job: &Job, _attempt: u32, _error: &JobError) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called after the final failed attempt. Best-effort, like `on_retry`.
    async fn on_failed(&self, _job: &Job, _attempt: u32, _error: &JobError) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// A handler that immediately completes jobs.
///
/// Useful for tests or as a placeholder while the real processor isn't
/// ready yet.
#[derive(Debug, Default, Clone)]
pub struct NoopHandler {
    name: String,
}

impl NoopHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl JobHandler for NoopHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        Ok(Value::Null)
    }
}

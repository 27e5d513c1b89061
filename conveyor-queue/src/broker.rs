//! The broker contract the engine consumes.
//!
//! The durable queue is an external collaborator; this trait is its interface
//! as seen from the engine. The submission client uses the administrative
//! half, the worker pool the delivery half. The broker owns attempt
//! bookkeeping: `fetch_next` increments `attempts_made`, and `fail_job`
//! decides between rescheduling and terminal failure.

use std::time::Duration;

use async_trait::async_trait;
use conveyor_error::JobError;
use serde_json::Value;
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::{EnqueueResult, Job, JobOptions, JobState, QueueCounts};

#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Add a job to the queue. Options are expected to be fully merged.
    async fn enqueue(
        &self,
        name: &str,
        payload: Value,
        opts: JobOptions,
    ) -> Result<EnqueueResult, QueueError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Requeue a failed job with a fresh attempt budget.
    async fn retry_job(&self, id: Uuid) -> Result<(), QueueError>;

    async fn remove_job(&self, id: Uuid) -> Result<(), QueueError>;

    async fn pause(&self) -> Result<(), QueueError>;

    async fn resume(&self) -> Result<(), QueueError>;

    async fn is_paused(&self) -> Result<bool, QueueError>;

    /// Prune jobs in `state`, keeping at most `count` jobs no older than
    /// `age`. Returns the ids that were removed.
    async fn clean(
        &self,
        age: Duration,
        count: usize,
        state: JobState,
    ) -> Result<Vec<Uuid>, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// List jobs in `state`, most recent first.
    async fn list_jobs(
        &self,
        state: JobState,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, QueueError>;

    /// Pop the next due job, marking it active and counting the attempt.
    /// Returns `None` when the queue is paused or nothing is due.
    async fn fetch_next(&self) -> Result<Option<Job>, QueueError>;

    /// Record a successful attempt with the handler's result.
    async fn complete_job(&self, id: Uuid, result: Value) -> Result<(), QueueError>;

    /// Record a failed attempt. A retryable error with attempt budget left
    /// reschedules the job per its backoff spec; anything else is terminal.
    async fn fail_job(&self, id: Uuid, error: &JobError) -> Result<(), QueueError>;
}

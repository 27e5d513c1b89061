//! Job submission service.
//!
//! [`JobClient`] is the application-facing surface: it merges per-call options
//! with per-handler defaults and service-wide retention defaults, then hands
//! off to the broker. It also carries the administrative operations consumed
//! by monitoring surfaces: retry, batch retry, removal, pause/resume,
//! retention cleanup and state counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use conveyor_config::RetentionConfig;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::JobBroker;
use crate::error::QueueError;
use crate::types::{Job, JobOptions, JobState, QueueCounts};

/// Reference to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
}

/// Outcome of a batch retry over all failed jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryBatchReport {
    pub retried: usize,
    pub failed: usize,
}

/// Per-call overrides for [`JobClient::clean_old_jobs`]; unset fields use the
/// configured retention defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    pub completed_age: Option<Duration>,
    pub completed_count: Option<usize>,
    pub failed_age: Option<Duration>,
    pub failed_count: Option<usize>,
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub completed_removed: usize,
    pub failed_removed: usize,
}

/// Snapshot of queue health for monitoring surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMetrics {
    pub counts: QueueCounts,
    pub paused: bool,
}

/// Public API for submitting jobs and administering the queue.
#[derive(Clone)]
pub struct JobClient {
    broker: Arc<dyn JobBroker>,
    retention: RetentionConfig,
    handler_defaults: Arc<HashMap<String, JobOptions>>,
}

impl JobClient {
    pub fn new(broker: Arc<dyn JobBroker>, retention: RetentionConfig) -> Self {
        Self {
            broker,
            retention,
            handler_defaults: Arc::new(HashMap::new()),
        }
    }

    /// Inject per-handler submit defaults, typically exported by the handler
    /// registry after construction. Second phase of engine wiring; the client
    /// itself never sees the registry.
    pub fn with_handler_defaults(mut self, defaults: HashMap<String, JobOptions>) -> Self {
        self.handler_defaults = Arc::new(defaults);
        self
    }

    /// Enqueue a job. Broker failures surface synchronously and are never
    /// auto-retried here.
    pub async fn submit(
        &self,
        name: &str,
        payload: Value,
        opts: Option<JobOptions>,
    ) -> Result<JobHandle, QueueError> {
        let merged = JobOptions::layered(opts, self.handler_defaults.get(name), &self.retention);
        let result = self.broker.enqueue(name, payload, merged).await?;
        info!(job = name, job_id = %result.job_id, "job submitted");
        Ok(JobHandle { id: result.job_id })
    }

    /// Requeue a failed job. Retrying a job in any other state is a caller
    /// error and is rejected naming the job's actual state.
    pub async fn retry(&self, id: Uuid) -> Result<(), QueueError> {
        let job = self
            .broker
            .get_job(id)
            .await?
            .ok_or(QueueError::NotFound(id))?;
        if job.state != JobState::Failed {
            return Err(QueueError::NotFailed {
                id,
                state: job.state,
            });
        }
        self.broker.retry_job(id).await?;
        info!(job_id = %id, job = %job.name, "failed job requeued");
        Ok(())
    }

    /// Retry every currently-failed job, each independently; one job's retry
    /// failure never aborts the batch.
    pub async fn retry_all_failed(&self) -> Result<RetryBatchReport, QueueError> {
        let failed = self
            .broker
            .list_jobs(JobState::Failed, usize::MAX, 0)
            .await?;
        let mut report = RetryBatchReport::default();
        for job in failed {
            match self.retry(job.id).await {
                Ok(()) => report.retried += 1,
                Err(err) => {
                    warn!(job_id = %job.id, job = %job.name, error = %err, "retry failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            retried = report.retried,
            failed = report.failed,
            "batch retry finished"
        );
        Ok(report)
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), QueueError> {
        self.broker.remove_job(id).await?;
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub async fn pause_queue(&self) -> Result<(), QueueError> {
        self.broker.pause().await?;
        info!("queue paused");
        Ok(())
    }

    pub async fn resume_queue(&self) -> Result<(), QueueError> {
        self.broker.resume().await?;
        info!("queue resumed");
        Ok(())
    }

    /// Prune terminal jobs past their retention window. Caller-supplied
    /// overrides apply to this call only.
    pub async fn clean_old_jobs(&self, opts: CleanOptions) -> Result<CleanReport, QueueError> {
        let completed = self
            .broker
            .clean(
                opts.completed_age.unwrap_or(self.retention.completed_age),
                opts.completed_count
                    .unwrap_or(self.retention.completed_count),
                JobState::Completed,
            )
            .await?;
        let failed = self
            .broker
            .clean(
                opts.failed_age.unwrap_or(self.retention.failed_age),
                opts.failed_count.unwrap_or(self.retention.failed_count),
                JobState::Failed,
            )
            .await?;
        let report = CleanReport {
            completed_removed: completed.len(),
            failed_removed: failed.len(),
        };
        info!(
            completed_removed = report.completed_removed,
            failed_removed = report.failed_removed,
            "old jobs cleaned"
        );
        Ok(report)
    }

    pub async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        Ok(QueueMetrics {
            counts: self.broker.counts().await?,
            paused: self.broker.is_paused().await?,
        })
    }

    pub async fn job_details(&self, id: Uuid) -> Result<Job, QueueError> {
        self.broker
            .get_job(id)
            .await?
            .ok_or(QueueError::NotFound(id))
    }
}

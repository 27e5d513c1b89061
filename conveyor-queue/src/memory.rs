//! In-memory broker implementation.
//!
//! Stands in for the durable queue so the engine can be wired together and
//! exercised without provisioning real queue infrastructure. Dispatch order is
//! priority first (higher value wins), then submission order; delayed jobs
//! become eligible once their `run_at` passes.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_error::JobError;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::broker::JobBroker;
use crate::error::QueueError;
use crate::types::{EnqueueResult, Job, JobOptions, JobState, QueueCounts, RetentionSpec};

/// Upper bound on terminal jobs kept in memory, independent of retention
/// options. Oldest terminal jobs are dropped first.
const MAX_TERMINAL_JOBS: usize = 1000;

/// Internal storage optimized for both FIFO scanning and lookup by id.
#[derive(Debug, Default)]
struct QueueState {
    /// Submission order of job ids (oldest first).
    order: VecDeque<Uuid>,
    /// Map from id to job for O(1) lookup.
    jobs: HashMap<Uuid, Job>,
    paused: bool,
}

impl QueueState {
    fn insert(&mut self, job: Job) {
        let id = job.id;
        self.jobs.insert(id, job);
        self.order.push_back(id);
    }

    fn remove(&mut self, id: &Uuid) -> Option<Job> {
        let job = self.jobs.remove(id);
        if job.is_some() {
            self.order.retain(|existing| existing != id);
        }
        job
    }

    /// Ids of jobs in `state`, most recently finished first.
    fn recent_in_state(&self, state: JobState) -> Vec<Uuid> {
        let mut ids: Vec<(Uuid, DateTime<Utc>)> = self
            .jobs
            .values()
            .filter(|j| j.state == state)
            .map(|j| (j.id, j.finished_at.unwrap_or(j.created_at)))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1));
        ids.into_iter().map(|(id, _)| id).collect()
    }

    /// Remove jobs in `state` that fall outside the age window or beyond the
    /// count of most-recent survivors. Returns removed ids.
    fn prune(
        &mut self,
        state: JobState,
        age: Option<Duration>,
        count: Option<usize>,
    ) -> Vec<Uuid> {
        let now = Utc::now();
        let keep = count.unwrap_or(usize::MAX);
        let mut removed = Vec::new();
        for (index, id) in self.recent_in_state(state).into_iter().enumerate() {
            let too_many = index >= keep;
            let too_old = match (age, self.jobs.get(&id)) {
                (Some(age), Some(job)) => {
                    let reference = job.finished_at.unwrap_or(job.created_at);
                    now.signed_duration_since(reference).num_milliseconds()
                        > age.as_millis() as i64
                }
                _ => false,
            };
            if too_many || too_old {
                self.remove(&id);
                removed.push(id);
            }
        }
        removed
    }

    /// Enforce the global cap on terminal history.
    fn trim_terminal(&mut self) {
        let mut terminal: Vec<Uuid> = Vec::new();
        for id in &self.order {
            if let Some(job) = self.jobs.get(id) {
                if job.state.is_terminal() {
                    terminal.push(*id);
                }
            }
        }
        if terminal.len() > MAX_TERMINAL_JOBS {
            let excess = terminal.len() - MAX_TERMINAL_JOBS;
            for id in terminal.into_iter().take(excess) {
                self.remove(&id);
            }
        }
    }
}

/// Broker keeping all jobs in process memory.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<RwLock<QueueState>>,
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("state", &"<RwLock<QueueState>>")
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn enqueue(
        &self,
        name: &str,
        payload: Value,
        opts: JobOptions,
    ) -> Result<EnqueueResult, QueueError> {
        let job = Job::new(name, payload, opts);
        let job_id = job.id;
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job_id) {
            // Caller-supplied id already present: submission is idempotent.
            debug!(job_id = %job_id, "enqueue skipped, job id already known");
            return Ok(EnqueueResult { job_id });
        }
        state.insert(job);
        Ok(EnqueueResult { job_id })
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let state = self.state.read().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn retry_job(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.state != JobState::Failed {
            return Err(QueueError::NotFailed {
                id,
                state: job.state,
            });
        }
        job.state = JobState::Waiting;
        job.attempts_made = 0;
        job.run_at = Utc::now();
        job.started_at = None;
        job.finished_at = None;
        job.result = None;
        Ok(())
    }

    async fn remove_job(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        state.remove(&id).ok_or(QueueError::NotFound(id))?;
        Ok(())
    }

    async fn pause(&self) -> Result<(), QueueError> {
        self.state.write().await.paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<(), QueueError> {
        self.state.write().await.paused = false;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, QueueError> {
        Ok(self.state.read().await.paused)
    }

    async fn clean(
        &self,
        age: Duration,
        count: usize,
        state: JobState,
    ) -> Result<Vec<Uuid>, QueueError> {
        let mut guard = self.state.write().await;
        Ok(guard.prune(state, Some(age), Some(count)))
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.read().await;
        let mut counts = QueueCounts::default();
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn list_jobs(
        &self,
        state: JobState,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, QueueError> {
        let guard = self.state.read().await;
        let jobs = guard
            .recent_in_state(state)
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| guard.jobs.get(&id).cloned())
            .collect();
        Ok(jobs)
    }

    async fn fetch_next(&self) -> Result<Option<Job>, QueueError> {
        let mut guard = self.state.write().await;
        if guard.paused {
            return Ok(None);
        }
        let now = Utc::now();
        let state = &mut *guard;

        for job in state.jobs.values_mut() {
            if job.state == JobState::Delayed && job.run_at <= now {
                job.state = JobState::Waiting;
            }
        }

        let mut best: Option<(Uuid, i32)> = None;
        for id in &state.order {
            if let Some(job) = state.jobs.get(id) {
                if job.state == JobState::Waiting && job.run_at <= now {
                    let priority = job.opts.priority.unwrap_or(0);
                    // Strictly-greater keeps FIFO order within a priority.
                    if best.map_or(true, |(_, current)| priority > current) {
                        best = Some((*id, priority));
                    }
                }
            }
        }

        let Some((id, _)) = best else {
            return Ok(None);
        };
        let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.state = JobState::Active;
        job.attempts_made += 1;
        job.started_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, id: Uuid, result: Value) -> Result<(), QueueError> {
        let mut guard = self.state.write().await;
        let job = guard.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.state = JobState::Completed;
        job.finished_at = Some(Utc::now());
        job.result = Some(result);
        let retention = job.opts.remove_on_complete;
        apply_retention(&mut *guard, JobState::Completed, retention);
        guard.trim_terminal();
        Ok(())
    }

    async fn fail_job(&self, id: Uuid, error: &JobError) -> Result<(), QueueError> {
        let mut guard = self.state.write().await;
        let job = guard.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.last_error = Some(error.to_string());
        job.last_error_code = Some(error.code().to_string());

        let attempt = job.attempts_made;
        if error.is_retryable() && attempt < job.max_attempts() {
            let delay = error
                .retry_after()
                .unwrap_or_else(|| job.opts.backoff.unwrap_or_default().delay_for(attempt));
            job.state = JobState::Delayed;
            job.run_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
            job.started_at = None;
            debug!(job_id = %id, attempt, delay_ms = delay.as_millis() as u64, "job rescheduled");
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(Utc::now());
            let retention = job.opts.remove_on_fail;
            apply_retention(&mut *guard, JobState::Failed, retention);
            guard.trim_terminal();
        }
        Ok(())
    }
}

fn apply_retention(state: &mut QueueState, job_state: JobState, retention: Option<RetentionSpec>) {
    if let Some(spec) = retention {
        state.prune(job_state, spec.age, spec.count);
    }
}

//! Core types shared by the broker interface and the submission client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use conveyor_config::RetentionConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Attempts a job gets when neither the caller nor the handler says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Lifecycle state of a job, as observed through the queue.
///
/// `waiting → active → {completed | failed}`; a failed attempt with budget
/// left passes through `delayed` before becoming `waiting` again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Returns true if this state represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Queue-level backoff growth between attempts of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Backoff contract a job carries into the queue: a kind and a base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSpec {
    pub kind: BackoffKind,
    pub delay: Duration,
}

impl BackoffSpec {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay,
        }
    }

    pub fn exponential(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay,
        }
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for(self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let shift = attempt.saturating_sub(1).min(32);
                let factor = 2u64.saturating_pow(shift);
                Duration::from_millis((self.delay.as_millis() as u64).saturating_mul(factor))
            }
        }
    }
}

impl Default for BackoffSpec {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(2))
    }
}

/// How many terminal jobs to keep, by age and by count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSpec {
    #[serde(default)]
    pub age: Option<Duration>,
    #[serde(default)]
    pub count: Option<usize>,
}

/// Per-submission options; unset fields fall through to handler defaults and
/// then to service-wide retention defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub delay: Option<Duration>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<BackoffSpec>,
    #[serde(default)]
    pub remove_on_complete: Option<RetentionSpec>,
    #[serde(default)]
    pub remove_on_fail: Option<RetentionSpec>,
    #[serde(default)]
    pub job_id: Option<Uuid>,
}

impl JobOptions {
    /// Layer options: explicit call options win over handler defaults, which
    /// win over service-wide retention defaults.
    pub fn layered(
        explicit: Option<JobOptions>,
        handler_defaults: Option<&JobOptions>,
        retention: &RetentionConfig,
    ) -> JobOptions {
        let mut opts = explicit.unwrap_or_default();
        if let Some(defaults) = handler_defaults {
            opts.delay = opts.delay.or(defaults.delay);
            opts.priority = opts.priority.or(defaults.priority);
            opts.max_attempts = opts.max_attempts.or(defaults.max_attempts);
            opts.backoff = opts.backoff.or(defaults.backoff);
            opts.remove_on_complete = opts.remove_on_complete.or(defaults.remove_on_complete);
            opts.remove_on_fail = opts.remove_on_fail.or(defaults.remove_on_fail);
        }
        opts.remove_on_complete = opts.remove_on_complete.or(Some(RetentionSpec {
            age: Some(retention.completed_age),
            count: Some(retention.completed_count),
        }));
        opts.remove_on_fail = opts.remove_on_fail.or(Some(RetentionSpec {
            age: Some(retention.failed_age),
            count: Some(retention.failed_count),
        }));
        opts
    }
}

/// A unit of submitted work as tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    pub opts: JobOptions,
    pub state: JobState,
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest moment the job is eligible for dispatch.
    pub run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_code: Option<String>,
}

impl Job {
    /// Create a new waiting (or delayed) job from submission inputs.
    pub fn new(name: impl Into<String>, payload: Value, opts: JobOptions) -> Self {
        let now = Utc::now();
        let id = opts.job_id.unwrap_or_else(Uuid::new_v4);
        let (state, run_at) = match opts.delay {
            Some(delay) if !delay.is_zero() => (
                JobState::Delayed,
                now + chrono::Duration::milliseconds(delay.as_millis() as i64),
            ),
            _ => (JobState::Waiting, now),
        };
        Self {
            id,
            name: name.into(),
            payload,
            opts,
            state,
            attempts_made: 0,
            created_at: now,
            run_at,
            started_at: None,
            finished_at: None,
            result: None,
            last_error: None,
            last_error_code: None,
        }
    }

    /// Attempt budget, resolved from options.
    pub fn max_attempts(&self) -> u32 {
        self.opts.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Result returned after a job has been enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub job_id: Uuid,
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.delayed + self.active + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_growth() {
        let fixed = BackoffSpec::fixed(Duration::from_millis(100));
        assert_eq!(fixed.delay_for(1), Duration::from_millis(100));
        assert_eq!(fixed.delay_for(5), Duration::from_millis(100));

        let exp = BackoffSpec::exponential(Duration::from_millis(100));
        assert_eq!(exp.delay_for(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for(2), Duration::from_millis(200));
        assert_eq!(exp.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn layering_prefers_explicit_over_handler_defaults() {
        let handler_defaults = JobOptions {
            max_attempts: Some(5),
            priority: Some(1),
            ..Default::default()
        };
        let explicit = JobOptions {
            max_attempts: Some(2),
            ..Default::default()
        };
        let merged = JobOptions::layered(
            Some(explicit),
            Some(&handler_defaults),
            &RetentionConfig::default(),
        );
        assert_eq!(merged.max_attempts, Some(2));
        assert_eq!(merged.priority, Some(1));
    }

    #[test]
    fn layering_fills_retention_from_service_defaults() {
        let merged = JobOptions::layered(None, None, &RetentionConfig::default());
        let on_complete = merged.remove_on_complete.unwrap();
        assert_eq!(on_complete.count, Some(100));
        assert_eq!(on_complete.age, Some(Duration::from_secs(2 * 24 * 60 * 60)));
        let on_fail = merged.remove_on_fail.unwrap();
        assert_eq!(on_fail.count, Some(50));
        assert_eq!(on_fail.age, Some(Duration::from_secs(7 * 24 * 60 * 60)));
    }

    #[test]
    fn delayed_submission_starts_in_delayed_state() {
        let opts = JobOptions {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let job = Job::new("reports.nightly", Value::Null, opts);
        assert_eq!(job.state, JobState::Delayed);
        assert!(job.run_at > job.created_at);
    }

    #[test]
    fn caller_supplied_id_is_respected() {
        let id = Uuid::new_v4();
        let opts = JobOptions {
            job_id: Some(id),
            ..Default::default()
        };
        let job = Job::new("emails.send", Value::Null, opts);
        assert_eq!(job.id, id);
    }
}

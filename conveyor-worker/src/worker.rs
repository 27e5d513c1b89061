//! Worker pool and dispatch loop.
//!
//! One pool is shared across all handler names; jobs are routed by name at
//! dispatch time. Every worker task polls the broker, runs the matching
//! handler under its timeout budget, and reports the outcome back to the
//! broker, which stays the single source of truth for attempt bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyor_config::WorkerSettings;
use conveyor_error::JobError;
use conveyor_queue::{Job, JobBroker};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::registry::HandlerRegistry;

/// Monotonic dispatch counters; the only in-process mutable state shared
/// between concurrent job executions.
#[derive(Debug, Default)]
pub struct WorkerStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Failed attempts, including ones the queue later retried.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// The shared worker pool.
pub struct Worker {
    broker: Arc<dyn JobBroker>,
    registry: Arc<HandlerRegistry>,
    settings: WorkerSettings,
    stats: Arc<WorkerStats>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        registry: HandlerRegistry,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            broker,
            registry: Arc::new(registry),
            settings,
            stats: Arc::new(WorkerStats::default()),
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the pool: one polling task per unit of aggregate concurrency.
    pub fn start(&mut self) {
        let pool_size = self.registry.total_concurrency(self.settings.min_workers);
        for worker_id in 0..pool_size {
            let broker = Arc::clone(&self.broker);
            let registry = Arc::clone(&self.registry);
            let stats = Arc::clone(&self.stats);
            let poll_interval = self.settings.poll_interval;
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(worker_loop(
                worker_id,
                broker,
                registry,
                stats,
                poll_interval,
                shutdown_rx,
            )));
        }
        info!(
            workers = pool_size,
            handlers = self.registry.len(),
            "worker pool started"
        );
    }

    /// Stop accepting dispatches, wait up to the grace period for in-flight
    /// handlers to finish, then force-close whatever is left. Jobs cut off
    /// here may be re-delivered later; handlers must tolerate re-execution.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        let deadline = Instant::now() + self.settings.shutdown_grace;
        let mut aborted = 0usize;
        for task in self.tasks.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let abort = task.abort_handle();
            if tokio::time::timeout(remaining, task).await.is_err() {
                abort.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, "shutdown grace period elapsed, force-closed workers");
        } else {
            info!("worker pool drained");
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    broker: Arc<dyn JobBroker>,
    registry: Arc<HandlerRegistry>,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match broker.fetch_next().await {
            Ok(Some(job)) => {
                let shutting_down = *shutdown_rx.borrow();
                dispatch(broker.as_ref(), &registry, &stats, job, shutting_down).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(err) => {
                warn!(worker_id, error = %err, "failed to fetch next job");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Run one dequeued job through its handler and report the outcome.
async fn dispatch(
    broker: &dyn JobBroker,
    registry: &HandlerRegistry,
    stats: &WorkerStats,
    job: Job,
    shutting_down: bool,
) {
    stats.dispatched.fetch_add(1, Ordering::Relaxed);
    let attempt = job.attempts_made;
    let max_attempts = job.max_attempts();
    let started = Instant::now();

    if shutting_down {
        warn!(job_id = %job.id, job = %job.name, "job refused, worker is shutting down");
        let err = JobError::permanent("worker is shutting down");
        record_failure(broker, stats, &job, &err).await;
        return;
    }

    let Some(registration) = registry.get(&job.name) else {
        error!(job_id = %job.id, job = %job.name, "no processor found for job type");
        let err = JobError::permanent(format!(
            "no processor found for job type '{}'",
            job.name
        ))
        .with_context("job_id", job.id.to_string());
        record_failure(broker, stats, &job, &err).await;
        return;
    };

    let outcome = match registration.options.timeout {
        Some(limit) => match tokio::time::timeout(limit, registration.handler.run(&job)).await {
            Ok(result) => result.map_err(|e| JobError::classify(&*e)),
            // Only the wait is abandoned; the handler's own work keeps
            // running until it next yields and is dropped.
            Err(_) => Err(JobError::timeout(format!(
                "handler for '{}' exceeded {}ms timeout",
                job.name,
                limit.as_millis()
            ))),
        },
        None => registration
            .handler
            .run(&job)
            .await
            .map_err(|e| JobError::classify(&*e)),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(result) => {
            if let Err(err) = broker.complete_job(job.id, result).await {
                error!(job_id = %job.id, error = %err, "failed to record job completion");
            }
            stats.completed.fetch_add(1, Ordering::Relaxed);
            info!(job_id = %job.id, job = %job.name, attempt, elapsed_ms, "job completed");
        }
        Err(classified) => {
            warn!(
                job_id = %job.id,
                job = %job.name,
                attempt,
                max_attempts,
                elapsed_ms,
                code = classified.code(),
                error = %classified,
                "job attempt failed"
            );
            let will_retry = classified.is_retryable() && attempt < max_attempts;
            let hook_result = if will_retry {
                registration
                    .handler
                    .on_retry(&job, attempt, &classified)
                    .await
            } else {
                registration
                    .handler
                    .on_failed(&job, attempt, &classified)
                    .await
            };
            // Callback outcome is logged, never escalated; the handler error
            // below is what the queue records.
            if let Err(hook_err) = hook_result {
                warn!(job_id = %job.id, job = %job.name, error = %hook_err, "handler callback failed");
            }
            record_failure(broker, stats, &job, &classified).await;
        }
    }
}

async fn record_failure(broker: &dyn JobBroker, stats: &WorkerStats, job: &Job, err: &JobError) {
    if let Err(record_err) = broker.fail_job(job.id, err).await {
        error!(job_id = %job.id, error = %record_err, "failed to record job failure");
    }
    stats.failed.fetch_add(1, Ordering::Relaxed);
}

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyor_config::{ConveyorConfig, WorkerSettings};
use conveyor_error::JobError;
use conveyor_queue::{
    BackoffSpec, Job, JobClient, JobState, MemoryBroker,
};
use conveyor_worker::{
    assemble, async_trait, HandlerError, HandlerOptions, HandlerRegistration, JobHandler,
    NoopHandler,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn fast_config() -> ConveyorConfig {
    ConveyorConfig {
        worker: WorkerSettings {
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(2),
            min_workers: 5,
        },
        ..Default::default()
    }
}

/// Poll job state until `pred` holds or the deadline passes.
async fn wait_for_job(client: &JobClient, id: Uuid, pred: fn(&Job) -> bool) -> Job {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = client.job_details(id).await.unwrap();
        if pred(&job) {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} did not reach expected state, last seen: {}",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fails with a network error until `succeed_on_attempt`, then succeeds.
struct FlakyEmailHandler {
    runs: AtomicU32,
    succeed_on_attempt: u32,
    retries_seen: AtomicU32,
    failures_seen: AtomicU32,
}

impl FlakyEmailHandler {
    fn new(succeed_on_attempt: u32) -> Self {
        Self {
            runs: AtomicU32::new(0),
            succeed_on_attempt,
            retries_seen: AtomicU32::new(0),
            failures_seen: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl JobHandler for FlakyEmailHandler {
    fn name(&self) -> &str {
        "send-email"
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if run < self.succeed_on_attempt {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connect ECONNREFUSED 10.0.0.1:25",
            )));
        }
        Ok(json!("sent"))
    }

    async fn on_retry(
        &self,
        _job: &Job,
        _attempt: u32,
        error: &JobError,
    ) -> Result<(), HandlerError> {
        assert!(error.is_retryable());
        self.retries_seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_failed(
        &self,
        _job: &Job,
        _attempt: u32,
        _error: &JobError,
    ) -> Result<(), HandlerError> {
        self.failures_seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn flaky_handler_retries_then_completes() {
    let broker = Arc::new(MemoryBroker::new());
    let handler = Arc::new(FlakyEmailHandler::new(3));

    let registration = HandlerRegistration {
        handler: handler.clone(),
        options: HandlerOptions {
            max_attempts: 3,
            backoff: BackoffSpec::fixed(Duration::from_millis(10)),
            ..Default::default()
        },
    };
    let (mut worker, client) = assemble(broker, vec![registration], &fast_config()).unwrap();
    let stats = worker.stats();
    worker.start();

    let handle = client
        .submit("send-email", json!({"to": "ops@example.com"}), None)
        .await
        .unwrap();

    let job = wait_for_job(&client, handle.id, |j| j.state == JobState::Completed).await;
    assert_eq!(job.attempts_made, 3);
    assert_eq!(job.result, Some(json!("sent")));

    // Two failed attempts retried, the final one succeeded.
    assert_eq!(handler.retries_seen.load(Ordering::SeqCst), 2);
    assert_eq!(handler.failures_seen.load(Ordering::SeqCst), 0);

    // The queue flips to completed just before the counter ticks.
    let deadline = Instant::now() + Duration::from_secs(1);
    while stats.completed() < 1 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(stats.dispatched(), 3);
    assert_eq!(stats.completed(), 1);
    assert_eq!(stats.failed(), 2);

    worker.shutdown().await;
}

#[tokio::test]
async fn unregistered_job_name_fails_distinctly() {
    let broker = Arc::new(MemoryBroker::new());
    let (mut worker, client) = assemble(
        broker,
        vec![HandlerRegistration::new(NoopHandler::new("known.job"))],
        &fast_config(),
    )
    .unwrap();
    worker.start();

    let handle = client.submit("ghost.job", Value::Null, None).await.unwrap();

    let job = wait_for_job(&client, handle.id, |j| j.state == JobState::Failed).await;
    // Configuration defect, not a transient failure: no retries happen.
    assert_eq!(job.attempts_made, 1);
    assert!(job
        .last_error
        .as_deref()
        .unwrap()
        .contains("no processor found for job type"));
    assert_eq!(job.last_error_code.as_deref(), Some("PERMANENT"));

    worker.shutdown().await;
}

struct SlowHandler {
    name: &'static str,
    sleep: Duration,
}

#[async_trait]
impl JobHandler for SlowHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        tokio::time::sleep(self.sleep).await;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn handler_timeout_exhausts_attempts_with_timeout_code() {
    let broker = Arc::new(MemoryBroker::new());
    let registration = HandlerRegistration::new(SlowHandler {
        name: "reports.build",
        sleep: Duration::from_secs(10),
    })
    .with_options(HandlerOptions {
        max_attempts: 2,
        backoff: BackoffSpec::fixed(Duration::from_millis(10)),
        timeout: Some(Duration::from_millis(30)),
        ..Default::default()
    });
    let (mut worker, client) = assemble(broker, vec![registration], &fast_config()).unwrap();
    worker.start();

    let handle = client.submit("reports.build", Value::Null, None).await.unwrap();

    let job = wait_for_job(&client, handle.id, |j| j.state == JobState::Failed).await;
    assert_eq!(job.attempts_made, 2);
    assert_eq!(job.last_error_code.as_deref(), Some("TIMEOUT"));

    worker.shutdown().await;
}

struct RejectingHandler {
    retries_seen: AtomicU32,
    failures_seen: AtomicU32,
}

#[async_trait]
impl JobHandler for RejectingHandler {
    fn name(&self) -> &str {
        "strict.validate"
    }

    async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
        Err(Box::new(JobError::validation("invalid recipient address")))
    }

    async fn on_retry(
        &self,
        _job: &Job,
        _attempt: u32,
        _error: &JobError,
    ) -> Result<(), HandlerError> {
        self.retries_seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_failed(
        &self,
        _job: &Job,
        _attempt: u32,
        error: &JobError,
    ) -> Result<(), HandlerError> {
        assert_eq!(error.code(), "VALIDATION");
        self.failures_seen.fetch_add(1, Ordering::SeqCst);
        // A failing callback must not mask the handler error.
        Err("notification channel down".into())
    }
}

#[tokio::test]
async fn non_retryable_error_fails_terminally_on_first_attempt() {
    let broker = Arc::new(MemoryBroker::new());
    let handler = Arc::new(RejectingHandler {
        retries_seen: AtomicU32::new(0),
        failures_seen: AtomicU32::new(0),
    });
    let registration = HandlerRegistration {
        handler: handler.clone(),
        options: HandlerOptions::default(),
    };
    let (mut worker, client) = assemble(broker, vec![registration], &fast_config()).unwrap();
    worker.start();

    let handle = client.submit("strict.validate", Value::Null, None).await.unwrap();

    let job = wait_for_job(&client, handle.id, |j| j.state == JobState::Failed).await;
    assert_eq!(job.attempts_made, 1);
    assert_eq!(job.last_error_code.as_deref(), Some("VALIDATION"));
    assert_eq!(handler.retries_seen.load(Ordering::SeqCst), 0);
    assert_eq!(handler.failures_seen.load(Ordering::SeqCst), 1);

    worker.shutdown().await;
}

#[tokio::test]
async fn pool_runs_jobs_concurrently() {
    static IN_FLIGHT: AtomicU32 = AtomicU32::new(0);
    static MAX_IN_FLIGHT: AtomicU32 = AtomicU32::new(0);

    struct ParallelProbe;

    #[async_trait]
    impl JobHandler for ParallelProbe {
        fn name(&self) -> &str {
            "probe.parallel"
        }

        async fn run(&self, _job: &Job) -> Result<Value, HandlerError> {
            let current = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
            MAX_IN_FLIGHT.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    let broker = Arc::new(MemoryBroker::new());
    let registration = HandlerRegistration::new(ParallelProbe).with_options(HandlerOptions {
        concurrency: 3,
        ..Default::default()
    });
    let (mut worker, client) = assemble(broker, vec![registration], &fast_config()).unwrap();
    worker.start();

    let mut handles = Vec::new();
    for _ in 0..3 {
        handles.push(client.submit("probe.parallel", Value::Null, None).await.unwrap());
    }
    for handle in handles {
        wait_for_job(&client, handle.id, |j| j.state == JobState::Completed).await;
    }
    assert!(MAX_IN_FLIGHT.load(Ordering::SeqCst) >= 2);

    worker.shutdown().await;
}

#[tokio::test]
async fn shutdown_force_closes_after_grace_period() {
    let broker = Arc::new(MemoryBroker::new());
    let registration = HandlerRegistration::new(SlowHandler {
        name: "glacial.job",
        sleep: Duration::from_secs(30),
    });
    let config = ConveyorConfig {
        worker: WorkerSettings {
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(100),
            min_workers: 5,
        },
        ..Default::default()
    };
    let (mut worker, client) = assemble(broker, vec![registration], &config).unwrap();
    worker.start();

    client.submit("glacial.job", Value::Null, None).await.unwrap();
    // Give a worker time to pick the job up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    worker.shutdown().await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "shutdown did not force-close within the grace period"
    );
}

#[tokio::test]
async fn idle_pool_drains_cleanly() {
    let broker = Arc::new(MemoryBroker::new());
    let (mut worker, _client) = assemble(
        broker,
        vec![HandlerRegistration::new(NoopHandler::new("idle.job"))],
        &fast_config(),
    )
    .unwrap();
    worker.start();

    let started = Instant::now();
    worker.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

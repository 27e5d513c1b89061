//! Handler registry, dispatcher and worker pool for the conveyor engine.
//!
//! Application startup code assembles an explicit registration table of
//! [`JobHandler`] implementations, builds a [`HandlerRegistry`] from it, and
//! starts a [`Worker`] pool against a broker. The pool size is the sum of
//! per-handler concurrency weights, floored so sparse deployments still make
//! progress.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conveyor_config::ConveyorConfig;
//! use conveyor_queue::{Job, MemoryBroker};
//! use conveyor_worker::{assemble, HandlerError, HandlerRegistration, JobHandler, async_trait};
//! use serde_json::Value;
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl JobHandler for SendEmail {
//!     fn name(&self) -> &str {
//!         "emails.send"
//!     }
//!
//!     async fn run(&self, job: &Job) -> Result<Value, HandlerError> {
//!         println!("sending email: {}", job.payload);
//!         Ok(Value::Null)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = Arc::new(MemoryBroker::new());
//!     let config = ConveyorConfig::default();
//!     let (mut worker, client) = assemble(
//!         broker,
//!         vec![HandlerRegistration::new(SendEmail)],
//!         &config,
//!     )
//!     .unwrap();
//!
//!     worker.start();
//!     client
//!         .submit("emails.send", serde_json::json!({"to": "ops@example.com"}), None)
//!         .await
//!         .unwrap();
//!     // ... later
//!     worker.shutdown().await;
//! }
//! ```

mod error;
mod handler;
mod registry;
mod worker;

pub use error::WorkerError;
pub use handler::{HandlerError, JobHandler, NoopHandler};
pub use registry::{HandlerOptions, HandlerRegistration, HandlerRegistry};
pub use worker::{Worker, WorkerStats};

use std::sync::Arc;

use conveyor_config::ConveyorConfig;
use conveyor_queue::{JobBroker, JobClient};

// Re-export async_trait for convenience when implementing JobHandler.
pub use async_trait::async_trait;

/// Construct the registry, submission client and worker pool in one pass.
///
/// Two-phase wiring: the registry is built first, its submit defaults are
/// handed to the client, and both sides afterwards share only the broker
/// handle.
pub fn assemble(
    broker: Arc<dyn JobBroker>,
    registrations: Vec<HandlerRegistration>,
    config: &ConveyorConfig,
) -> Result<(Worker, JobClient), WorkerError> {
    let registry = HandlerRegistry::new(registrations)?;
    let client = JobClient::new(Arc::clone(&broker), config.retention.clone())
        .with_handler_defaults(registry.submit_defaults());
    let worker = Worker::new(broker, registry, config.worker.clone());
    Ok((worker, client))
}

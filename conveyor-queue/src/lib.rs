//! Queue surface of the conveyor engine.
//!
//! This crate defines the types a job carries through its lifetime, the
//! [`JobBroker`] contract the engine consumes from the durable queue, an
//! in-memory broker so the engine can be wired together and exercised without
//! real queue infrastructure, and the [`JobClient`] submission service.
//!
//! # Architecture
//!
//! - [`JobBroker`] - The delivery and administration contract of the queue
//! - [`MemoryBroker`] - In-process implementation of that contract
//! - [`JobClient`] - Application-facing submission and admin API
//! - [`Job`] / [`JobOptions`] / [`JobState`] - The job data model
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conveyor_config::RetentionConfig;
//! use conveyor_queue::{JobClient, MemoryBroker};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = Arc::new(MemoryBroker::new());
//!     let client = JobClient::new(broker, RetentionConfig::default());
//!
//!     let handle = client
//!         .submit("emails.send", json!({"to": "ops@example.com"}), None)
//!         .await
//!         .unwrap();
//!     println!("submitted job {}", handle.id);
//! }
//! ```

mod broker;
mod client;
mod error;
mod memory;
mod types;

pub use broker::JobBroker;
pub use client::{
    CleanOptions, CleanReport, JobClient, JobHandle, QueueMetrics, RetryBatchReport,
};
pub use error::QueueError;
pub use memory::MemoryBroker;
pub use types::{
    BackoffKind, BackoffSpec, EnqueueResult, Job, JobOptions, JobState, QueueCounts,
    RetentionSpec, DEFAULT_MAX_ATTEMPTS,
};

// Re-export async_trait for convenience when implementing JobBroker.
pub use async_trait::async_trait;

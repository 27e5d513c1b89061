//! Handler registry.
//!
//! Registrations are assembled explicitly by application startup code and
//! passed to [`HandlerRegistry::new`] once. The registry is immutable after
//! construction and shared read-only by every worker, so concurrent
//! dispatches need no locking around it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use conveyor_queue::{BackoffKind, BackoffSpec, JobOptions};
use conveyor_retry::{BackoffStrategy, RetryPolicy};

use crate::error::WorkerError;
use crate::handler::JobHandler;

/// Per-handler execution options declared at registration time.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Weight this handler contributes to the shared pool size.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: BackoffSpec,
    /// Per-attempt budget; expiry abandons the wait, it does not cancel the
    /// handler's underlying work.
    pub timeout: Option<Duration>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_attempts: conveyor_queue::DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffSpec::default(),
            timeout: None,
        }
    }
}

impl HandlerOptions {
    /// Derive attempt budget and queue-level backoff from a retry profile.
    /// Fixed stays fixed; every growing strategy maps to the queue's
    /// exponential backoff on the profile's base delay.
    pub fn from_profile(policy: &RetryPolicy) -> Self {
        let kind = match policy.strategy {
            BackoffStrategy::Fixed => BackoffKind::Fixed,
            _ => BackoffKind::Exponential,
        };
        Self {
            max_attempts: policy.max_attempts,
            backoff: BackoffSpec {
                kind,
                delay: policy.base_delay,
            },
            ..Self::default()
        }
    }
}

/// One entry in the registration table.
pub struct HandlerRegistration {
    pub handler: Arc<dyn JobHandler>,
    pub options: HandlerOptions,
}

impl HandlerRegistration {
    pub fn new<H: JobHandler + 'static>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            options: HandlerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Immutable name-to-handler map built once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerRegistration>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Build the registry from an explicit registration table.
    ///
    /// Zero registrations means every submitted job would be undeliverable,
    /// so it is rejected as a fatal misconfiguration rather than ignored.
    pub fn new(registrations: Vec<HandlerRegistration>) -> Result<Self, WorkerError> {
        if registrations.is_empty() {
            return Err(WorkerError::NoHandlers);
        }
        let mut handlers = HashMap::with_capacity(registrations.len());
        for registration in registrations {
            let name = registration.handler.name().to_owned();
            if handlers.insert(name.clone(), registration).is_some() {
                return Err(WorkerError::DuplicateHandler(name));
            }
        }
        Ok(Self { handlers })
    }

    pub fn get(&self, name: &str) -> Option<&HandlerRegistration> {
        self.handlers.get(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Pool size: the sum of per-handler concurrency weights, floored so a
    /// sparse deployment still makes progress.
    pub fn total_concurrency(&self, floor: usize) -> usize {
        let sum: usize = self
            .handlers
            .values()
            .map(|r| r.options.concurrency)
            .sum();
        sum.max(floor)
    }

    /// Per-handler submit defaults, exported for wiring into the submission
    /// client without the client ever seeing this type.
    pub fn submit_defaults(&self) -> HashMap<String, JobOptions> {
        self.handlers
            .iter()
            .map(|(name, registration)| {
                (
                    name.clone(),
                    JobOptions {
                        max_attempts: Some(registration.options.max_attempts),
                        backoff: Some(registration.options.backoff),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }
}

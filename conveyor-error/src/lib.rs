//! Failure taxonomy for conveyor jobs.
//!
//! Handlers raise heterogeneous error types, and the dispatcher needs one
//! uniform answer to "is this failure worth another attempt". [`JobError`] is
//! that answer: a kind drawn from a fixed taxonomy, a stable code, a retryable
//! flag, and free-form context for diagnostics.
//!
//! [`JobError::classify`] maps an arbitrary error into the taxonomy. An error
//! that is already a [`JobError`] passes through unchanged; anything else is
//! matched against ordered message patterns, with [`ErrorKind::Transient`] as
//! the fallback so unknown failures stay eligible for retry.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The failure kinds understood by the engine.
///
/// Every kind carries a fixed retryable flag; policy layers can still narrow
/// retry eligibility per code, but they never widen it past the kind's flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Network,
    Database,
    Validation,
    ExternalService,
    RateLimit,
    Timeout,
    BusinessLogic,
    ResourceNotFound,
    InsufficientResources,
}

impl ErrorKind {
    /// Stable machine-readable code, used by retry policies to match errors.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::Permanent => "PERMANENT",
            Self::Network => "NETWORK",
            Self::Database => "DATABASE",
            Self::Validation => "VALIDATION",
            Self::ExternalService => "EXTERNAL_SERVICE",
            Self::RateLimit => "RATE_LIMIT",
            Self::Timeout => "TIMEOUT",
            Self::BusinessLogic => "BUSINESS_LOGIC",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::InsufficientResources => "INSUFFICIENT_RESOURCES",
        }
    }

    /// Whether failures of this kind are eligible for another attempt.
    pub const fn is_retryable(self) -> bool {
        match self {
            Self::Transient
            | Self::Network
            | Self::Database
            | Self::ExternalService
            | Self::RateLimit
            | Self::Timeout
            | Self::InsufficientResources => true,
            Self::Permanent
            | Self::Validation
            | Self::BusinessLogic
            | Self::ResourceNotFound => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified job failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct JobError {
    kind: ErrorKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_after: Option<Duration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    context: BTreeMap<String, String>,
}

impl JobError {
    /// Create an error of an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            context: BTreeMap::new(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, message)
    }

    /// Rate-limit rejection, optionally carrying the delay the remote side
    /// asked us to wait before the next attempt.
    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimit, message)
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn business_logic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessLogic, message)
    }

    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, message)
    }

    pub fn insufficient_resources(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientResources, message)
    }

    /// Attach a diagnostic key/value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Delay suggested by the failure itself (rate-limit responses).
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Map an arbitrary error into the taxonomy.
    ///
    /// A [`JobError`] passes through unchanged so handler-supplied
    /// classifications are never second-guessed.
    pub fn classify(err: &(dyn StdError + Send + Sync + 'static)) -> Self {
        if let Some(job_err) = err.downcast_ref::<JobError>() {
            return job_err.clone();
        }
        Self::from_message(&err.to_string())
    }

    /// Classify a rendered error message via the ordered pattern rules.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if CONNECTION_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::network(message);
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::timeout(message);
        }
        if lower.contains("429") || lower.contains("rate limit") {
            return Self::rate_limit(message, None);
        }
        if DATABASE_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::database(message);
        }
        if VALIDATION_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::validation(message);
        }
        Self::transient(message)
    }
}

/// Connection-level failure patterns, checked before everything else.
const CONNECTION_PATTERNS: &[&str] = &[
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "etimedout",
    "ehostunreach",
    "enetunreach",
    "unreachable",
    "socket hang up",
];

const DATABASE_PATTERNS: &[&str] = &["database", "sql", "query", "deadlock", "constraint"];

const VALIDATION_PATTERNS: &[&str] = &["validation", "invalid", "required", "missing"];

/// Reduced pattern set for the fast retryability heuristic.
const RETRYABLE_HINTS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "etimedout",
    "connection",
    "timeout",
    "timed out",
    "network",
    "429",
    "500",
    "502",
    "503",
    "504",
];

/// Fast retry-eligibility check without full classification.
///
/// Returns the classified flag when the error is already a [`JobError`],
/// otherwise matches the reduced hint set against the rendered message.
pub fn is_retryable_error(err: &(dyn StdError + Send + Sync + 'static)) -> bool {
    if let Some(job_err) = err.downcast_ref::<JobError>() {
        return job_err.is_retryable();
    }
    let lower = err.to_string().to_ascii_lowercase();
    RETRYABLE_HINTS.iter().any(|h| lower.contains(h))
}

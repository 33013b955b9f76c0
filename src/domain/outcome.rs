//! Per-target, per-backend invalidation outcomes.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use url::Url;
use uuid::Uuid;

use super::target::InvalidationTarget;

/// Result class of a single invalidation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStatus {
    /// The representation was evicted, or there was nothing to evict.
    Success,
    /// The backend reports the entry was not cached. Benign.
    NotFound,
    /// Likely to succeed on retry.
    TransientFailure,
    /// Will not succeed regardless of retries.
    PermanentFailure,
}

impl InvalidationStatus {
    pub const ALL: [InvalidationStatus; 4] = [
        InvalidationStatus::Success,
        InvalidationStatus::NotFound,
        InvalidationStatus::TransientFailure,
        InvalidationStatus::PermanentFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvalidationStatus::Success => "success",
            InvalidationStatus::NotFound => "not_found",
            InvalidationStatus::TransientFailure => "transient_failure",
            InvalidationStatus::PermanentFailure => "permanent_failure",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, InvalidationStatus::TransientFailure)
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            InvalidationStatus::TransientFailure | InvalidationStatus::PermanentFailure
        )
    }
}

impl fmt::Display for InvalidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome for one (target, backend) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationOutcome {
    pub target: InvalidationTarget,
    pub backend_name: String,
    pub status: InvalidationStatus,
    /// Number of calls made, at least one.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl InvalidationOutcome {
    /// Outcome of a single call; the dispatcher fills in the attempt count.
    pub fn new(
        target: &InvalidationTarget,
        backend_name: impl Into<String>,
        status: InvalidationStatus,
        last_error: Option<String>,
    ) -> Self {
        Self {
            target: target.clone(),
            backend_name: backend_name.into(),
            status,
            attempts: 1,
            last_error,
        }
    }

    pub fn success(target: &InvalidationTarget, backend_name: impl Into<String>) -> Self {
        Self::new(target, backend_name, InvalidationStatus::Success, None)
    }

    pub fn not_found(target: &InvalidationTarget, backend_name: impl Into<String>) -> Self {
        Self::new(target, backend_name, InvalidationStatus::NotFound, None)
    }

    pub fn transient(
        target: &InvalidationTarget,
        backend_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            target,
            backend_name,
            InvalidationStatus::TransientFailure,
            Some(error.into()),
        )
    }

    pub fn permanent(
        target: &InvalidationTarget,
        backend_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            target,
            backend_name,
            InvalidationStatus::PermanentFailure,
            Some(error.into()),
        )
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

/// A (target, backend) pair whose call was abandoned by cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedPair {
    pub url: Url,
    pub backend_name: String,
}

/// Everything one dispatch produced for one change event.
///
/// Outcomes are ordered target-major, backend-minor: for each affected URL in
/// resolution order, one outcome per backend in configuration order.
#[derive(Debug, Clone)]
pub struct InvalidationResult {
    pub event_id: Uuid,
    pub content_id: String,
    pub outcomes: Vec<InvalidationOutcome>,
    pub abandoned: Vec<AbandonedPair>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl InvalidationResult {
    /// Number of outcomes with the given status for the given backend.
    pub fn count(&self, backend_name: &str, status: InvalidationStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.backend_name == backend_name && outcome.status == status)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.status.is_failure())
    }

    /// True when every pair produced an outcome.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.abandoned.is_empty()
    }

    pub fn outcome(&self, url: &str, backend_name: &str) -> Option<&InvalidationOutcome> {
        self.outcomes.iter().find(|outcome| {
            outcome.target.url().as_str() == url && outcome.backend_name == backend_name
        })
    }
}

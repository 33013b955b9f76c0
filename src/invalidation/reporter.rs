//! Outcome reporting: the single place where invalidation failures become
//! operator-visible, through structured logs and metrics.

use std::collections::BTreeMap;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{InvalidationResult, InvalidationStatus, ResolutionError};

pub(crate) const METRIC_OUTCOMES_TOTAL: &str = "evictor_invalidation_outcomes_total";
pub(crate) const METRIC_ATTEMPTS_TOTAL: &str = "evictor_invalidation_attempts_total";
pub(crate) const METRIC_DISPATCH_MS: &str = "evictor_dispatch_ms";
pub(crate) const METRIC_RESOLUTION_REJECTED_TOTAL: &str = "evictor_resolution_rejected_total";

/// Outcome counts for one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendCounts {
    pub success: usize,
    pub not_found: usize,
    pub transient_failure: usize,
    pub permanent_failure: usize,
    pub attempts: u64,
}

impl BackendCounts {
    fn record(&mut self, status: InvalidationStatus, attempts: u32) {
        match status {
            InvalidationStatus::Success => self.success += 1,
            InvalidationStatus::NotFound => self.not_found += 1,
            InvalidationStatus::TransientFailure => self.transient_failure += 1,
            InvalidationStatus::PermanentFailure => self.permanent_failure += 1,
        }
        self.attempts += u64::from(attempts);
    }

    pub fn failures(&self) -> usize {
        self.transient_failure + self.permanent_failure
    }
}

/// Aggregated view of an [`InvalidationResult`].
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    pub event_id: Uuid,
    pub content_id: String,
    pub targets: usize,
    pub backends: BTreeMap<String, BackendCounts>,
    pub abandoned: usize,
    pub cancelled: bool,
    pub elapsed_ms: f64,
}

impl OutcomeSummary {
    pub fn from_result(result: &InvalidationResult) -> Self {
        let mut backends: BTreeMap<String, BackendCounts> = BTreeMap::new();
        let mut targets = Vec::new();

        for outcome in &result.outcomes {
            backends
                .entry(outcome.backend_name.clone())
                .or_default()
                .record(outcome.status, outcome.attempts);
            if !targets.contains(&outcome.target.url()) {
                targets.push(outcome.target.url());
            }
        }
        for pair in &result.abandoned {
            backends.entry(pair.backend_name.clone()).or_default();
        }

        Self {
            event_id: result.event_id,
            content_id: result.content_id.clone(),
            targets: targets.len(),
            backends,
            abandoned: result.abandoned.len(),
            cancelled: result.cancelled,
            elapsed_ms: result.elapsed.as_secs_f64() * 1000.0,
        }
    }

    pub fn failures(&self) -> usize {
        self.backends.values().map(BackendCounts::failures).sum()
    }
}

/// Emits logs and metrics for dispatch results. Never alters the result.
#[derive(Debug, Clone, Default)]
pub struct OutcomeReporter;

impl OutcomeReporter {
    pub fn new() -> Self {
        Self
    }

    /// Record one dispatch result and return its summary.
    pub fn report(&self, result: &InvalidationResult) -> OutcomeSummary {
        for outcome in &result.outcomes {
            counter!(
                METRIC_OUTCOMES_TOTAL,
                "backend" => outcome.backend_name.clone(),
                "status" => outcome.status.as_str()
            )
            .increment(1);
            counter!(METRIC_ATTEMPTS_TOTAL, "backend" => outcome.backend_name.clone())
                .increment(u64::from(outcome.attempts));

            if outcome.status.is_failure() {
                warn!(
                    target = "evictor::invalidation",
                    event_id = %result.event_id,
                    url = %outcome.target.url(),
                    backend = %outcome.backend_name,
                    status = %outcome.status,
                    attempts = outcome.attempts,
                    error = outcome.last_error.as_deref().unwrap_or(""),
                    "Invalidation failed"
                );
            }
        }

        for pair in &result.abandoned {
            warn!(
                target = "evictor::invalidation",
                event_id = %result.event_id,
                url = %pair.url,
                backend = %pair.backend_name,
                "Invalidation abandoned by cancellation"
            );
        }

        histogram!(METRIC_DISPATCH_MS).record(result.elapsed.as_secs_f64() * 1000.0);

        let summary = OutcomeSummary::from_result(result);
        for (backend, counts) in &summary.backends {
            info!(
                target = "evictor::invalidation",
                event_id = %summary.event_id,
                content_id = %summary.content_id,
                backend = %backend,
                success = counts.success,
                not_found = counts.not_found,
                transient_failure = counts.transient_failure,
                permanent_failure = counts.permanent_failure,
                attempts = counts.attempts,
                "Invalidation outcomes"
            );
        }
        info!(
            target = "evictor::invalidation",
            event_id = %summary.event_id,
            content_id = %summary.content_id,
            targets = summary.targets,
            failures = summary.failures(),
            abandoned = summary.abandoned,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed_ms,
            "Dispatch complete"
        );

        summary
    }

    /// Record an event rejected before dispatch.
    pub fn report_rejected(&self, content_id: &str, content_url: &str, error: &ResolutionError) {
        counter!(METRIC_RESOLUTION_REJECTED_TOTAL).increment(1);
        error!(
            target = "evictor::invalidation",
            content_id,
            content_url,
            error = %error,
            "Change event rejected before dispatch"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::domain::{AbandonedPair, InvalidationOutcome, InvalidationTarget};

    fn target(raw: &str) -> InvalidationTarget {
        InvalidationTarget::new(Url::parse(raw).expect("valid url"))
    }

    fn sample() -> InvalidationResult {
        let post = target("https://site.example/post-42");
        let home = target("https://site.example/");
        InvalidationResult {
            event_id: Uuid::new_v4(),
            content_id: "42".to_string(),
            outcomes: vec![
                InvalidationOutcome::success(&post, "edge"),
                InvalidationOutcome::transient(&post, "kv", "connection refused").with_attempts(3),
                InvalidationOutcome::not_found(&home, "edge"),
                InvalidationOutcome::permanent(&home, "kv", "store unavailable"),
            ],
            abandoned: Vec::new(),
            cancelled: false,
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn summary_counts_per_backend() {
        let summary = OutcomeSummary::from_result(&sample());

        assert_eq!(summary.targets, 2);
        let edge = &summary.backends["edge"];
        assert_eq!(edge.success, 1);
        assert_eq!(edge.not_found, 1);
        assert_eq!(edge.failures(), 0);
        let kv = &summary.backends["kv"];
        assert_eq!(kv.transient_failure, 1);
        assert_eq!(kv.permanent_failure, 1);
        assert_eq!(kv.attempts, 4);
        assert_eq!(summary.failures(), 2);
        assert!((summary.elapsed_ms - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn abandoned_backends_still_appear_in_summary() {
        let mut result = sample();
        result.cancelled = true;
        result.abandoned.push(AbandonedPair {
            url: Url::parse("https://site.example/feed/").expect("valid url"),
            backend_name: "cdn".to_string(),
        });

        let summary = OutcomeSummary::from_result(&result);
        assert_eq!(summary.abandoned, 1);
        assert!(summary.cancelled);
        assert_eq!(summary.backends["cdn"], BackendCounts::default());
    }

    #[test]
    fn report_does_not_alter_result() {
        let result = sample();
        let before = result.outcomes.clone();
        let summary = OutcomeReporter::new().report(&result);

        assert_eq!(result.outcomes, before);
        assert_eq!(summary.content_id, "42");
    }

    #[test]
    fn summary_serializes_with_backend_map() {
        let summary = OutcomeSummary::from_result(&sample());
        let json = serde_json::to_value(&summary).expect("summary serializes");
        assert_eq!(json["backends"]["kv"]["transient_failure"], 1);
        assert_eq!(json["content_id"], "42");
    }
}

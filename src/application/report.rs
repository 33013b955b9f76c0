//! JSON view of a handled change, shared by the webhook and the `purge` command.

use serde::Serialize;

use crate::domain::{InvalidationOutcome, InvalidationStatus};
use crate::invalidation::{OutcomeSummary, Triggered};

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeView {
    pub url: String,
    pub backend: String,
    pub status: InvalidationStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&InvalidationOutcome> for OutcomeView {
    fn from(outcome: &InvalidationOutcome) -> Self {
        Self {
            url: outcome.target.url().to_string(),
            backend: outcome.backend_name.clone(),
            status: outcome.status,
            attempts: outcome.attempts,
            last_error: outcome.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AbandonedView {
    pub url: String,
    pub backend: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    #[serde(flatten)]
    pub summary: OutcomeSummary,
    pub outcomes: Vec<OutcomeView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub abandoned_pairs: Vec<AbandonedView>,
}

impl DispatchReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failures() > 0 || self.summary.abandoned > 0
    }
}

impl From<&Triggered> for DispatchReport {
    fn from(triggered: &Triggered) -> Self {
        Self {
            summary: triggered.summary.clone(),
            outcomes: triggered
                .result
                .outcomes
                .iter()
                .map(OutcomeView::from)
                .collect(),
            abandoned_pairs: triggered
                .result
                .abandoned
                .iter()
                .map(|pair| AbandonedView {
                    url: pair.url.to_string(),
                    backend: pair.backend_name.clone(),
                })
                .collect(),
        }
    }
}

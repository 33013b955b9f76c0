//! Backend adapter contract.
//!
//! One adapter per cache technology. Adapters are built once at startup,
//! check their own availability at construction, and are handed to the
//! dispatcher explicitly.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{InvalidationOutcome, InvalidationTarget};

/// Whether an adapter's transport tolerates concurrent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Calls may run in parallel (pooled or multiplexed transport).
    #[default]
    Shared,
    /// The dispatcher runs at most one call at a time for this adapter.
    Serialized,
}

/// What happens to an adapter's in-flight calls when a dispatch is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelPolicy {
    /// Abort in-flight calls; their pairs are reported as abandoned.
    #[default]
    Abandon,
    /// Let in-flight calls (and their retries) run to completion.
    Finish,
}

/// Uniform invalidation contract implemented by every cache backend.
///
/// `invalidate` must not fail out-of-band: every failure is reported as a
/// [`InvalidationOutcome`] with a transient or permanent status. The returned
/// outcome describes a single call; the dispatcher owns the attempt count.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Stable name used in outcomes, logs and metric labels.
    fn name(&self) -> &str;

    fn concurrency(&self) -> Concurrency {
        Concurrency::Shared
    }

    fn cancel_policy(&self) -> CancelPolicy {
        CancelPolicy::Abandon
    }

    async fn invalidate(&self, target: &InvalidationTarget) -> InvalidationOutcome;
}

pub type SharedBackend = Arc<dyn BackendAdapter>;

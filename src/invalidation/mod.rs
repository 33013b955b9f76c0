//! Cache invalidation core.
//!
//! A content change flows through four stages:
//!
//! - **Resolver**: maps `(content_id, content_url)` to the ordered set of stale URLs
//! - **Dispatcher**: invokes every backend adapter for every URL, with retries
//! - **Backends**: one adapter per cache technology (see `infra::edge`, `infra::kv`)
//! - **Reporter**: turns the joined result into logs and metrics
//!
//! ## Configuration
//!
//! Retry and timeout behaviour is controlled via `evictor.toml`:
//!
//! ```toml
//! [dispatch]
//! retry_max_attempts = 3
//! retry_backoff_base_ms = 200
//! call_timeout_ms = 3000
//! ```

mod backend;
mod config;
mod dispatcher;
mod reporter;
mod resolver;
mod retry;
mod trigger;

pub use backend::{BackendAdapter, CancelPolicy, Concurrency, SharedBackend};
pub use config::DispatchConfig;
pub use dispatcher::InvalidationDispatcher;
pub use reporter::{BackendCounts, OutcomeReporter, OutcomeSummary};
pub use resolver::{DerivedUrlRule, TargetResolver};
pub use retry::RetryPolicy;
pub use trigger::{InvalidationTrigger, Triggered};

pub(crate) use config::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_BASE_MS, DEFAULT_RETRY_BACKOFF_MAX_MS,
    DEFAULT_RETRY_MAX_ATTEMPTS,
};
pub(crate) use resolver::ensure_web_url;
pub(crate) use reporter::{
    METRIC_ATTEMPTS_TOTAL, METRIC_DISPATCH_MS, METRIC_OUTCOMES_TOTAL,
    METRIC_RESOLUTION_REJECTED_TOTAL,
};

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::invalidation::{
    METRIC_ATTEMPTS_TOTAL, METRIC_DISPATCH_MS, METRIC_OUTCOMES_TOTAL,
    METRIC_RESOLUTION_REJECTED_TOTAL,
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_OUTCOMES_TOTAL,
            Unit::Count,
            "Final invalidation outcomes, labelled by backend and status."
        );
        describe_counter!(
            METRIC_ATTEMPTS_TOTAL,
            Unit::Count,
            "Backend calls made, including retries, labelled by backend."
        );
        describe_counter!(
            METRIC_RESOLUTION_REJECTED_TOTAL,
            Unit::Count,
            "Change events rejected before dispatch."
        );
        describe_histogram!(
            METRIC_DISPATCH_MS,
            Unit::Milliseconds,
            "Total dispatch latency per change event in milliseconds."
        );
    });
}

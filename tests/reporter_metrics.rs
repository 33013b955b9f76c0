use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evictor::domain::{InvalidationOutcome, InvalidationTarget};
use evictor::invalidation::{
    BackendAdapter, InvalidationDispatcher, InvalidationTrigger, OutcomeReporter, RetryPolicy,
    SharedBackend, TargetResolver,
};
use metrics_util::debugging::DebuggingRecorder;
use url::Url;

struct RefusingBackend;

#[async_trait]
impl BackendAdapter for RefusingBackend {
    fn name(&self) -> &str {
        "edge"
    }

    async fn invalidate(&self, target: &InvalidationTarget) -> InvalidationOutcome {
        InvalidationOutcome::permanent(target, "edge", "purge returned 403 Forbidden")
    }
}

#[tokio::test]
async fn dispatch_and_rejection_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let backends: Vec<SharedBackend> = vec![Arc::new(RefusingBackend)];
    let trigger = InvalidationTrigger::new(
        TargetResolver::new(
            Url::parse("https://site.example/").expect("valid url"),
            Vec::new(),
        ),
        InvalidationDispatcher::with_policy(
            RetryPolicy::no_retry(),
            Duration::from_secs(1),
            backends,
        ),
        OutcomeReporter::new(),
    );

    let triggered = trigger
        .content_saved("42", "https://site.example/post-42")
        .await
        .expect("event resolves");
    assert_eq!(triggered.summary.failures(), 2);

    trigger
        .content_saved("43", "")
        .await
        .expect_err("empty url rejected");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "evictor_invalidation_outcomes_total",
        "evictor_invalidation_attempts_total",
        "evictor_dispatch_ms",
        "evictor_resolution_rejected_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}

use axum::{Json, extract::State, http::StatusCode};

use crate::application::error::HttpError;
use crate::application::report::DispatchReport;
use crate::domain::ChangeNotice;

use super::HttpState;

pub(super) async fn health() -> StatusCode {
    StatusCode::OK
}

/// `POST /hooks/content`: resolve, dispatch and report one change.
///
/// The pipeline runs on its own task so a client that hangs up early does
/// not abort the dispatch or skip its report.
pub(super) async fn content_changed(
    State(state): State<HttpState>,
    Json(notice): Json<ChangeNotice>,
) -> Result<Json<DispatchReport>, HttpError> {
    let trigger = state.trigger.clone();
    let triggered = tokio::spawn(async move { trigger.notify(&notice).await })
        .await
        .map_err(|err| {
            HttpError::internal(
                "infra::http::webhook::content_changed",
                format!("dispatch task failed: {err}"),
            )
        })??;
    Ok(Json(DispatchReport::from(&triggered)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::Value;
    use tower::ServiceExt;
    use url::Url;

    use super::super::{HttpState, build_router};
    use crate::domain::{InvalidationOutcome, InvalidationStatus, InvalidationTarget};
    use crate::invalidation::{
        BackendAdapter, InvalidationDispatcher, InvalidationTrigger, OutcomeReporter,
        RetryPolicy, SharedBackend, TargetResolver,
    };

    struct FixedBackend {
        name: &'static str,
        status: InvalidationStatus,
        calls: AtomicU32,
    }

    impl FixedBackend {
        fn new(name: &'static str, status: InvalidationStatus) -> Arc<Self> {
            Arc::new(Self {
                name,
                status,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendAdapter for FixedBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn invalidate(&self, target: &InvalidationTarget) -> InvalidationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let error = self.status.is_failure().then(|| "scripted".to_string());
            InvalidationOutcome::new(target, self.name, self.status, error)
        }
    }

    struct SlowBackend {
        delay: Duration,
        started: AtomicU32,
        finished: AtomicU32,
    }

    #[async_trait]
    impl BackendAdapter for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invalidate(&self, target: &InvalidationTarget) -> InvalidationOutcome {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            InvalidationOutcome::new(target, "slow", InvalidationStatus::Success, None)
        }
    }

    fn router(backends: Vec<SharedBackend>, token: Option<&str>) -> axum::Router {
        let resolver = TargetResolver::new(
            Url::parse("https://site.example/").expect("valid url"),
            Vec::new(),
        );
        let dispatcher = InvalidationDispatcher::with_policy(
            RetryPolicy::no_retry(),
            Duration::from_secs(1),
            backends,
        );
        let trigger = Arc::new(InvalidationTrigger::new(
            resolver,
            dispatcher,
            OutcomeReporter::new(),
        ));
        build_router(HttpState::new(trigger, token.map(str::to_string)))
    }

    fn hook_request(body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/hooks/content")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = router(Vec::new(), None)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn hook_dispatches_and_reports_outcomes() {
        let edge = FixedBackend::new("edge", InvalidationStatus::Success);
        let kv = FixedBackend::new("kv", InvalidationStatus::NotFound);
        let app = router(vec![edge.clone(), kv.clone()], None);

        let response = app
            .oneshot(hook_request(
                r#"{"content_id":"42","content_url":"https://site.example/post-42","action":"deleted"}"#,
                None,
            ))
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["content_id"], "42");
        assert_eq!(body["targets"], 2);
        assert_eq!(body["backends"]["edge"]["success"], 2);
        assert_eq!(body["backends"]["kv"]["not_found"], 2);
        assert_eq!(body["outcomes"].as_array().map(Vec::len), Some(4));
        assert_eq!(body["outcomes"][0]["url"], "https://site.example/post-42");
        assert_eq!(body["outcomes"][0]["backend"], "edge");
        assert_eq!(edge.calls.load(Ordering::SeqCst), 2);
        assert_eq!(kv.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_content_url_is_unprocessable() {
        let edge = FixedBackend::new("edge", InvalidationStatus::Success);
        let app = router(vec![edge.clone()], None);

        let response = app
            .oneshot(hook_request(
                r#"{"content_id":"42","content_url":"not a url"}"#,
                None,
            ))
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(edge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hook_requires_configured_token() {
        let edge = FixedBackend::new("edge", InvalidationStatus::Success);
        let app = router(vec![edge.clone()], Some("s3cret"));
        let body = r#"{"content_id":"42","content_url":"https://site.example/post-42"}"#;

        let missing = app
            .clone()
            .oneshot(hook_request(body, None))
            .await
            .expect("router should respond");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(hook_request(body, Some("guess")))
            .await
            .expect("router should respond");
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(edge.calls.load(Ordering::SeqCst), 0);

        let accepted = app
            .oneshot(hook_request(body, Some("s3cret")))
            .await
            .expect("router should respond");
        assert_eq!(accepted.status(), StatusCode::OK);
        assert_eq!(edge.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatch_survives_client_disconnect() {
        let slow = Arc::new(SlowBackend {
            delay: Duration::from_millis(100),
            started: AtomicU32::new(0),
            finished: AtomicU32::new(0),
        });
        let app = router(vec![slow.clone()], None);

        let request = app.oneshot(hook_request(
            r#"{"content_id":"42","content_url":"https://site.example/post-42"}"#,
            None,
        ));
        let hung_up = tokio::time::timeout(Duration::from_millis(20), request).await;
        assert!(hung_up.is_err(), "request should still be in flight");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(slow.started.load(Ordering::SeqCst), 2);
        assert_eq!(slow.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn health_does_not_require_token() {
        let response = router(Vec::new(), Some("s3cret"))
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }
}

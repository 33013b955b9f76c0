//! HTTP edge cache purger.
//!
//! Issues one purge request (default method `PURGE`) per target, either to the
//! target URL itself or to a configured purge endpoint using the
//! `<endpoint>/<path>` convention of the Nginx cache purge module.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HOST, HeaderValue};
use reqwest::{Client, Method, StatusCode, redirect};
use tracing::debug;
use url::Url;

use crate::domain::{InvalidationOutcome, InvalidationStatus, InvalidationTarget};
use crate::invalidation::{BackendAdapter, CancelPolicy, ensure_web_url};

use super::error::InfraError;

pub const EDGE_BACKEND_NAME: &str = "edge";

const DEFAULT_PURGE_METHOD: &str = "PURGE";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Construction options for [`EdgeCachePurger`].
#[derive(Debug, Clone)]
pub struct EdgePurgeOptions {
    /// HTTP method used for purge requests.
    pub method: String,
    /// Send purges here instead of to the target URL. Must end with `/`.
    pub purge_endpoint: Option<Url>,
    /// Transport-level timeout for one request.
    pub request_timeout: Duration,
}

impl Default for EdgePurgeOptions {
    fn default() -> Self {
        Self {
            method: DEFAULT_PURGE_METHOD.to_string(),
            purge_endpoint: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&crate::config::EdgeSettings> for EdgePurgeOptions {
    fn from(settings: &crate::config::EdgeSettings) -> Self {
        Self {
            method: settings.method.clone(),
            purge_endpoint: settings.purge_endpoint.clone(),
            request_timeout: settings.request_timeout,
        }
    }
}

/// Evicts cached responses from an HTTP-fronted cache.
///
/// The underlying client pools connections and is safe to share between
/// concurrent dispatch tasks.
pub struct EdgeCachePurger {
    client: Client,
    method: Method,
    endpoint: Option<Url>,
}

impl EdgeCachePurger {
    pub fn new(options: &EdgePurgeOptions) -> Result<Self, InfraError> {
        let method = Method::from_bytes(options.method.trim().as_bytes()).map_err(|err| {
            InfraError::backend(
                EDGE_BACKEND_NAME,
                format!("invalid purge method `{}`: {err}", options.method),
            )
        })?;

        let client = Client::builder()
            .user_agent(Self::user_agent())
            .redirect(redirect::Policy::none())
            .connect_timeout(options.request_timeout)
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| InfraError::backend(EDGE_BACKEND_NAME, err.to_string()))?;

        Ok(Self {
            client,
            method,
            endpoint: options.purge_endpoint.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("evictor/", env!("CARGO_PKG_VERSION"))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL the purge request for `target` is sent to.
    pub fn request_url(&self, target: &Url) -> Result<Url, String> {
        ensure_web_url(target)?;
        let Some(endpoint) = &self.endpoint else {
            return Ok(target.clone());
        };

        // `./` keeps a first segment like `foo:bar` from parsing as a scheme.
        let mut path = format!("./{}", target.path().trim_start_matches('/'));
        if let Some(query) = target.query() {
            path.push('?');
            path.push_str(query);
        }
        endpoint.join(&path).map_err(|err| err.to_string())
    }

    fn host_header(target: &Url) -> Option<HeaderValue> {
        let host = target.host_str()?;
        let value = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        HeaderValue::from_str(&value).ok()
    }
}

/// Map a purge response status to an invalidation status.
///
/// 2xx and 3xx evicted (or nothing to evict), 404 was not cached, 408, 429
/// and 5xx are worth retrying, any other status is a refusal.
pub fn classify_status(status: StatusCode) -> InvalidationStatus {
    if status.is_success() || status.is_redirection() {
        InvalidationStatus::Success
    } else if status == StatusCode::NOT_FOUND {
        InvalidationStatus::NotFound
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        InvalidationStatus::TransientFailure
    } else {
        InvalidationStatus::PermanentFailure
    }
}

#[async_trait]
impl BackendAdapter for EdgeCachePurger {
    fn name(&self) -> &str {
        EDGE_BACKEND_NAME
    }

    fn cancel_policy(&self) -> CancelPolicy {
        CancelPolicy::Finish
    }

    async fn invalidate(&self, target: &InvalidationTarget) -> InvalidationOutcome {
        let url = match self.request_url(target.url()) {
            Ok(url) => url,
            Err(reason) => {
                return InvalidationOutcome::permanent(
                    target,
                    EDGE_BACKEND_NAME,
                    format!("cannot build purge request for `{}`: {reason}", target.url()),
                );
            }
        };

        let mut request = self.client.request(self.method.clone(), url.clone());
        if self.endpoint.is_some()
            && let Some(host) = Self::host_header(target.url())
        {
            request = request.header(HOST, host);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let classified = classify_status(status);
                debug!(
                    target = "evictor::edge",
                    method = %self.method,
                    url = %url,
                    status = status.as_u16(),
                    outcome = %classified,
                    "Purge request answered"
                );
                let error = classified
                    .is_failure()
                    .then(|| format!("purge of `{url}` returned {status}"));
                InvalidationOutcome::new(target, EDGE_BACKEND_NAME, classified, error)
            }
            Err(err) if err.is_builder() => InvalidationOutcome::permanent(
                target,
                EDGE_BACKEND_NAME,
                format!("invalid purge request for `{url}`: {err}"),
            ),
            Err(err) => InvalidationOutcome::transient(
                target,
                EDGE_BACKEND_NAME,
                format!("purge request to `{url}` failed: {err}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, Uri};

    use super::*;

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path_and_query: String,
        host: Option<String>,
    }

    type Log = Arc<Mutex<Vec<Seen>>>;

    async fn record(
        State(log): State<Log>,
        method: axum::http::Method,
        uri: Uri,
        headers: HeaderMap,
    ) -> axum::http::StatusCode {
        log.lock().expect("log lock").push(Seen {
            method: method.to_string(),
            path_and_query: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default(),
            host: headers
                .get(axum::http::header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        });

        match uri.path() {
            "/missing" => axum::http::StatusCode::NOT_FOUND,
            "/overloaded" => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "/forbidden" => axum::http::StatusCode::METHOD_NOT_ALLOWED,
            "/moved" => axum::http::StatusCode::MOVED_PERMANENTLY,
            _ => axum::http::StatusCode::OK,
        }
    }

    async fn spawn_cache() -> (SocketAddr, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(record).with_state(log.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (addr, log)
    }

    fn target(raw: &str) -> InvalidationTarget {
        InvalidationTarget::new(Url::parse(raw).expect("valid url"))
    }

    fn purger() -> EdgeCachePurger {
        EdgeCachePurger::new(&EdgePurgeOptions::default()).expect("purger builds")
    }

    #[test]
    fn status_classes_map_to_outcomes() {
        assert_eq!(classify_status(StatusCode::OK), InvalidationStatus::Success);
        assert_eq!(
            classify_status(StatusCode::NO_CONTENT),
            InvalidationStatus::Success
        );
        assert_eq!(classify_status(StatusCode::FOUND), InvalidationStatus::Success);
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            InvalidationStatus::NotFound
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            InvalidationStatus::TransientFailure
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            InvalidationStatus::TransientFailure
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            InvalidationStatus::PermanentFailure
        );
    }

    #[test]
    fn rejects_invalid_method() {
        let options = EdgePurgeOptions {
            method: "PUR GE".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            EdgeCachePurger::new(&options),
            Err(InfraError::Backend { .. })
        ));
    }

    #[test]
    fn endpoint_mode_maps_path_and_query() {
        let purger = EdgeCachePurger::new(&EdgePurgeOptions {
            purge_endpoint: Some(Url::parse("http://127.0.0.1:8080/purge/").expect("valid url")),
            ..Default::default()
        })
        .expect("purger builds");

        let url = purger
            .request_url(&Url::parse("https://site.example/post-42?page=2").expect("valid url"))
            .expect("maps");
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/purge/post-42?page=2");

        let home = purger
            .request_url(&Url::parse("https://site.example/").expect("valid url"))
            .expect("maps");
        assert_eq!(home.as_str(), "http://127.0.0.1:8080/purge/");

        let colon = purger
            .request_url(&Url::parse("https://site.example/foo:bar/baz").expect("valid url"))
            .expect("maps");
        assert_eq!(colon.as_str(), "http://127.0.0.1:8080/purge/foo:bar/baz");
    }

    #[tokio::test]
    async fn purges_target_url_with_purge_method() {
        let (addr, log) = spawn_cache().await;
        let outcome = purger()
            .invalidate(&target(&format!("http://{addr}/post-42")))
            .await;

        assert_eq!(outcome.status, InvalidationStatus::Success);
        assert_eq!(outcome.backend_name, "edge");
        let seen = log.lock().expect("log lock").clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "PURGE");
        assert_eq!(seen[0].path_and_query, "/post-42");
    }

    #[tokio::test]
    async fn response_statuses_are_classified() {
        let (addr, log) = spawn_cache().await;
        let purger = purger();

        let cases = [
            ("missing", InvalidationStatus::NotFound),
            ("overloaded", InvalidationStatus::TransientFailure),
            ("forbidden", InvalidationStatus::PermanentFailure),
            ("moved", InvalidationStatus::Success),
        ];
        for (path, expected) in cases {
            let outcome = purger
                .invalidate(&target(&format!("http://{addr}/{path}")))
                .await;
            assert_eq!(outcome.status, expected, "path /{path}");
            assert_eq!(outcome.last_error.is_some(), expected.is_failure());
        }

        // Redirects are not followed.
        assert_eq!(log.lock().expect("log lock").len(), cases.len());
    }

    #[tokio::test]
    async fn custom_method_and_endpoint_keep_original_host() {
        let (addr, log) = spawn_cache().await;
        let purger = EdgeCachePurger::new(&EdgePurgeOptions {
            method: "BAN".to_string(),
            purge_endpoint: Some(Url::parse(&format!("http://{addr}/purge/")).expect("valid url")),
            ..Default::default()
        })
        .expect("purger builds");

        let outcome = purger
            .invalidate(&target("https://site.example/post-42"))
            .await;

        assert_eq!(outcome.status, InvalidationStatus::Success);
        let seen = log.lock().expect("log lock").clone();
        assert_eq!(seen[0].method, "BAN");
        assert_eq!(seen[0].path_and_query, "/purge/post-42");
        assert_eq!(seen[0].host.as_deref(), Some("site.example"));
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let outcome = purger()
            .invalidate(&target(&format!("http://{addr}/post-42")))
            .await;
        assert_eq!(outcome.status, InvalidationStatus::TransientFailure);
    }

    #[tokio::test]
    async fn non_web_target_is_permanent() {
        let outcome = purger().invalidate(&target("ftp://files.example/a")).await;
        assert_eq!(outcome.status, InvalidationStatus::PermanentFailure);
    }
}

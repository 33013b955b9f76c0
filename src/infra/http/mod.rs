//! Webhook surface: change notifications over HTTP.

mod middleware;
mod webhook;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::invalidation::InvalidationTrigger;

pub use middleware::RequestContext;

#[derive(Clone)]
pub struct HttpState {
    pub trigger: Arc<InvalidationTrigger>,
    pub webhook_token: Option<Arc<str>>,
}

impl HttpState {
    pub fn new(trigger: Arc<InvalidationTrigger>, webhook_token: Option<String>) -> Self {
        Self {
            trigger,
            webhook_token: webhook_token
                .filter(|token| !token.is_empty())
                .map(Arc::from),
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    let hooks = Router::new()
        .route("/hooks/content", post(webhook::content_changed))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_webhook_token,
        ));

    Router::new()
        .route("/health", get(webhook::health))
        .merge(hooks)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

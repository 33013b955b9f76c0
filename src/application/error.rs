use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{domain::ResolutionError, infra::error::InfraError};

/// Diagnostic attached to error responses for the response logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn internal(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalidation failed unexpectedly",
            detail,
        )
    }

    pub fn unauthorized(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            source,
            StatusCode::UNAUTHORIZED,
            "Webhook token required",
            detail,
        )
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<ResolutionError> for HttpError {
    fn from(error: ResolutionError) -> Self {
        let public_message = match error {
            ResolutionError::EmptyUrl => "Content URL is empty",
            ResolutionError::MalformedUrl { .. } => "Content URL is malformed",
            ResolutionError::DerivedUrl { .. } => "Derived URL could not be built",
        };
        HttpError::from_error(
            "infra::http::resolution_error_to_http_error",
            StatusCode::UNPROCESSABLE_ENTITY,
            public_message,
            &error,
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("{failed} of {total} invalidations did not succeed")]
    Incomplete { failed: usize, total: usize },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

use thiserror::Error;

/// Raised when a change notification cannot be turned into a target set.
///
/// Resolution errors are fatal for the event: nothing is dispatched and the
/// error is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("content url is empty")]
    EmptyUrl,
    #[error("content url `{url}` is malformed: {reason}")]
    MalformedUrl { url: String, reason: String },
    #[error("derived url rule `{rule}` rendered an invalid url: {reason}")]
    DerivedUrl { rule: String, reason: String },
}

impl ResolutionError {
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn derived(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DerivedUrl {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

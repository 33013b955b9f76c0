//! Invalidation trigger.
//!
//! In-process entry point for change notifications: resolves targets,
//! dispatches them and reports the outcome in one call. The webhook and the
//! `purge` command are thin wrappers around this type.

use std::future::{self, Future};

use tracing::info;

use crate::domain::{ChangeKind, ChangeNotice, InvalidationResult, ResolutionError};

use super::dispatcher::InvalidationDispatcher;
use super::reporter::{OutcomeReporter, OutcomeSummary};
use super::resolver::TargetResolver;

/// A dispatched change and its reported summary.
#[derive(Debug, Clone)]
pub struct Triggered {
    pub result: InvalidationResult,
    pub summary: OutcomeSummary,
}

/// Resolve → dispatch → report pipeline for content change notifications.
///
/// # Usage
///
/// ```ignore
/// // After a post is saved:
/// trigger.content_saved(&post.id, &post.permalink).await?;
/// ```
pub struct InvalidationTrigger {
    resolver: TargetResolver,
    dispatcher: InvalidationDispatcher,
    reporter: OutcomeReporter,
}

impl InvalidationTrigger {
    pub fn new(
        resolver: TargetResolver,
        dispatcher: InvalidationDispatcher,
        reporter: OutcomeReporter,
    ) -> Self {
        Self {
            resolver,
            dispatcher,
            reporter,
        }
    }

    /// Handle a notification to completion.
    pub async fn notify(&self, notice: &ChangeNotice) -> Result<Triggered, ResolutionError> {
        self.notify_until(notice, future::pending::<()>()).await
    }

    /// Handle a notification, returning the partial result if `cancel`
    /// completes first.
    ///
    /// Resolution failures are reported and returned before any backend is
    /// touched.
    pub async fn notify_until<C>(
        &self,
        notice: &ChangeNotice,
        cancel: C,
    ) -> Result<Triggered, ResolutionError>
    where
        C: Future<Output = ()> + Send,
    {
        let event = match self
            .resolver
            .event(&notice.content_id, &notice.content_url, notice.kind)
        {
            Ok(event) => event,
            Err(err) => {
                self.reporter
                    .report_rejected(&notice.content_id, &notice.content_url, &err);
                return Err(err);
            }
        };

        info!(
            target = "evictor::invalidation",
            event_id = %event.id(),
            content_id = event.content_id(),
            kind = %event.kind(),
            targets = event.targets().len(),
            backends = ?self.dispatcher.backend_names(),
            "Change event accepted"
        );

        let result = self.dispatcher.dispatch_until(&event, cancel).await;
        let summary = self.reporter.report(&result);
        Ok(Triggered { result, summary })
    }

    /// Content was created or updated.
    pub async fn content_saved(
        &self,
        content_id: &str,
        content_url: &str,
    ) -> Result<Triggered, ResolutionError> {
        self.notify(&ChangeNotice::new(content_id, content_url, ChangeKind::Saved))
            .await
    }

    /// Content was deleted.
    pub async fn content_deleted(
        &self,
        content_id: &str,
        content_url: &str,
    ) -> Result<Triggered, ResolutionError> {
        self.notify(&ChangeNotice::new(
            content_id,
            content_url,
            ChangeKind::Deleted,
        ))
        .await
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn dispatcher(&self) -> &InvalidationDispatcher {
        &self.dispatcher
    }
}

//! Content change events.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use super::target::InvalidationTarget;

/// What happened to the content.
///
/// Both kinds invalidate the same targets; the kind is kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Content was created or updated.
    #[default]
    Saved,
    /// Content was removed.
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Saved => f.write_str("saved"),
            ChangeKind::Deleted => f.write_str("deleted"),
        }
    }
}

/// A raw change notification as delivered by the host system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub content_id: String,
    pub content_url: String,
    #[serde(rename = "action", default)]
    pub kind: ChangeKind,
}

impl ChangeNotice {
    pub fn new(
        content_id: impl Into<String>,
        content_url: impl Into<String>,
        kind: ChangeKind,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_url: content_url.into(),
            kind,
        }
    }
}

/// A resolved content change, ready for dispatch.
///
/// Immutable once built. `targets` is deduplicated by URL and keeps
/// first-seen order, which is also the dispatch order.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    id: Uuid,
    kind: ChangeKind,
    content_id: String,
    content_url: Url,
    targets: Vec<InvalidationTarget>,
    received_at: OffsetDateTime,
}

impl ChangeEvent {
    /// Build an event from already-resolved targets.
    ///
    /// Targets naming the same URL are dropped, keeping the first occurrence.
    pub fn new(
        content_id: impl Into<String>,
        content_url: Url,
        kind: ChangeKind,
        targets: impl IntoIterator<Item = InvalidationTarget>,
    ) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .filter(|target| seen.insert(target.url().as_str().to_string()))
            .collect();

        Self {
            id: Uuid::new_v4(),
            kind,
            content_id: content_id.into(),
            content_url,
            targets,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn content_url(&self) -> &Url {
        &self.content_url
    }

    pub fn targets(&self) -> &[InvalidationTarget] {
        &self.targets
    }

    pub fn received_at(&self) -> OffsetDateTime {
        self.received_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("valid url")
    }

    fn target(raw: &str) -> InvalidationTarget {
        InvalidationTarget::verbatim(url(raw), raw)
    }

    #[test]
    fn targets_are_deduplicated_in_first_seen_order() {
        let event = ChangeEvent::new(
            "42",
            url("https://site.example/post-42"),
            ChangeKind::Saved,
            vec![
                target("https://site.example/post-42"),
                target("https://site.example/"),
                target("https://site.example/post-42"),
                target("https://site.example/feed/"),
            ],
        );

        let keys: Vec<&str> = event
            .targets()
            .iter()
            .map(InvalidationTarget::cache_key)
            .collect();
        assert_eq!(
            keys,
            vec![
                "https://site.example/post-42",
                "https://site.example/",
                "https://site.example/feed/",
            ]
        );
    }

    #[test]
    fn equivalent_spellings_keep_the_first_key() {
        let event = ChangeEvent::new(
            "home",
            url("https://site.example/"),
            ChangeKind::Saved,
            vec![target("https://site.example"), target("https://site.example/")],
        );

        assert_eq!(event.targets().len(), 1);
        assert_eq!(event.targets()[0].cache_key(), "https://site.example");
    }

    #[test]
    fn each_event_gets_its_own_id() {
        let a = ChangeEvent::new("1", url("https://x/1"), ChangeKind::Saved, Vec::new());
        let b = ChangeEvent::new("1", url("https://x/1"), ChangeKind::Saved, Vec::new());
        assert_ne!(a.id(), b.id());
        assert!(!a.id().is_nil());
    }

    #[test]
    fn notice_action_defaults_to_saved() {
        let notice: ChangeNotice = serde_json::from_str(
            r#"{"content_id":"42","content_url":"https://site.example/post-42"}"#,
        )
        .expect("valid notice");
        assert_eq!(notice.kind, ChangeKind::Saved);

        let notice: ChangeNotice = serde_json::from_str(
            r#"{"content_id":"42","content_url":"https://site.example/post-42","action":"deleted"}"#,
        )
        .expect("valid notice");
        assert_eq!(notice.kind, ChangeKind::Deleted);
    }

    #[test]
    fn change_kind_parses_from_snake_case() {
        let kind: ChangeKind = serde_json::from_str("\"deleted\"").expect("valid kind");
        assert_eq!(kind, ChangeKind::Deleted);
        assert_eq!(ChangeKind::Saved.to_string(), "saved");
    }
}

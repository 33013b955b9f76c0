//! Target resolution: which URLs a content change makes stale.

use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::domain::{ChangeEvent, ChangeKind, InvalidationTarget, ResolutionError};

const PLACEHOLDER_CONTENT_ID: &str = "content_id";
const PLACEHOLDER_SLUG: &str = "slug";

/// A configured page derived from every content change, e.g. `feed/` or
/// `category/{slug}/`.
///
/// Relative templates are joined onto the homepage; templates starting with
/// `http://` or `https://` are used as-is. Supported placeholders are
/// `{content_id}` and `{slug}` (last non-empty path segment of the content URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedUrlRule {
    template: String,
}

impl DerivedUrlRule {
    /// Validate the template's placeholder syntax.
    pub fn parse(template: impl Into<String>) -> Result<Self, String> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err("template must not be empty".to_string());
        }

        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| format!("unclosed placeholder in `{template}`"))?;
            let name = &after[..close];
            if name != PLACEHOLDER_CONTENT_ID && name != PLACEHOLDER_SLUG {
                return Err(format!("unknown placeholder `{{{name}}}` in `{template}`"));
            }
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(format!("unbalanced `}}` in `{template}`"));
        }

        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Render the rule for one content item.
    ///
    /// Absolute templates keep the rendered string as the cache key; relative
    /// ones are keyed by the joined URL.
    pub fn render(
        &self,
        homepage: &Url,
        content_id: &str,
        content_url: &Url,
    ) -> Result<InvalidationTarget, ResolutionError> {
        let rendered = self
            .template
            .replace("{content_id}", content_id)
            .replace("{slug}", slug_of(content_url));

        let target = if is_absolute(&rendered) {
            Url::parse(&rendered).map(|url| InvalidationTarget::verbatim(url, rendered.as_str()))
        } else {
            homepage.join(&rendered).map(InvalidationTarget::new)
        }
        .map_err(|err| ResolutionError::derived(&self.template, err.to_string()))?;

        ensure_web_url(target.url())
            .map_err(|reason| ResolutionError::derived(&self.template, reason))?;
        Ok(target)
    }
}

impl fmt::Display for DerivedUrlRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Maps a content change to the ordered, deduplicated set of URLs to purge.
///
/// Pure function of its inputs and the static site configuration: the
/// content URL comes first, then the homepage, then derived rules in
/// configuration order. Cache keys keep the caller's spelling of each URL.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    homepage: InvalidationTarget,
    rules: Vec<DerivedUrlRule>,
}

impl TargetResolver {
    pub fn new(homepage: Url, rules: Vec<DerivedUrlRule>) -> Self {
        Self {
            homepage: InvalidationTarget::new(homepage),
            rules,
        }
    }

    /// Key the homepage by its configured spelling instead of the parsed URL.
    pub fn with_homepage_key(mut self, key: impl Into<String>) -> Self {
        self.homepage = InvalidationTarget::verbatim(self.homepage.url().clone(), key);
        self
    }

    pub fn homepage(&self) -> &Url {
        self.homepage.url()
    }

    pub fn rules(&self) -> &[DerivedUrlRule] {
        &self.rules
    }

    /// Compute the affected targets for a content item.
    pub fn resolve(
        &self,
        content_id: &str,
        content_url: &str,
    ) -> Result<Vec<InvalidationTarget>, ResolutionError> {
        let content = parse_content_url(content_url)?;
        self.resolve_parsed(content_id, content)
    }

    /// Resolve and package the result as a dispatchable event.
    ///
    /// Either every URL resolves or the event is rejected.
    pub fn event(
        &self,
        content_id: &str,
        content_url: &str,
        kind: ChangeKind,
    ) -> Result<ChangeEvent, ResolutionError> {
        let content = parse_content_url(content_url)?;
        let parsed = content.url().clone();
        let targets = self.resolve_parsed(content_id, content)?;
        Ok(ChangeEvent::new(content_id, parsed, kind, targets))
    }

    fn resolve_parsed(
        &self,
        content_id: &str,
        content: InvalidationTarget,
    ) -> Result<Vec<InvalidationTarget>, ResolutionError> {
        let derived = self
            .rules
            .iter()
            .map(|rule| rule.render(self.homepage.url(), content_id, content.url()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut candidates = Vec::with_capacity(derived.len() + 2);
        candidates.push(content);
        candidates.push(self.homepage.clone());
        candidates.extend(derived);

        let mut seen = HashSet::new();
        Ok(candidates
            .into_iter()
            .filter(|target| seen.insert(target.url().as_str().to_string()))
            .collect())
    }
}

fn parse_content_url(raw: &str) -> Result<InvalidationTarget, ResolutionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ResolutionError::EmptyUrl);
    }

    let url =
        Url::parse(trimmed).map_err(|err| ResolutionError::malformed(trimmed, err.to_string()))?;
    ensure_web_url(&url).map_err(|reason| ResolutionError::malformed(trimmed, reason))?;
    Ok(InvalidationTarget::verbatim(url, trimmed))
}

pub(crate) fn ensure_web_url(url: &Url) -> Result<(), String> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(())
}

fn is_absolute(rendered: &str) -> bool {
    rendered.starts_with("http://") || rendered.starts_with("https://")
}

fn slug_of(url: &Url) -> &str {
    url.path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).next_back())
        .unwrap_or("")
}

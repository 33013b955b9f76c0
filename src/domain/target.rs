//! Invalidation targets.

use url::Url;

/// One URL to invalidate, with the cache key derived from it.
///
/// The key is the URL string exactly as the caller or the site configuration
/// spelled it, before any normalization by [`Url`]. Backends with their own
/// key scheme transform this key rather than re-deriving it from the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvalidationTarget {
    url: Url,
    cache_key: String,
}

impl InvalidationTarget {
    pub fn new(url: Url) -> Self {
        let cache_key = url.as_str().to_string();
        Self { url, cache_key }
    }

    /// Keep `raw` as the cache key for an already-parsed `url`.
    pub fn verbatim(url: Url, raw: impl Into<String>) -> Self {
        Self {
            url,
            cache_key: raw.into(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }
}

impl From<Url> for InvalidationTarget {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_the_url_verbatim() {
        let url = Url::parse("https://site.example/post-42?preview=1").expect("valid url");
        let target = InvalidationTarget::new(url);
        assert_eq!(target.cache_key(), "https://site.example/post-42?preview=1");
    }

    #[test]
    fn verbatim_key_survives_url_normalization() {
        for raw in [
            "https://Site.Example/Post-42",
            "https://site.example:443/post-42",
            "https://site.example/café/",
        ] {
            let target = InvalidationTarget::verbatim(Url::parse(raw).expect("valid url"), raw);
            assert_eq!(target.cache_key(), raw);
            assert_ne!(target.url().as_str(), raw);
        }
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let url = Url::parse("https://site.example/").expect("valid url");
        assert_eq!(
            InvalidationTarget::new(url.clone()),
            InvalidationTarget::from(url)
        );
    }
}

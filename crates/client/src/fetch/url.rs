//! URL canonicalization so that the router and the worker's message handlers
//! agree on one cache key per resource.

use url::Url;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize a URL for use as a cache key.
///
/// Relative input (`/books/a.pdf`, `books/a.pdf`) is resolved against
/// `origin`. The host is lowercased, the fragment dropped and the query kept as
/// is. Only `http` and `https` are accepted.
pub fn canonicalize(origin: &Url, input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?
        }
        Err(e) => return Err(UrlError::InvalidUrl(e.to_string())),
    };

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str().map(str::to_lowercase) {
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }
    parsed.set_fragment(None);

    Ok(parsed)
}

/// The cache key form of an already-parsed request URL.
pub fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.into()
}

/// Whether `url` shares scheme, host and port with `origin`.
pub fn same_origin(origin: &Url, url: &Url) -> bool {
    origin.origin() == url.origin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://reader.example.com").unwrap()
    }

    #[test]
    fn test_canonicalize_absolute() {
        let url = canonicalize(&origin(), "https://reader.example.com/books/a.pdf").unwrap();
        assert_eq!(url.as_str(), "https://reader.example.com/books/a.pdf");
    }

    #[test]
    fn test_canonicalize_relative_resolves_against_origin() {
        let url = canonicalize(&origin(), "/books/a.pdf").unwrap();
        assert_eq!(url.as_str(), "https://reader.example.com/books/a.pdf");

        let bare = canonicalize(&origin(), "books/a.pdf").unwrap();
        assert_eq!(bare, url);
    }

    #[test]
    fn test_canonicalize_lowercase_host() {
        let url = canonicalize(&origin(), "https://READER.Example.COM/a.pdf").unwrap();
        assert_eq!(url.host_str(), Some("reader.example.com"));
    }

    #[test]
    fn test_canonicalize_remove_fragment_keep_query() {
        let url = canonicalize(&origin(), "/books/a.pdf?v=2#page=4").unwrap();
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), Some("v=2"));
    }

    #[test]
    fn test_canonicalize_unsupported_scheme() {
        let result = canonicalize(&origin(), "file:///etc/passwd");
        assert!(matches!(result, Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_canonicalize_empty() {
        assert!(matches!(canonicalize(&origin(), "   "), Err(UrlError::Empty)));
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let url = Url::parse("https://reader.example.com/index.html#top").unwrap();
        assert_eq!(cache_key(&url), "https://reader.example.com/index.html");
    }

    #[test]
    fn test_same_origin() {
        let local = Url::parse("https://reader.example.com/app.js").unwrap();
        let other_port = Url::parse("https://reader.example.com:8443/app.js").unwrap();
        let cdn = Url::parse("https://cdn.example.com/app.js").unwrap();

        assert!(same_origin(&origin(), &local));
        assert!(!same_origin(&origin(), &other_port));
        assert!(!same_origin(&origin(), &cdn));
    }
}

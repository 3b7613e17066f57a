//! Canonical request keys.

use sha2::{Digest, Sha256};

/// Compute the cache key for a request: the method (upper-cased) and the canonical URL.
///
/// Callers pass an already canonicalized URL; this function only normalizes the method.
pub fn compute_request_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_stability() {
        let key1 = compute_request_key("GET", "https://example.com/books/a.pdf");
        let key2 = compute_request_key("GET", "https://example.com/books/a.pdf");
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_key_method_normalized() {
        let upper = compute_request_key("GET", "https://example.com/");
        let lower = compute_request_key("get", "https://example.com/");
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_key_different_url() {
        let a = compute_request_key("GET", "https://example.com/a");
        let b = compute_request_key("GET", "https://example.com/b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_format() {
        let key = compute_request_key("GET", "https://example.com");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

//! HTTP fetch pipeline for the request router.
//!
//! ### Failure model
//! - Transport errors and timeouts are network failures.
//! - Any non-2xx status is a network failure too; such a response is never
//!   handed to the router and never cached.
//! - Bodies larger than `max_bytes` are rejected.
//!
//! The router only sees the [`Network`] trait, so tests and the worker binary
//! can swap [`FetchClient`] for [`MemoryNetwork`].

pub mod memory;
pub mod url;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use reqwest::{Client, StatusCode, header};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub use memory::MemoryNetwork;
pub use self::url::{UrlError, cache_key, canonicalize, same_origin};

use folio_core::{AppConfig, Error, StoredResponse};

/// Something that can perform a GET against the network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch `url`, forwarding the page's `Accept` header when there is one.
    async fn fetch(&self, url: &Url, accept: Option<&str>) -> Result<FetchResponse, Error>;
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "folio-worker/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 100MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "folio-worker/0.1".to_string(),
            max_bytes: 100 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Self::default()
        }
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The URL requested
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code, always 2xx
    pub status: StatusCode,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Response headers
    pub headers: header::HeaderMap,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

impl FetchResponse {
    /// Copy into the form kept in a cache partition.
    ///
    /// Header names are lowercased by `HeaderMap`; values that are not visible
    /// ASCII are dropped.
    pub fn to_stored(&self) -> StoredResponse {
        let headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        StoredResponse { status: self.status.as_u16(), headers, body: self.bytes.clone() }
    }
}

/// HTTP fetch client.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// POST a JSON document and decode the JSON answer.
    ///
    /// An empty answer body decodes to `null`.
    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, Error> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let response = self
            .http
            .post(url.clone())
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("status {} from {}", status.as_u16(), url)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response: {}", e)))?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| Error::HttpError(format!("invalid JSON from {}: {}", url, e)))
    }
}

#[async_trait]
impl Network for FetchClient {
    async fn fetch(&self, url: &Url, accept: Option<&str>) -> Result<FetchResponse, Error> {
        let start = Instant::now();

        let mut request = self.http.get(url.clone());
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::HttpError(format!("status {}", status.as_u16())));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let final_url = response.url().clone();
        let headers = response.headers().clone();

        let bytes = response.bytes().await.map_err(map_send_error)?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(%url, %final_url, fetch_ms, bytes = bytes.len(), "fetched");

        Ok(FetchResponse { url: url.clone(), final_url, status, content_type, bytes, headers, fetch_ms })
    }
}

fn map_send_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(err.to_string())
    } else {
        Error::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "folio-worker/0.1");
        assert_eq!(config.max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "reader/2".into(), timeout_ms: 1500, max_bytes: 42, ..AppConfig::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "reader/2");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.max_bytes, 42);
    }

    #[test]
    fn test_to_stored_keeps_status_headers_and_body() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/pdf"));
        headers.insert(header::ETAG, header::HeaderValue::from_static("\"abc\""));

        let response = FetchResponse {
            url: Url::parse("https://example.com/a.pdf").unwrap(),
            final_url: Url::parse("https://example.com/a.pdf").unwrap(),
            status: StatusCode::OK,
            content_type: Some("application/pdf".to_string()),
            bytes: Bytes::from_static(b"%PDF"),
            headers,
            fetch_ms: 3,
        };

        let stored = response.to_stored();
        assert_eq!(stored.status, 200);
        assert_eq!(stored.content_type(), Some("application/pdf"));
        assert_eq!(stored.headers.get("etag").map(String::as_str), Some("\"abc\""));
        assert_eq!(stored.body.as_ref(), b"%PDF");
    }

    #[tokio::test]
    async fn test_fetch_client_new() {
        let client = FetchClient::new(FetchConfig::default());
        assert!(client.is_ok());
    }
}

//! In-memory [`Network`] with an online/offline switch.
//!
//! Used to drive the router and the worker without sockets: responses are
//! registered per URL and every request is recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url, header};

use super::{FetchResponse, Network};
use folio_core::Error;

#[derive(Debug, Clone)]
struct Canned {
    status: u16,
    content_type: String,
    body: Bytes,
}

#[derive(Debug)]
pub struct MemoryNetwork {
    online: AtomicBool,
    routes: Mutex<HashMap<String, Canned>>,
    requests: Mutex<Vec<String>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryNetwork {
    /// An online network with no routes; unknown URLs answer 404.
    pub fn new() -> Self {
        Self { online: AtomicBool::new(true), routes: Mutex::new(HashMap::new()), requests: Mutex::new(Vec::new()) }
    }

    /// Serve `body` for `url` with the given status.
    pub fn route(&self, url: &str, status: u16, content_type: &str, body: impl Into<Bytes>) {
        let canned = Canned { status, content_type: content_type.to_string(), body: body.into() };
        lock(&self.routes).insert(url.to_string(), canned);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Every URL requested so far, in order, including those made while offline.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn fetch(&self, url: &Url, _accept: Option<&str>) -> Result<FetchResponse, Error> {
        lock(&self.requests).push(url.to_string());

        if !self.is_online() {
            return Err(Error::Network(format!("offline: {url}")));
        }

        let canned = lock(&self.routes).get(url.as_str()).cloned();
        let Some(canned) = canned else {
            return Err(Error::HttpError("status 404".to_string()));
        };
        if !(200..300).contains(&canned.status) {
            return Err(Error::HttpError(format!("status {}", canned.status)));
        }

        let status = StatusCode::from_u16(canned.status).map_err(|e| Error::HttpError(e.to_string()))?;
        let mut headers = header::HeaderMap::new();
        if let Ok(value) = header::HeaderValue::from_str(&canned.content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }

        Ok(FetchResponse {
            url: url.clone(),
            final_url: url.clone(),
            status,
            content_type: Some(canned.content_type),
            bytes: canned.body,
            headers,
            fetch_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_routed_response() {
        let net = MemoryNetwork::new();
        net.route("https://example.com/app.css", 200, "text/css", "body{}");

        let response = net.fetch(&url("https://example.com/app.css"), None).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type.as_deref(), Some("text/css"));
        assert_eq!(response.bytes.as_ref(), b"body{}");
    }

    #[tokio::test]
    async fn test_offline_is_network_failure() {
        let net = MemoryNetwork::new();
        net.route("https://example.com/", 200, "text/html", "<html></html>");
        net.set_online(false);

        let err = net.fetch(&url("https://example.com/"), None).await.unwrap_err();
        assert!(err.is_network_failure());
        assert_eq!(net.requests(), vec!["https://example.com/".to_string()]);
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let net = MemoryNetwork::new();
        net.route("https://example.com/gone", 410, "text/plain", "");

        let gone = net.fetch(&url("https://example.com/gone"), None).await.unwrap_err();
        assert!(matches!(gone, Error::HttpError(_)));

        let missing = net.fetch(&url("https://example.com/missing"), None).await.unwrap_err();
        assert!(matches!(missing, Error::HttpError(_)));
    }
}

//! Responses produced by the router, including its synthesized fallbacks.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;

use folio_core::StoredResponse;

/// Where a routed response came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// The pre-cached offline document, served for a failed navigation.
    OfflineFallback,
    /// Built in place because the offline document was not cached either.
    OfflineSynthesized,
    #[serde(rename_all = "camelCase")]
    ContentUnavailable { item_name: String },
    Placeholder,
    ResourceUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedResponse {
    pub status: u16,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub source: ResponseSource,
}

const OFFLINE_HTML: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available offline yet.</p></body></html>\n";

impl RoutedResponse {
    pub fn from_stored(stored: StoredResponse, source: ResponseSource) -> Self {
        Self { status: stored.status, headers: stored.headers, body: stored.body, source }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    fn with(status: u16, content_type: &str, body: impl Into<Bytes>, source: ResponseSource) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        headers.insert("cache-control".to_string(), "no-store".to_string());
        Self { status, headers, body: body.into(), source }
    }

    /// Minimal 503 page used when neither the network nor the shell can serve a navigation.
    pub fn offline_page() -> Self {
        Self::with(503, "text/html; charset=utf-8", OFFLINE_HTML, ResponseSource::OfflineSynthesized)
    }

    /// 503 naming the large document that could not be served.
    pub fn content_unavailable(item_name: &str) -> Self {
        let body = json!({
            "error": "CONTENT_UNAVAILABLE_OFFLINE",
            "message": format!("\"{item_name}\" is not available offline. Connect to the internet to download it."),
            "itemName": item_name,
        });
        Self::with(
            503,
            "application/json",
            body.to_string(),
            ResponseSource::ContentUnavailable { item_name: item_name.to_string() },
        )
    }

    /// Empty body of the asset's type, so a missing stylesheet or script does not break the page.
    pub fn placeholder(content_type: &str) -> Self {
        Self::with(200, content_type, Bytes::new(), ResponseSource::Placeholder)
    }

    pub fn resource_unavailable(url: &str) -> Self {
        let body = json!({
            "error": "RESOURCE_UNAVAILABLE",
            "message": "This resource is not available offline.",
            "url": url,
        });
        Self::with(503, "application/json", body.to_string(), ResponseSource::ResourceUnavailable)
    }
}

//! Request classification.
//!
//! ### Order
//! 1. Passthrough: method is not GET, scheme is not http(s), or the origin differs.
//! 2. LargeDocument: the path extension is a content extension, or `Accept`
//!    names exactly a content MIME type.
//! 3. Navigation: the navigation flag is set, or `Accept` includes `text/html`.
//! 4. Asset: anything else.

use regex::Regex;
use url::Url;

use crate::fetch::same_origin;
use folio_core::{AppConfig, Error};

/// A request as seen by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub method: String,
    pub url: Url,
    /// Top-level page load.
    pub navigation: bool,
    pub accept: Option<String>,
}

impl InterceptedRequest {
    pub fn get(url: Url) -> Self {
        Self { method: "GET".to_string(), url, navigation: false, accept: None }
    }

    pub fn navigate(url: Url) -> Self {
        Self { navigation: true, accept: Some("text/html".to_string()), ..Self::get(url) }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn with_accept(mut self, accept: &str) -> Self {
        self.accept = Some(accept.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Navigation,
    LargeDocument,
    Asset,
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    NetworkFirst,
    CacheFirstCapture,
    CacheFirst,
    Passthrough,
}

impl RequestKind {
    pub fn strategy(self) -> Strategy {
        match self {
            RequestKind::Navigation => Strategy::NetworkFirst,
            RequestKind::LargeDocument => Strategy::CacheFirstCapture,
            RequestKind::Asset => Strategy::CacheFirst,
            RequestKind::Passthrough => Strategy::Passthrough,
        }
    }
}

/// MIME type served for a file extension, for the extensions the router knows about.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "epub" => Some("application/epub+zip"),
        "css" => Some("text/css"),
        "js" | "mjs" => Some("text/javascript"),
        "json" => Some("application/json"),
        "svg" => Some("image/svg+xml"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

fn extension_pattern(extensions: &[String]) -> Result<Option<Regex>, Error> {
    let alternatives: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.'))
        .filter(|e| !e.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\.({})$", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("extension pattern: {e}")))
}

/// Origin and extension conventions used to classify requests.
#[derive(Debug, Clone)]
pub struct RouteRules {
    origin: Url,
    content_ext: Option<Regex>,
    content_mimes: Vec<&'static str>,
    textual_ext: Option<Regex>,
}

impl RouteRules {
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let content_mimes = config
            .content_extensions
            .iter()
            .filter_map(|e| mime_for_extension(e.trim_start_matches('.')))
            .collect();

        Ok(Self {
            origin,
            content_ext: extension_pattern(&config.content_extensions)?,
            content_mimes,
            textual_ext: extension_pattern(&config.textual_asset_extensions)?,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn classify(&self, req: &InterceptedRequest) -> RequestKind {
        if !req.method.eq_ignore_ascii_case("GET") {
            return RequestKind::Passthrough;
        }
        if !matches!(req.url.scheme(), "http" | "https") || !same_origin(&self.origin, &req.url) {
            return RequestKind::Passthrough;
        }

        let accept = req.accept.as_deref().map(str::trim).unwrap_or_default();
        let path = req.url.path();

        if self.content_ext.as_ref().is_some_and(|re| re.is_match(path))
            || self.content_mimes.iter().any(|m| accept.eq_ignore_ascii_case(m))
        {
            return RequestKind::LargeDocument;
        }
        if req.navigation || accept.to_ascii_lowercase().contains("text/html") {
            return RequestKind::Navigation;
        }
        RequestKind::Asset
    }

    /// Content type of the placeholder for a textual asset, or None if `url`
    /// is not a textual asset.
    pub fn textual_placeholder_type(&self, url: &Url) -> Option<&'static str> {
        let re = self.textual_ext.as_ref()?;
        let caps = re.captures(url.path())?;
        let ext = caps.get(1)?.as_str();
        Some(mime_for_extension(ext).unwrap_or("text/plain"))
    }
}

//! Request routing for intercepted GETs.
//!
//! ### Strategies
//! - Navigation: network first, then the exact shell entry, then the cached
//!   offline document, then a synthesized offline page.
//! - Large document: content partition first (no network on a hit), then the
//!   network; a network hit is returned at once and captured into the content
//!   partition in the background. Failure yields `CONTENT_UNAVAILABLE_OFFLINE`.
//! - Asset: shell first, then the network with write-through. Failure yields an
//!   empty placeholder for textual assets and `RESOURCE_UNAVAILABLE` otherwise.
//!
//! ### Caching is best-effort
//! Cache reads, writes and sweeps never fail a request. Their errors are
//! logged and the request continues as if the cache had missed. Writes that
//! follow a network hit run in background tasks; [`RequestRouter::flush`]
//! waits for them.
//!
//! ### The offline document
//! The shell partition has no pins, so once `shell_max_items` newer entries
//! are written the pre-cached offline document is evicted like any other.
//! [`RequestRouter::ensure_offline_page`] fetches it back; periodic
//! maintenance calls it after every sweep.

pub mod classify;
pub mod response;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use url::Url;

pub use classify::{InterceptedRequest, RequestKind, RouteRules, Strategy, mime_for_extension};
pub use response::{ResponseSource, RoutedResponse};

use crate::fetch::{Network, cache_key, canonicalize};
use folio_core::cache::NoPins;
use folio_core::{AppConfig, CacheDb, CacheStore, Error, StoredResponse, SyncState};

/// What the interceptor does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not intercepted; the caller sends it to the network untouched.
    Passthrough,
    Respond(RoutedResponse),
}

impl RouteOutcome {
    pub fn response(&self) -> Option<&RoutedResponse> {
        match self {
            RouteOutcome::Respond(response) => Some(response),
            RouteOutcome::Passthrough => None,
        }
    }
}

/// Removed URLs per partition after a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub shell: Vec<String>,
    pub content: Vec<String>,
}

pub struct RequestRouter {
    rules: RouteRules,
    network: Arc<dyn Network>,
    shell: CacheStore,
    content: CacheStore,
    state: Arc<SyncState>,
    shell_max: usize,
    content_max: usize,
    offline_page: Url,
    writes: Mutex<Vec<JoinHandle<()>>>,
}

impl RequestRouter {
    /// Build a router over the current version's shell and content partitions.
    pub async fn new(
        config: &AppConfig, db: &CacheDb, network: Arc<dyn Network>, state: Arc<SyncState>,
    ) -> Result<Self, Error> {
        let rules = RouteRules::from_config(config)?;
        let offline_page = canonicalize(rules.origin(), &config.offline_page)
            .map_err(|e| Error::InvalidUrl(format!("offline_page: {e}")))?;
        let shell = db.open_partition(&config.shell_cache_name()).await?;
        let content = db.open_partition(&config.content_cache_name()).await?;

        Ok(Self {
            rules,
            network,
            shell,
            content,
            state,
            shell_max: config.shell_max_items,
            content_max: config.content_max_items,
            offline_page,
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn rules(&self) -> &RouteRules {
        &self.rules
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn shell(&self) -> &CacheStore {
        &self.shell
    }

    pub fn content(&self) -> &CacheStore {
        &self.content
    }

    /// Route one request.
    pub async fn handle(&self, req: &InterceptedRequest) -> RouteOutcome {
        let kind = self.rules.classify(req);
        tracing::debug!(url = %req.url, ?kind, "routing request");

        match kind.strategy() {
            Strategy::Passthrough => RouteOutcome::Passthrough,
            Strategy::NetworkFirst => RouteOutcome::Respond(self.network_first(req).await),
            Strategy::CacheFirstCapture => RouteOutcome::Respond(self.cache_first_capture(req).await),
            Strategy::CacheFirst => RouteOutcome::Respond(self.cache_first(req).await),
        }
    }

    async fn network_first(&self, req: &InterceptedRequest) -> RoutedResponse {
        let key = cache_key(&req.url);

        match self.network.fetch(&req.url, req.accept.as_deref()).await {
            Ok(fetched) => {
                let stored = fetched.to_stored();
                self.spawn_shell_write(key, stored.clone());
                return RoutedResponse::from_stored(stored, ResponseSource::Network);
            }
            Err(e) => tracing::debug!(url = %key, error = %e, "navigation fetch failed"),
        }

        if let Some(stored) = lookup(&self.shell, &key).await {
            return RoutedResponse::from_stored(stored, ResponseSource::Cache);
        }
        if let Some(stored) = lookup(&self.shell, self.offline_page.as_str()).await {
            return RoutedResponse::from_stored(stored, ResponseSource::OfflineFallback);
        }
        tracing::warn!(url = %key, "offline document missing from shell cache");
        RoutedResponse::offline_page()
    }

    async fn cache_first_capture(&self, req: &InterceptedRequest) -> RoutedResponse {
        let key = cache_key(&req.url);

        if let Some(stored) = lookup(&self.content, &key).await {
            return RoutedResponse::from_stored(stored, ResponseSource::Cache);
        }

        match self.network.fetch(&req.url, req.accept.as_deref()).await {
            Ok(fetched) => {
                let stored = fetched.to_stored();
                self.spawn_capture(key, stored.clone());
                RoutedResponse::from_stored(stored, ResponseSource::Network)
            }
            Err(e) => {
                tracing::debug!(url = %key, error = %e, "large document unavailable");
                let item_name = self.state.pin_snapshot().await.content_id(&key).unwrap_or_else(|| key.clone());
                RoutedResponse::content_unavailable(&item_name)
            }
        }
    }

    async fn cache_first(&self, req: &InterceptedRequest) -> RoutedResponse {
        let key = cache_key(&req.url);

        if let Some(stored) = lookup(&self.shell, &key).await {
            return RoutedResponse::from_stored(stored, ResponseSource::Cache);
        }

        match self.network.fetch(&req.url, req.accept.as_deref()).await {
            Ok(fetched) => {
                let stored = fetched.to_stored();
                self.spawn_shell_write(key, stored.clone());
                RoutedResponse::from_stored(stored, ResponseSource::Network)
            }
            Err(e) => {
                tracing::debug!(url = %key, error = %e, "asset fetch failed");
                match self.rules.textual_placeholder_type(&req.url) {
                    Some(content_type) => RoutedResponse::placeholder(content_type),
                    None => RoutedResponse::resource_unavailable(&key),
                }
            }
        }
    }

    /// Write through to the shell partition and sweep it, off the response path.
    fn spawn_shell_write(&self, key: String, stored: StoredResponse) {
        let shell = self.shell.clone();
        let max_items = self.shell_max;

        self.track(tokio::spawn(async move {
            if let Err(e) = shell.put("GET", &key, &stored).await {
                tracing::warn!(url = %key, error = %e, "shell cache write failed");
                return;
            }
            if let Err(e) = shell.enforce_bound(max_items, NoPins).await {
                tracing::warn!(partition = %shell.name(), error = %e, "shell sweep failed");
            }
        }));
    }

    /// Write a large document into the content partition without holding up the response.
    ///
    /// The task owns everything it needs, so it runs to completion even if the
    /// caller drops the response.
    fn spawn_capture(&self, key: String, stored: StoredResponse) {
        let content = self.content.clone();
        let state = Arc::clone(&self.state);
        let max_items = self.content_max;

        self.track(tokio::spawn(async move {
            if let Err(e) = content.put("GET", &key, &stored).await {
                tracing::warn!(url = %key, error = %e, "content capture failed");
                return;
            }
            tracing::debug!(url = %key, bytes = stored.body.len(), "captured large document");
            if let Err(e) = sweep_content(&content, &state, max_items).await {
                tracing::warn!(partition = %content.name(), error = %e, "content sweep failed");
            }
        }));
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        writes.retain(|h| !h.is_finished());
        writes.push(handle);
    }

    /// Wait for every background cache write started so far.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.writes.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "cache write task aborted");
            }
        }
    }

    /// Fetch the offline document back into the shell if it is missing.
    ///
    /// Returns whether the shell holds it afterwards.
    pub async fn ensure_offline_page(&self) -> bool {
        match self.shell.match_url(self.offline_page.as_str()).await {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "could not check for the offline document");
                return false;
            }
        }

        let fetched = match self.network.fetch(&self.offline_page, None).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::debug!(url = %self.offline_page, error = %e, "offline document not refetched");
                return false;
            }
        };
        match self.shell.put("GET", &cache_key(&self.offline_page), &fetched.to_stored()).await {
            Ok(()) => {
                tracing::info!(url = %self.offline_page, "offline document restored to shell");
                true
            }
            Err(e) => {
                tracing::warn!(url = %self.offline_page, error = %e, "offline document write failed");
                false
            }
        }
    }

    pub async fn sweep_shell(&self) -> Result<Vec<String>, Error> {
        self.shell.enforce_bound(self.shell_max, NoPins).await
    }

    pub async fn sweep_content(&self) -> Result<Vec<String>, Error> {
        sweep_content(&self.content, &self.state, self.content_max).await
    }

    /// Sweep both partitions. A failure in one does not stop the other.
    pub async fn sweep_all(&self) -> SweepReport {
        let shell = self.sweep_shell().await.unwrap_or_else(|e| {
            tracing::warn!(partition = %self.shell.name(), error = %e, "shell sweep failed");
            Vec::new()
        });
        let content = self.sweep_content().await.unwrap_or_else(|e| {
            tracing::warn!(partition = %self.content.name(), error = %e, "content sweep failed");
            Vec::new()
        });
        SweepReport { shell, content }
    }
}

async fn sweep_content(content: &CacheStore, state: &SyncState, max_items: usize) -> Result<Vec<String>, Error> {
    let pins = state.pin_snapshot().await;
    content.enforce_bound(max_items, pins).await
}

async fn lookup(store: &CacheStore, url: &str) -> Option<StoredResponse> {
    match store.match_url(url).await {
        Ok(Some(entry)) => {
            tracing::debug!(partition = %store.name(), url, "cache hit");
            Some(entry.response)
        }
        Ok(None) => {
            tracing::debug!(partition = %store.name(), url, "cache miss");
            None
        }
        Err(e) => {
            tracing::warn!(partition = %store.name(), url, error = %e, "cache read failed");
            None
        }
    }
}

//! The worker runtime.
//!
//! A [`Worker`] owns the cache partitions, the request router and the replica
//! of page state. Pages reach it only through broker channels: [`Worker::serve`]
//! drains the inbox, and fetches arrive through [`Worker::fetch`].

use std::sync::Arc;

use folio_client::{InterceptedRequest, Network, RequestRouter, RouteOutcome};
use folio_core::broker::WorkerInbox;
use folio_core::{AppConfig, Broadcaster, CacheDb, SyncState, WorkerRequest};

use crate::error::WorkerError;
use crate::handler;
use crate::lifecycle::{self, Lifecycle, LifecycleState};

pub struct Worker {
    config: AppConfig,
    db: CacheDb,
    router: RequestRouter,
    state: Arc<SyncState>,
    broadcaster: Broadcaster,
    lifecycle: Lifecycle,
}

impl Worker {
    /// Open the current version's partitions. The worker starts out `Parsed`.
    pub async fn new(
        config: AppConfig, db: CacheDb, network: Arc<dyn Network>, broadcaster: Broadcaster,
    ) -> Result<Arc<Self>, WorkerError> {
        let state = Arc::new(SyncState::new());
        let router = RequestRouter::new(&config, &db, network, Arc::clone(&state)).await?;
        Ok(Arc::new(Self { config, db, router, state, broadcaster, lifecycle: Lifecycle::default() }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Pre-cache the shell. On failure the worker becomes `Redundant`.
    pub async fn install(&self) -> Result<(), WorkerError> {
        if !self.lifecycle.transition(LifecycleState::Parsed, LifecycleState::Installing) {
            return Err(WorkerError::InvalidState { action: "install", state: self.lifecycle.state() });
        }

        match lifecycle::install(&self.router, &self.config).await {
            Ok(_) => {
                self.lifecycle.set(LifecycleState::Installed);
                tracing::info!(version = %self.config.cache_version, "worker installed");
                Ok(())
            }
            Err(e) => {
                self.lifecycle.set(LifecycleState::Redundant);
                tracing::error!(error = %e, "worker install failed");
                Err(e.into())
            }
        }
    }

    /// Take control: drop other versions' partitions and announce activation.
    pub async fn activate(&self) -> Result<(), WorkerError> {
        if !self.lifecycle.transition(LifecycleState::Installed, LifecycleState::Activating) {
            return Err(WorkerError::InvalidState { action: "activate", state: self.lifecycle.state() });
        }

        let stale = lifecycle::remove_stale(&self.db, &self.config).await;
        self.lifecycle.set(LifecycleState::Activated);
        tracing::info!(version = %self.config.cache_version, stale = stale.len(), "worker activated");
        lifecycle::announce(&self.broadcaster, &self.config.cache_version, &stale);
        Ok(())
    }

    /// Install then activate.
    pub async fn start(&self) -> Result<(), WorkerError> {
        self.install().await?;
        self.activate().await
    }

    /// Activate now if installed and waiting.
    pub async fn skip_waiting(&self) {
        match self.lifecycle.state() {
            LifecycleState::Installed => {
                if let Err(e) = self.activate().await {
                    tracing::debug!(error = %e, "skip-waiting lost a race with another activation");
                }
            }
            state => tracing::debug!(%state, "skip-waiting ignored"),
        }
    }

    /// Route a request. Until activation every request passes through.
    pub async fn fetch(&self, req: &InterceptedRequest) -> RouteOutcome {
        if self.lifecycle.state() != LifecycleState::Activated {
            return RouteOutcome::Passthrough;
        }
        self.router.handle(req).await
    }

    /// Handle inbox messages until every page handle is dropped.
    ///
    /// State updates are applied in arrival order on the listener itself; every
    /// other message runs in its own task.
    pub async fn serve(self: Arc<Self>, mut inbox: WorkerInbox) {
        while let Some(envelope) = inbox.recv().await {
            if matches!(envelope.message, WorkerRequest::UpdateSwState { .. }) {
                handler::dispatch(&self, envelope).await;
                continue;
            }
            let worker = Arc::clone(&self);
            tokio::spawn(async move { handler::dispatch(&worker, envelope).await });
        }
        tracing::info!("all pages disconnected; message listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use folio_client::{MemoryNetwork, PageSession, ResponseSource};
    use folio_core::broker::{self, BrokerError};
    use folio_core::{StateKey, WorkerBroadcast};
    use url::Url;

    const ORIGIN: &str = "https://reader.example.com";
    const TIMEOUT: Duration = Duration::from_millis(500);

    fn config() -> AppConfig {
        AppConfig {
            origin: ORIGIN.into(),
            precache: vec!["/".into()],
            content_max_items: 3,
            ..AppConfig::default()
        }
    }

    fn online_network() -> Arc<MemoryNetwork> {
        let network = Arc::new(MemoryNetwork::new());
        network.route(&format!("{ORIGIN}/"), 200, "text/html", "<h1>Home</h1>");
        network.route(&format!("{ORIGIN}/offline.html"), 200, "text/html", "<h1>Offline</h1>");
        network
    }

    struct Running {
        worker: Arc<Worker>,
        page: PageSession,
        network: Arc<MemoryNetwork>,
    }

    async fn running() -> Running {
        let network = online_network();
        let (handle, inbox) = broker::channel(16);
        let db = CacheDb::open_in_memory().await.unwrap();
        let worker = Worker::new(config(), db, network.clone(), inbox.broadcaster()).await.unwrap();
        worker.start().await.unwrap();
        tokio::spawn(Arc::clone(&worker).serve(inbox));

        let page_db = CacheDb::open_in_memory().await.unwrap();
        let page = PageSession::load(page_db, handle, TIMEOUT).await.unwrap();
        Running { worker, page, network }
    }

    fn request(path: &str) -> InterceptedRequest {
        InterceptedRequest::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_cache_list_delete_round_trip() {
        let r = running().await;

        r.page.cache_book("/books/moby-dick.pdf", b"%PDF-1.7".to_vec()).await.unwrap();
        let books = r.page.cached_books().await.unwrap();
        let urls: Vec<&str> = books.iter().map(|b| b.url.as_str()).collect();
        assert_eq!(urls, vec!["https://reader.example.com/books/moby-dick.pdf"]);

        assert!(r.page.delete_book("/books/moby-dick.pdf").await.unwrap());
        assert!(r.page.cached_books().await.unwrap().is_empty());
        assert!(!r.page.delete_book("/books/moby-dick.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_book_cached_by_message_is_served_offline() {
        let r = running().await;
        r.page.cache_book("/books/a.pdf", b"%PDF".to_vec()).await.unwrap();
        r.network.set_online(false);

        let outcome = r.worker.fetch(&request("/books/a.pdf")).await;
        let response = outcome.response().unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.content_type(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_state_updates_apply_in_order() {
        let r = running().await;
        r.page.lock("a").await.unwrap();
        r.page.lock("b").await.unwrap();
        r.page.unlock("a").await.unwrap();

        // a call is answered only after earlier inline state updates were applied
        r.page.cached_books().await.unwrap();
        let locked: Vec<String> = r.worker.state().locked_items().await.into_iter().collect();
        assert_eq!(locked, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_locked_book_survives_message_driven_eviction() {
        let r = running().await;
        r.page.lock("keep").await.unwrap();

        for name in ["keep", "b", "c", "d", "e"] {
            r.page.cache_book(&format!("/books/{name}.pdf"), vec![1]).await.unwrap();
        }

        let books = r.page.cached_books().await.unwrap();
        let urls: Vec<&str> = books.iter().map(|b| b.url.as_str()).collect();
        assert_eq!(urls.len(), 3);
        assert!(urls.contains(&"https://reader.example.com/books/keep.pdf"));
        assert!(!urls.contains(&"https://reader.example.com/books/b.pdf"));
    }

    #[tokio::test]
    async fn test_clear_cache_broadcasts() {
        let r = running().await;
        let mut events = r.worker.broadcaster().subscribe();
        r.page.cache_book("/books/a.pdf", vec![1]).await.unwrap();

        r.page.clear_cache().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), WorkerBroadcast::CacheCleared);
        assert!(r.page.cached_books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_passes_through_until_activated() {
        let network = online_network();
        let db = CacheDb::open_in_memory().await.unwrap();
        let (handle, inbox) = broker::channel(4);
        let worker = Worker::new(config(), db, network, inbox.broadcaster()).await.unwrap();
        worker.install().await.unwrap();
        assert_eq!(worker.lifecycle_state(), LifecycleState::Installed);
        assert_eq!(worker.fetch(&request("/app.js")).await, RouteOutcome::Passthrough);

        let mut events = handle.subscribe();
        tokio::spawn(Arc::clone(&worker).serve(inbox));
        handle.post(WorkerRequest::SkipWaiting).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), WorkerBroadcast::SwActivated { version: "v1".into() });
        assert_eq!(worker.lifecycle_state(), LifecycleState::Activated);
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant() {
        let network = Arc::new(MemoryNetwork::new());
        network.set_online(false);
        let db = CacheDb::open_in_memory().await.unwrap();
        let worker = Worker::new(config(), db, network, Broadcaster::detached()).await.unwrap();

        assert!(worker.start().await.is_err());
        assert_eq!(worker.lifecycle_state(), LifecycleState::Redundant);
        assert!(matches!(worker.activate().await, Err(WorkerError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_activation_resyncs_page_state() {
        let network = online_network();
        let (handle, inbox) = broker::channel(16);
        let page_db = CacheDb::open_in_memory().await.unwrap();
        page_db.kv_put(StateKey::LockedItems.as_str(), &serde_json::json!(["persisted"])).await.unwrap();
        let page = Arc::new(PageSession::load(page_db, handle.clone(), TIMEOUT).await.unwrap());

        let mut events = handle.subscribe();
        let follower = {
            let page = Arc::clone(&page);
            tokio::spawn(async move {
                let event = events.recv().await.unwrap();
                page.handle_broadcast(&event).await.unwrap();
            })
        };

        let db = CacheDb::open_in_memory().await.unwrap();
        let worker = Worker::new(config(), db, network, inbox.broadcaster()).await.unwrap();
        tokio::spawn(Arc::clone(&worker).serve(inbox));
        worker.start().await.unwrap();
        follower.await.unwrap();

        page.cached_books().await.unwrap();
        assert!(worker.state().locked_items().await.contains("persisted"));
    }

    #[tokio::test]
    async fn test_calls_fail_once_worker_is_gone() {
        let (handle, inbox) = broker::channel(4);
        drop(inbox);
        let page = PageSession::load(CacheDb::open_in_memory().await.unwrap(), handle, TIMEOUT).await.unwrap();
        assert!(matches!(page.cached_books().await, Err(BrokerError::Disconnected)));
    }
}

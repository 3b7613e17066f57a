//! Page-side session.
//!
//! The page owns the authoritative locked-item set, pending-activity queue and
//! content index. Each mutation is built on a copy, persisted to the key-value
//! table, and only then applied in memory and pushed to the worker with
//! `UPDATE_SW_STATE`. A mutation whose write fails leaves the session as it
//! was, so retrying it does the whole job again. A push that cannot be
//! delivered is not an error: the worker is re-synchronized on its next
//! activation through [`PageSession::handle_broadcast`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use folio_core::broker::BrokerError;
use folio_core::protocol::CachedBook;
use folio_core::sync::ActivityAck;
use folio_core::{ActivityRecord, CacheDb, Error, StateKey, WorkerBroadcast, WorkerHandle, WorkerReply, WorkerRequest};

#[derive(Debug, Default)]
struct PageState {
    locked: BTreeSet<String>,
    pending: Vec<ActivityRecord>,
    index: BTreeMap<String, String>,
}

pub struct PageSession {
    db: CacheDb,
    worker: WorkerHandle,
    timeout: Duration,
    state: Mutex<PageState>,
}

async fn load_key<T>(db: &CacheDb, key: StateKey) -> Result<T, Error>
where
    T: DeserializeOwned + Default,
{
    let Some(value) = db.kv_get(key.as_str()).await? else {
        return Ok(T::default());
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            tracing::warn!(%key, error = %e, "discarding unreadable persisted state");
            Ok(T::default())
        }
    }
}

impl PageSession {
    /// Restore persisted state and attach to a worker.
    ///
    /// `timeout` bounds every call made to the worker.
    pub async fn load(db: CacheDb, worker: WorkerHandle, timeout: Duration) -> Result<Self, Error> {
        let state = PageState {
            locked: load_key(&db, StateKey::LockedItems).await?,
            pending: load_key(&db, StateKey::PendingActivity).await?,
            index: load_key(&db, StateKey::ContentIndex).await?,
        };
        tracing::debug!(locked = state.locked.len(), pending = state.pending.len(), "page session loaded");
        Ok(Self { db, worker, timeout, state: Mutex::new(state) })
    }

    pub async fn is_locked(&self, id: &str) -> bool {
        self.state.lock().await.locked.contains(id)
    }

    pub async fn pending(&self) -> Vec<ActivityRecord> {
        self.state.lock().await.pending.clone()
    }

    /// Pin a content item. Returns false if it was already locked.
    pub async fn lock(&self, id: &str) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        if state.locked.contains(id) {
            return Ok(false);
        }
        let mut locked = state.locked.clone();
        locked.insert(id.to_string());
        let json = self.persist(StateKey::LockedItems, &locked).await?;
        state.locked = locked;
        self.post_state(StateKey::LockedItems, json).await;
        Ok(true)
    }

    /// Unpin a content item. Returns false if it was not locked.
    pub async fn unlock(&self, id: &str) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        if !state.locked.contains(id) {
            return Ok(false);
        }
        let mut locked = state.locked.clone();
        locked.remove(id);
        let json = self.persist(StateKey::LockedItems, &locked).await?;
        state.locked = locked;
        self.post_state(StateKey::LockedItems, json).await;
        Ok(true)
    }

    /// Map a content ID to the URL it is stored under, for URLs that do not
    /// follow the file-name convention.
    pub async fn register_content(&self, id: &str, url: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.index.get(id).is_some_and(|existing| existing == url) {
            return Ok(());
        }
        let mut index = state.index.clone();
        index.insert(id.to_string(), url.to_string());
        let json = self.persist(StateKey::ContentIndex, &index).await?;
        state.index = index;
        self.post_state(StateKey::ContentIndex, json).await;
        Ok(())
    }

    pub async fn record_activity(&self, record: ActivityRecord) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let mut pending = state.pending.clone();
        pending.push(record);
        let json = self.persist(StateKey::PendingActivity, &pending).await?;
        state.pending = pending;
        self.post_state(StateKey::PendingActivity, json).await;
        Ok(())
    }

    /// Mark the records a background sync delivered and drop them from the queue.
    ///
    /// Returns how many records were acknowledged.
    pub async fn apply_sync_completed(&self, acks: &[ActivityAck]) -> Result<usize, Error> {
        let mut state = self.state.lock().await;
        let mut pending = state.pending.clone();
        let mut marked = 0;
        for record in pending.iter_mut() {
            if !record.acknowledged && acks.contains(&record.ack()) {
                record.acknowledged = true;
                marked += 1;
            }
        }
        if marked == 0 {
            return Ok(0);
        }
        pending.retain(|r| !r.acknowledged);
        let json = self.persist(StateKey::PendingActivity, &pending).await?;
        state.pending = pending;
        self.post_state(StateKey::PendingActivity, json).await;
        tracing::info!(acknowledged = marked, remaining = state.pending.len(), "activity acknowledged");
        Ok(marked)
    }

    /// Push every replicated key to the worker.
    pub async fn resync(&self) -> Result<(), Error> {
        let state = self.state.lock().await;
        self.push(StateKey::LockedItems, &state.locked).await?;
        self.push(StateKey::PendingActivity, &state.pending).await?;
        self.push(StateKey::ContentIndex, &state.index).await
    }

    /// React to a worker broadcast.
    pub async fn handle_broadcast(&self, event: &WorkerBroadcast) -> Result<(), Error> {
        match event {
            WorkerBroadcast::SwActivated { version } => {
                tracing::info!(%version, "worker activated; resynchronizing");
                self.resync().await
            }
            WorkerBroadcast::SyncCompleted { acknowledged } => {
                self.apply_sync_completed(acknowledged).await.map(|_| ())
            }
            WorkerBroadcast::StartupUpdatesDetected { stale_caches } => {
                tracing::info!(?stale_caches, "worker removed caches from a previous version");
                Ok(())
            }
            WorkerBroadcast::VersionActivated { version } => {
                tracing::info!(%version, "new worker version active");
                Ok(())
            }
            WorkerBroadcast::CacheCleared => {
                tracing::info!("worker caches cleared");
                Ok(())
            }
        }
    }

    async fn persist<T: Serialize>(&self, key: StateKey, value: &T) -> Result<serde_json::Value, Error> {
        let json = serde_json::to_value(value).map_err(|e| Error::InvalidInput(format!("{key}: {e}")))?;
        self.db.kv_put(key.as_str(), &json).await?;
        Ok(json)
    }

    async fn push<T: Serialize>(&self, key: StateKey, value: &T) -> Result<(), Error> {
        let json = serde_json::to_value(value).map_err(|e| Error::InvalidInput(format!("{key}: {e}")))?;
        self.post_state(key, json).await;
        Ok(())
    }

    async fn post_state(&self, key: StateKey, value: serde_json::Value) {
        if let Err(e) = self.worker.post(WorkerRequest::UpdateSwState { key, value }).await {
            tracing::warn!(%key, error = %e, "state not replicated; worker will resync on activation");
        }
    }

    pub async fn cached_books(&self) -> Result<Vec<CachedBook>, BrokerError> {
        match self.worker.call(WorkerRequest::GetCachedBooks, self.timeout).await? {
            WorkerReply::CachedBooksList { books } => Ok(books),
            other => Err(BrokerError::UnexpectedReply { request: "GET_CACHED_BOOKS", got: other.type_name() }),
        }
    }

    /// Store a document in the worker's content partition.
    pub async fn cache_book(&self, url: &str, content: Vec<u8>) -> Result<(), BrokerError> {
        let request = WorkerRequest::CacheBookPdf { url: url.to_string(), content };
        match self.worker.call(request, self.timeout).await? {
            WorkerReply::BookCacheResult { success: true, .. } => Ok(()),
            WorkerReply::BookCacheResult { success: false, error } => Err(BrokerError::Rejected {
                request: "CACHE_BOOK_PDF",
                reason: error.unwrap_or_else(|| "unknown error".to_string()),
            }),
            other => Err(BrokerError::UnexpectedReply { request: "CACHE_BOOK_PDF", got: other.type_name() }),
        }
    }

    /// Remove a document from the worker's content partition.
    ///
    /// Returns false if it was not cached.
    pub async fn delete_book(&self, url: &str) -> Result<bool, BrokerError> {
        let request = WorkerRequest::DeleteCachedBook { url: url.to_string() };
        match self.worker.call(request, self.timeout).await? {
            WorkerReply::BookDeleteResult { success } => Ok(success),
            other => Err(BrokerError::UnexpectedReply { request: "DELETE_CACHED_BOOK", got: other.type_name() }),
        }
    }

    pub async fn clear_cache(&self) -> Result<(), BrokerError> {
        self.worker.post(WorkerRequest::ClearCache).await
    }

    pub async fn skip_waiting(&self) -> Result<(), BrokerError> {
        self.worker.post(WorkerRequest::SkipWaiting).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::broker::{self, WorkerInbox};
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn record(subject: &str, ts: &str) -> ActivityRecord {
        ActivityRecord {
            subject_id: subject.into(),
            duration_secs: 30,
            counters: BTreeMap::new(),
            timestamp: ts.into(),
            acknowledged: false,
        }
    }

    async fn session() -> (PageSession, WorkerInbox, CacheDb) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let (handle, inbox) = broker::channel(16);
        let page = PageSession::load(db.clone(), handle, TIMEOUT).await.unwrap();
        (page, inbox, db)
    }

    async fn next_update(inbox: &mut WorkerInbox) -> (StateKey, serde_json::Value) {
        match inbox.recv().await.unwrap().message {
            WorkerRequest::UpdateSwState { key, value } => (key, value),
            other => panic!("expected UPDATE_SW_STATE, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_lock_persists_then_replicates() {
        let (page, mut inbox, db) = session().await;

        assert!(page.lock("moby-dick").await.unwrap());
        assert!(!page.lock("moby-dick").await.unwrap());

        assert_eq!(db.kv_get("locked-items").await.unwrap(), Some(json!(["moby-dick"])));
        assert_eq!(next_update(&mut inbox).await, (StateKey::LockedItems, json!(["moby-dick"])));
        assert!(page.is_locked("moby-dick").await);
    }

    #[tokio::test]
    async fn test_unlock() {
        let (page, mut inbox, _db) = session().await;
        page.lock("a").await.unwrap();
        next_update(&mut inbox).await;

        assert!(page.unlock("a").await.unwrap());
        assert!(!page.unlock("a").await.unwrap());
        assert_eq!(next_update(&mut inbox).await, (StateKey::LockedItems, json!([])));
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let (page, _inbox, db) = session().await;
        page.lock("a").await.unwrap();
        page.record_activity(record("a", "2026-01-01T00:00:00Z")).await.unwrap();
        page.register_content("a", "/files/1.pdf").await.unwrap();

        let (handle, _inbox2) = broker::channel(4);
        let reloaded = PageSession::load(db, handle, TIMEOUT).await.unwrap();
        assert!(reloaded.is_locked("a").await);
        assert_eq!(reloaded.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_completed_acknowledges_only_named_records() {
        let (page, mut inbox, _db) = session().await;
        let first = record("a", "2026-01-01T00:00:00Z");
        let second = record("b", "2026-01-02T00:00:00Z");
        page.record_activity(first.clone()).await.unwrap();
        page.record_activity(second.clone()).await.unwrap();
        next_update(&mut inbox).await;
        next_update(&mut inbox).await;

        let event = WorkerBroadcast::SyncCompleted { acknowledged: vec![first.ack()] };
        page.handle_broadcast(&event).await.unwrap();

        assert_eq!(page.pending().await, vec![second]);
        let (key, value) = next_update(&mut inbox).await;
        assert_eq!(key, StateKey::PendingActivity);
        assert_eq!(value.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_ack_changes_nothing() {
        let (page, _inbox, _db) = session().await;
        page.record_activity(record("a", "t1")).await.unwrap();

        let stranger = ActivityAck { subject_id: "z".into(), timestamp: "t9".into() };
        assert_eq!(page.apply_sync_completed(&[stranger]).await.unwrap(), 0);
        assert_eq!(page.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_activation_triggers_resync() {
        let (page, mut inbox, _db) = session().await;
        page.lock("a").await.unwrap();
        next_update(&mut inbox).await;

        page.handle_broadcast(&WorkerBroadcast::SwActivated { version: "v2".into() }).await.unwrap();

        let mut keys = Vec::new();
        for _ in 0..3 {
            keys.push(next_update(&mut inbox).await.0);
        }
        assert_eq!(keys, StateKey::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_mutation_succeeds_without_worker() {
        let (page, inbox, db) = session().await;
        drop(inbox);

        assert!(page.lock("a").await.unwrap());
        assert_eq!(db.kv_get("locked-items").await.unwrap(), Some(json!(["a"])));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_session_unchanged() {
        let (page, mut inbox, db) = session().await;
        page.lock("a").await.unwrap();
        page.record_activity(record("a", "t1")).await.unwrap();
        next_update(&mut inbox).await;
        next_update(&mut inbox).await;

        db.clone().close().await.unwrap();

        assert!(page.lock("b").await.is_err());
        assert!(!page.is_locked("b").await);
        // a retry attempts the write again instead of reporting "already locked"
        assert!(page.lock("b").await.is_err());
        assert!(page.unlock("a").await.is_err());
        assert!(page.is_locked("a").await);
        assert!(page.record_activity(record("b", "t2")).await.is_err());
        assert_eq!(page.pending().await.len(), 1);
        assert!(page.register_content("a", "/files/1.pdf").await.is_err());

        // nothing was replicated
        drop(page);
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cache_book_rejection_is_surfaced() {
        let (page, mut inbox, _db) = session().await;
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                if let Some(port) = envelope.reply {
                    port.send(WorkerReply::BookCacheResult { success: false, error: Some("disk full".into()) });
                }
            }
        });

        let result = page.cache_book("/books/a.pdf", b"%PDF".to_vec()).await;
        assert!(matches!(result, Err(BrokerError::Rejected { reason, .. }) if reason == "disk full"));
    }

    #[tokio::test]
    async fn test_calls_time_out_without_listener() {
        let (page, _inbox, _db) = session().await;
        assert!(matches!(page.cached_books().await, Err(BrokerError::Timeout(_))));
    }
}

//! Worker-side replica of page-owned state.
//!
//! The page is authoritative for the locked-item set, the pending-activity
//! queue and the content index. It pushes each of them wholesale with
//! `UPDATE_SW_STATE`; the last write wins and nothing is merged. The worker
//! only reads its replica (for eviction and background sync) and loses it when
//! it stops, to be re-sent by the page on the next activation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Error;
use crate::cache::PinPolicy;
use crate::protocol::StateKey;

/// A reading-activity record queued by the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub subject_id: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
    /// RFC 3339.
    pub timestamp: String,
    #[serde(default)]
    pub acknowledged: bool,
}

impl ActivityRecord {
    pub fn ack(&self) -> ActivityAck {
        ActivityAck { subject_id: self.subject_id.clone(), timestamp: self.timestamp.clone() }
    }
}

/// Identity of an activity record confirmed by a background sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAck {
    pub subject_id: String,
    pub timestamp: String,
}

/// Logical content ID of a content URL by naming convention: the
/// percent-decoded last path segment without its extension.
///
/// `https://host/books/Moby%20Dick.pdf` → `Moby Dick`.
pub fn content_id_from_url(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let segment = path.rsplit('/').next().filter(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).map(|s| s.into_owned()).unwrap_or_else(|_| segment.to_string());
    let stem = match decoded.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => decoded,
    };
    Some(stem)
}

#[derive(Debug, Default)]
struct Replica {
    locked: BTreeSet<String>,
    pending: Vec<ActivityRecord>,
    /// content id → url, as supplied by the page.
    index: BTreeMap<String, String>,
}

/// The worker's replica store.
#[derive(Debug, Default)]
pub struct SyncState {
    inner: RwLock<Replica>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the replica for `key` with `value`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when `value` does not have the shape of
    /// `key`; the previous replica is kept in that case.
    pub async fn apply_state_update(&self, key: StateKey, value: serde_json::Value) -> Result<(), Error> {
        let invalid = |e: serde_json::Error| Error::InvalidInput(format!("{key}: {e}"));
        match key {
            StateKey::LockedItems => {
                let locked: BTreeSet<String> = serde_json::from_value(value).map_err(invalid)?;
                tracing::debug!(count = locked.len(), "replicated locked items");
                self.inner.write().await.locked = locked;
            }
            StateKey::PendingActivity => {
                let pending: Vec<ActivityRecord> = serde_json::from_value(value).map_err(invalid)?;
                tracing::debug!(count = pending.len(), "replicated pending activity");
                self.inner.write().await.pending = pending;
            }
            StateKey::ContentIndex => {
                let index: BTreeMap<String, String> = serde_json::from_value(value).map_err(invalid)?;
                tracing::debug!(count = index.len(), "replicated content index");
                self.inner.write().await.index = index;
            }
        }
        Ok(())
    }

    pub async fn locked_items(&self) -> BTreeSet<String> {
        self.inner.read().await.locked.clone()
    }

    pub async fn pending(&self) -> Vec<ActivityRecord> {
        self.inner.read().await.pending.clone()
    }

    /// Pending records not yet acknowledged by the page.
    pub async fn unacknowledged(&self) -> Vec<ActivityRecord> {
        self.inner
            .read()
            .await
            .pending
            .iter()
            .filter(|r| !r.acknowledged)
            .cloned()
            .collect()
    }

    /// Capture the current pin state for one eviction sweep.
    pub async fn pin_snapshot(&self) -> PinSnapshot {
        let replica = self.inner.read().await;
        PinSnapshot::new(replica.locked.clone(), &replica.index)
    }
}

/// Pin state captured at sweep start.
#[derive(Debug, Clone, Default)]
pub struct PinSnapshot {
    locked: BTreeSet<String>,
    url_to_id: HashMap<String, String>,
}

impl PinSnapshot {
    pub fn new(locked: BTreeSet<String>, index: &BTreeMap<String, String>) -> Self {
        let url_to_id = index.iter().map(|(id, url)| (url.clone(), id.clone())).collect();
        Self { locked, url_to_id }
    }

    /// Logical content ID of a cached URL.
    ///
    /// An explicit index entry wins, matched on the full URL or on its path when
    /// the page registered a relative URL; otherwise the naming convention applies.
    pub fn content_id(&self, url: &str) -> Option<String> {
        if let Some(id) = self.url_to_id.get(url) {
            return Some(id.clone());
        }
        if let Ok(parsed) = url::Url::parse(url) {
            let path = match parsed.query() {
                Some(q) => format!("{}?{q}", parsed.path()),
                None => parsed.path().to_string(),
            };
            if let Some(id) = self.url_to_id.get(&path).or_else(|| self.url_to_id.get(parsed.path())) {
                return Some(id.clone());
            }
        }
        content_id_from_url(url)
    }
}

impl PinPolicy for PinSnapshot {
    fn is_pinned(&self, url: &str) -> bool {
        if self.locked.is_empty() {
            return false;
        }
        self.content_id(url).is_some_and(|id| self.locked.contains(&id))
    }
}

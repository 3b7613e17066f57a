//! Page ↔ worker message protocol.
//!
//! Every message is a JSON object with a `type` tag. Requests that expect an
//! answer are paired with exactly one reply type:
//!
//! | Request              | Reply                |
//! |----------------------|----------------------|
//! | `GET_CACHED_BOOKS`   | `CACHED_BOOKS_LIST`  |
//! | `CACHE_BOOK_PDF`     | `BOOK_CACHE_RESULT`  |
//! | `DELETE_CACHED_BOOK` | `BOOK_DELETE_RESULT` |
//! | `UPDATE_SW_STATE`    | none                 |
//! | `CLEAR_CACHE`        | none                 |
//! | `SKIP_WAITING`       | none                 |
//!
//! Broadcasts flow from the worker to every listening page without a reply channel.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sync::ActivityAck;

/// Replicated state keys owned by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateKey {
    #[serde(rename = "locked-items")]
    LockedItems,
    #[serde(rename = "pending-activity")]
    PendingActivity,
    #[serde(rename = "content-index")]
    ContentIndex,
}

impl StateKey {
    pub const ALL: [StateKey; 3] = [StateKey::LockedItems, StateKey::PendingActivity, StateKey::ContentIndex];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::LockedItems => "locked-items",
            StateKey::PendingActivity => "pending-activity",
            StateKey::ContentIndex => "content-index",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages sent from the page to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    GetCachedBooks,
    CacheBookPdf { url: String, content: Vec<u8> },
    DeleteCachedBook { url: String },
    UpdateSwState { key: StateKey, value: serde_json::Value },
    ClearCache,
    SkipWaiting,
}

impl WorkerRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerRequest::GetCachedBooks => "GET_CACHED_BOOKS",
            WorkerRequest::CacheBookPdf { .. } => "CACHE_BOOK_PDF",
            WorkerRequest::DeleteCachedBook { .. } => "DELETE_CACHED_BOOK",
            WorkerRequest::UpdateSwState { .. } => "UPDATE_SW_STATE",
            WorkerRequest::ClearCache => "CLEAR_CACHE",
            WorkerRequest::SkipWaiting => "SKIP_WAITING",
        }
    }

    /// Whether the worker answers this request on a reply channel.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            WorkerRequest::GetCachedBooks | WorkerRequest::CacheBookPdf { .. } | WorkerRequest::DeleteCachedBook { .. }
        )
    }
}

/// One entry of `CACHED_BOOKS_LIST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedBook {
    pub url: String,
    pub cached_at: String,
}

/// Replies sent once on a request's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
    CachedBooksList {
        books: Vec<CachedBook>,
    },
    BookCacheResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    BookDeleteResult {
        success: bool,
    },
}

impl WorkerReply {
    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerReply::CachedBooksList { .. } => "CACHED_BOOKS_LIST",
            WorkerReply::BookCacheResult { .. } => "BOOK_CACHE_RESULT",
            WorkerReply::BookDeleteResult { .. } => "BOOK_DELETE_RESULT",
        }
    }

    /// Whether this reply type is the one paired with `request`.
    pub fn answers(&self, request: &WorkerRequest) -> bool {
        matches!(
            (request, self),
            (WorkerRequest::GetCachedBooks, WorkerReply::CachedBooksList { .. })
                | (WorkerRequest::CacheBookPdf { .. }, WorkerReply::BookCacheResult { .. })
                | (WorkerRequest::DeleteCachedBook { .. }, WorkerReply::BookDeleteResult { .. })
        )
    }
}

/// One-way notifications from the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerBroadcast {
    /// Partitions from another version were found (and removed) at activation.
    #[serde(rename_all = "camelCase")]
    StartupUpdatesDetected { stale_caches: Vec<String> },
    SwActivated { version: String },
    /// A new version replaced a previous one.
    VersionActivated { version: String },
    /// Activity records the sync endpoint confirmed. The page marks them acknowledged.
    SyncCompleted { acknowledged: Vec<ActivityAck> },
    CacheCleared,
}

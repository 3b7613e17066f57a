//! GET_CACHED_BOOKS, CACHE_BOOK_PDF and DELETE_CACHED_BOOK.
//!
//! Book URLs from the page may be relative; they are canonicalized against the
//! configured origin so they share cache keys with intercepted requests.

use folio_client::fetch::{cache_key, canonicalize};
use folio_client::router::mime_for_extension;
use folio_core::protocol::CachedBook;
use folio_core::{StoredResponse, WorkerReply};

use crate::worker::Worker;

fn content_type_for(path: &str) -> &'static str {
    path.rsplit_once('.')
        .and_then(|(_, ext)| mime_for_extension(ext))
        .unwrap_or("application/octet-stream")
}

/// List the content partition, oldest first.
pub async fn list_impl(worker: &Worker) -> WorkerReply {
    let books = match worker.router().content().entries().await {
        Ok(entries) => entries
            .into_iter()
            .map(|e| CachedBook { url: e.url, cached_at: e.cached_at })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "could not list cached books");
            Vec::new()
        }
    };
    WorkerReply::CachedBooksList { books }
}

/// Store a document supplied by the page, then sweep the content partition.
pub async fn cache_impl(worker: &Worker, url: &str, content: Vec<u8>) -> WorkerReply {
    let router = worker.router();
    let url = match canonicalize(router.rules().origin(), url) {
        Ok(url) => url,
        Err(e) => return WorkerReply::BookCacheResult { success: false, error: Some(format!("INVALID_URL: {e}")) },
    };

    let key = cache_key(&url);
    let size = content.len();
    let stored = StoredResponse::new(200, Some(content_type_for(url.path())), content);
    if let Err(e) = router.content().put("GET", &key, &stored).await {
        tracing::warn!(%url, error = %e, "failed to cache book");
        return WorkerReply::BookCacheResult { success: false, error: Some(e.to_string()) };
    }

    match router.sweep_content().await {
        // only possible when locked items already fill the partition
        Ok(removed) if removed.contains(&key) => {
            tracing::warn!(%url, "book evicted at once; content partition is full of locked items");
            return WorkerReply::BookCacheResult {
                success: false,
                error: Some(format!("CACHE_FULL: every cached item is locked; {url} was not kept")),
            };
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "content sweep failed"),
    }
    tracing::info!(%url, bytes = size, "book cached");
    WorkerReply::BookCacheResult { success: true, error: None }
}

/// Remove a document. `success` is whether it was cached.
pub async fn delete_impl(worker: &Worker, url: &str) -> WorkerReply {
    let router = worker.router();
    let success = match canonicalize(router.rules().origin(), url) {
        Ok(url) => router
            .content()
            .delete("GET", &cache_key(&url))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(%url, error = %e, "failed to delete book");
                false
            }),
        Err(e) => {
            tracing::debug!(url, error = %e, "delete for invalid URL");
            false
        }
    };
    WorkerReply::BookDeleteResult { success }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use folio_client::MemoryNetwork;
    use folio_core::{AppConfig, Broadcaster, CacheDb, StateKey};
    use serde_json::json;

    async fn worker_with(content_max_items: usize) -> Arc<Worker> {
        let config =
            AppConfig { origin: "https://reader.example.com".into(), content_max_items, ..AppConfig::default() };
        let db = CacheDb::open_in_memory().await.unwrap();
        Worker::new(config, db, Arc::new(MemoryNetwork::new()), Broadcaster::detached()).await.unwrap()
    }

    async fn worker() -> Arc<Worker> {
        worker_with(10).await
    }

    fn listed(reply: WorkerReply) -> Vec<String> {
        let WorkerReply::CachedBooksList { books } = reply else { panic!("wrong reply") };
        books.into_iter().map(|b| b.url).collect()
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("/books/a.pdf"), "application/pdf");
        assert_eq!(content_type_for("/books/a.EPUB"), "application/epub+zip");
        assert_eq!(content_type_for("/books/raw"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_relative_and_absolute_urls_share_an_entry() {
        let w = worker().await;
        cache_impl(&w, "/books/a.pdf", vec![1]).await;
        cache_impl(&w, "https://reader.example.com/books/a.pdf#page=3", vec![2]).await;

        assert_eq!(listed(list_impl(&w).await), vec!["https://reader.example.com/books/a.pdf"]);
    }

    #[tokio::test]
    async fn test_cache_rejects_invalid_url() {
        let w = worker().await;
        let reply = cache_impl(&w, "ftp://example.com/a.pdf", vec![1]).await;
        assert!(matches!(reply, WorkerReply::BookCacheResult { success: false, error: Some(_) }));
    }

    #[tokio::test]
    async fn test_cache_fails_when_locked_items_fill_partition() {
        let w = worker_with(3).await;
        w.state().apply_state_update(StateKey::LockedItems, json!(["p1", "p2", "p3"])).await.unwrap();
        for name in ["p1", "p2", "p3"] {
            let reply = cache_impl(&w, &format!("/books/{name}.pdf"), vec![1]).await;
            assert_eq!(reply, WorkerReply::BookCacheResult { success: true, error: None });
        }

        let reply = cache_impl(&w, "/books/new.pdf", vec![2]).await;
        let WorkerReply::BookCacheResult { success, error } = reply else { panic!("wrong reply") };
        assert!(!success);
        assert!(error.unwrap().starts_with("CACHE_FULL"));

        let urls = listed(list_impl(&w).await);
        assert_eq!(urls.len(), 3);
        assert!(!urls.contains(&"https://reader.example.com/books/new.pdf".to_string()));
    }

    #[tokio::test]
    async fn test_cache_succeeds_when_an_unlocked_item_can_go() {
        let w = worker_with(2).await;
        w.state().apply_state_update(StateKey::LockedItems, json!(["p1"])).await.unwrap();
        cache_impl(&w, "/books/p1.pdf", vec![1]).await;
        cache_impl(&w, "/books/old.pdf", vec![1]).await;

        let reply = cache_impl(&w, "/books/new.pdf", vec![2]).await;
        assert_eq!(reply, WorkerReply::BookCacheResult { success: true, error: None });
        assert_eq!(
            listed(list_impl(&w).await),
            vec!["https://reader.example.com/books/p1.pdf", "https://reader.example.com/books/new.pdf"]
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_unsuccessful() {
        let w = worker().await;
        assert_eq!(delete_impl(&w, "/books/none.pdf").await, WorkerReply::BookDeleteResult { success: false });
        assert_eq!(delete_impl(&w, "").await, WorkerReply::BookDeleteResult { success: false });
    }
}

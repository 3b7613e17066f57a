//! CLEAR_CACHE.

use folio_core::WorkerBroadcast;

use crate::worker::Worker;

/// Empty both partitions of the current version and tell the pages.
pub async fn clear_impl(worker: &Worker) {
    let router = worker.router();
    for store in [router.shell(), router.content()] {
        match store.clear().await {
            Ok(count) => tracing::info!(partition = %store.name(), count, "partition cleared"),
            Err(e) => tracing::warn!(partition = %store.name(), error = %e, "failed to clear partition"),
        }
    }
    worker.broadcaster().send(WorkerBroadcast::CacheCleared);
}

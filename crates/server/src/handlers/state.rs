//! UPDATE_SW_STATE.

use folio_core::StateKey;

use crate::worker::Worker;

/// Replace the replica for `key`. A malformed value is logged and ignored.
pub async fn update_impl(worker: &Worker, key: StateKey, value: serde_json::Value) {
    if let Err(e) = worker.state().apply_state_update(key, value).await {
        tracing::warn!(%key, error = %e, "rejected state update");
    }
}

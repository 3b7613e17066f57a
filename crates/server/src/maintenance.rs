//! Periodic maintenance: eviction sweeps and background sync.
//!
//! Sweeps run on `maintenance_interval_secs` even when nothing was written, so
//! partitions left over their bound by a burst of concurrent writes are brought
//! back eventually. Each sweep is followed by a check that the offline document
//! is still in the shell. Background sync delivers unacknowledged activity records
//! on `sync_interval_secs` when a sync endpoint is configured.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use folio_client::{FetchClient, FetchConfig};
use folio_core::sync::ActivityAck;
use folio_core::{ActivityRecord, AppConfig, Broadcaster, Error, SyncState, WorkerBroadcast};

use crate::lifecycle::LifecycleState;
use crate::worker::Worker;

/// Destination for queued activity records.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Deliver `records`, returning the ones the destination accepted.
    async fn deliver(&self, records: &[ActivityRecord]) -> Result<Vec<ActivityAck>, Error>;
}

/// POSTs records as JSON to the configured endpoint.
///
/// The endpoint may answer `{"acknowledged": [{"subjectId", "timestamp"}, ...]}`
/// to accept a subset; any other 2xx answer accepts the whole batch.
pub struct HttpActivitySink {
    client: FetchClient,
    endpoint: String,
}

impl HttpActivitySink {
    pub fn new(client: FetchClient, endpoint: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into() }
    }

    /// Sink for `config.sync_endpoint`, or None when sync is disabled.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, Error> {
        let Some(endpoint) = config.sync_endpoint.as_deref() else {
            return Ok(None);
        };
        let client = FetchClient::new(FetchConfig::from(config))?;
        Ok(Some(Self::new(client, endpoint)))
    }
}

#[async_trait]
impl ActivitySink for HttpActivitySink {
    async fn deliver(&self, records: &[ActivityRecord]) -> Result<Vec<ActivityAck>, Error> {
        let body = json!({
            "records": records,
            "sentAt": chrono::Utc::now().to_rfc3339(),
        });
        let answer = self.client.post_json(&self.endpoint, &body).await?;
        Ok(accepted_records(&answer, records))
    }
}

/// Acks named in a sink's answer, restricted to what was sent.
fn accepted_records(answer: &serde_json::Value, sent: &[ActivityRecord]) -> Vec<ActivityAck> {
    let sent_acks: Vec<ActivityAck> = sent.iter().map(ActivityRecord::ack).collect();
    match answer.get("acknowledged") {
        Some(listed) => match serde_json::from_value::<Vec<ActivityAck>>(listed.clone()) {
            Ok(listed) => listed.into_iter().filter(|ack| sent_acks.contains(ack)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable acknowledgement list; treating batch as accepted");
                sent_acks
            }
        },
        None => sent_acks,
    }
}

/// Deliver unacknowledged records and announce the accepted ones.
///
/// The replica is left untouched; the page marks records acknowledged when it
/// receives `SYNC_COMPLETED` and pushes the new queue back.
pub async fn sync_activity(
    state: &SyncState, sink: &dyn ActivitySink, broadcaster: &Broadcaster,
) -> Result<Vec<ActivityAck>, Error> {
    let records = state.unacknowledged().await;
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let acknowledged = sink.deliver(&records).await?;
    tracing::info!(sent = records.len(), accepted = acknowledged.len(), "activity synced");
    if !acknowledged.is_empty() {
        broadcaster.send(WorkerBroadcast::SyncCompleted { acknowledged: acknowledged.clone() });
    }
    Ok(acknowledged)
}

/// Run sweeps and syncs forever. Abort the task to stop it.
pub async fn run(worker: Arc<Worker>, sink: Option<Arc<dyn ActivitySink>>) {
    let config = worker.config();
    let mut sweeps = interval_at(Instant::now() + config.maintenance_interval(), config.maintenance_interval());
    sweeps.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut syncs = interval_at(Instant::now() + config.sync_interval(), config.sync_interval());
    syncs.set_missed_tick_behavior(MissedTickBehavior::Delay);

    match sink {
        Some(_) => tracing::info!(every_secs = config.sync_interval_secs, "background sync enabled"),
        None => tracing::info!("no sync endpoint configured; background sync disabled"),
    }

    loop {
        tokio::select! {
            _ = sweeps.tick() => {
                if worker.lifecycle_state() != LifecycleState::Activated {
                    continue;
                }
                let report = worker.router().sweep_all().await;
                let offline_page = worker.router().ensure_offline_page().await;
                tracing::info!(
                    shell = report.shell.len(),
                    content = report.content.len(),
                    offline_page,
                    "maintenance sweep"
                );
            }
            _ = syncs.tick(), if sink.is_some() => {
                let Some(sink) = sink.as_deref() else { continue };
                if let Err(e) = sync_activity(worker.state(), sink, worker.broadcaster()).await {
                    tracing::warn!(error = %e, "background sync failed; will retry");
                }
            }
        }
    }
}

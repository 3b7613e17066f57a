//! folio-worker entry point.
//!
//! Boots the worker and serves the stdio transport. Logging goes to stderr to
//! avoid interfering with the JSON frames on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use folio_client::{FetchClient, FetchConfig, Network};
use folio_core::{AppConfig, CacheDb, broker};

mod error;
mod handler;
mod handlers;
mod lifecycle;
mod maintenance;
mod transport;
mod worker;

const INBOX_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(
        origin = %config.origin,
        version = %config.cache_version,
        db = %config.db_path.display(),
        "Starting folio-worker on stdio transport"
    );

    let db = CacheDb::open(&config.db_path).await.context("opening cache database")?;
    let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let sink = maintenance::HttpActivitySink::from_config(&config)?
        .map(|sink| Arc::new(sink) as Arc<dyn maintenance::ActivitySink>);

    let (handle, inbox) = broker::channel(INBOX_CAPACITY);
    let events = handle.subscribe();
    let worker = worker::Worker::new(config, db.clone(), network, inbox.broadcaster()).await?;
    tokio::spawn(Arc::clone(&worker).serve(inbox));

    worker.start().await.context("worker failed to start")?;
    let maintenance = tokio::spawn(maintenance::run(Arc::clone(&worker), sink));

    let transport = transport::StdioTransport::new(worker, handle);
    let result = transport
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), events)
        .await;

    maintenance.abort();
    result?;
    if let Err(e) = db.close().await {
        tracing::warn!(error = %e, "cache database did not close cleanly");
    }
    Ok(())
}

//! Worker lifecycle: install, activate, skip-waiting.
//!
//! ```text
//! Parsed → Installing → Installed → Activating → Activated
//!              └──────→ Redundant (install failed)
//! ```

use std::fmt;

use tokio::sync::watch;

use folio_client::RequestRouter;
use folio_client::fetch::{cache_key, canonicalize};
use folio_core::{AppConfig, Broadcaster, CacheDb, Error, WorkerBroadcast};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Observable lifecycle state.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self { tx: watch::Sender::new(LifecycleState::Parsed) }
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move from `from` to `to`. Returns false, changing nothing, when the
    /// current state is not `from`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        })
    }

    pub fn set(&self, to: LifecycleState) {
        self.tx.send_replace(to);
    }
}

/// URLs fetched into the shell partition at install: `precache` plus the offline document.
pub fn precache_paths(config: &AppConfig) -> Vec<String> {
    let mut paths = config.precache.clone();
    if !paths.contains(&config.offline_page) {
        paths.push(config.offline_page.clone());
    }
    paths
}

/// Pre-cache the shell. Any failed fetch or write fails the install.
///
/// Returns the number of cached documents.
pub async fn install(router: &RequestRouter, config: &AppConfig) -> Result<usize, Error> {
    let origin = router.rules().origin();
    let paths = precache_paths(config);

    for path in &paths {
        let url = canonicalize(origin, path).map_err(|e| Error::InstallFailed(format!("{path}: {e}")))?;
        let fetched = router
            .network()
            .fetch(&url, None)
            .await
            .map_err(|e| Error::InstallFailed(format!("{url}: {e}")))?;
        router
            .shell()
            .put("GET", &cache_key(&url), &fetched.to_stored())
            .await
            .map_err(|e| Error::InstallFailed(format!("{url}: {e}")))?;
        tracing::debug!(%url, "pre-cached");
    }

    tracing::info!(count = paths.len(), partition = %router.shell().name(), "shell pre-cached");
    Ok(paths.len())
}

/// Whether `name` has the shape `{app}-shell-{version}` or `{app}-content-{version}`.
fn is_app_partition(name: &str, app_name: &str) -> bool {
    let Some(rest) = name.strip_prefix(app_name).and_then(|r| r.strip_prefix('-')) else {
        return false;
    };
    ["shell-", "content-"]
        .iter()
        .any(|kind| rest.strip_prefix(kind).is_some_and(|version| !version.is_empty()))
}

/// Partitions of this app that belong to another version.
pub async fn stale_partitions(db: &CacheDb, config: &AppConfig) -> Result<Vec<String>, Error> {
    let current = config.current_cache_names();
    let names = db.partition_names().await?;
    Ok(names
        .into_iter()
        .filter(|name| is_app_partition(name, &config.app_name) && !current.contains(name))
        .collect())
}

/// Delete other versions' partitions.
///
/// Failures are logged and skipped. Returns the stale partition names found.
pub async fn remove_stale(db: &CacheDb, config: &AppConfig) -> Vec<String> {
    let stale = stale_partitions(db, config).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not list partitions; skipping cleanup");
        Vec::new()
    });

    for name in &stale {
        match db.delete_partition(name).await {
            Ok(_) => tracing::info!(partition = %name, "deleted stale partition"),
            Err(e) => tracing::warn!(partition = %name, error = %e, "failed to delete stale partition"),
        }
    }
    stale
}

/// Tell every page that `version` is active, and whether it replaced another.
pub fn announce(broadcaster: &Broadcaster, version: &str, stale: &[String]) {
    if !stale.is_empty() {
        broadcaster.send(WorkerBroadcast::StartupUpdatesDetected { stale_caches: stale.to_vec() });
        broadcaster.send(WorkerBroadcast::VersionActivated { version: version.to_string() });
    }
    broadcaster.send(WorkerBroadcast::SwActivated { version: version.to_string() });
}

//! Core types and shared functionality for folio.
//!
//! This crate provides:
//! - Named cache partitions with a SQLite backend and pin-aware eviction
//! - The page ↔ worker message protocol and its broker channels
//! - The worker's replica of page-owned state
//! - Unified error types
//! - Configuration structures

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod protocol;
pub mod sync;

pub use broker::{BrokerError, Broadcaster, WorkerHandle, WorkerInbox};
pub use cache::{CacheDb, CacheStore, StoredResponse};
pub use config::AppConfig;
pub use error::Error;
pub use protocol::{StateKey, WorkerBroadcast, WorkerReply, WorkerRequest};
pub use sync::{ActivityRecord, SyncState};

//! SQLite-backed cache partitions.
//!
//! This module provides durable, named cache partitions using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Canonical request keys using SHA-256 hashing
//! - Insertion-ordered entries with FIFO, pin-aware eviction
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - A small key-value table for page-owned state

pub mod connection;
pub mod eviction;
pub mod hash;
pub mod kv;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use connection::CacheDb;
pub use eviction::{NoPins, PinPolicy};
pub use store::{CacheEntry, CacheStore, EntryMeta, StoredResponse};

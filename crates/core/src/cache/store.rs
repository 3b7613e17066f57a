//! Named cache partitions.
//!
//! A `CacheStore` is a handle to one partition inside the shared `CacheDb`.
//! Entries are keyed by the canonical request key and carry a per-partition
//! insertion sequence number used for FIFO eviction. Re-inserting an existing
//! key replaces the payload but keeps the original sequence number.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

use super::connection::CacheDb;
use super::eviction::{self, PinPolicy};
use super::hash::compute_request_key;
use crate::Error;

/// A response payload as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl StoredResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        let mut headers = BTreeMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct.to_string());
        }
        Self { status, headers, body: body.into() }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

/// A full cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub url: String,
    pub method: String,
    pub response: StoredResponse,
    pub seq: i64,
    pub cached_at: String,
}

/// Entry metadata without the body, in insertion order when listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: String,
    pub url: String,
    pub seq: i64,
    pub cached_at: String,
}

/// Handle to a single named partition.
#[derive(Clone, Debug)]
pub struct CacheStore {
    db: CacheDb,
    name: Arc<str>,
}

impl CacheDb {
    /// Open (creating if needed) the partition called `name`.
    pub async fn open_partition(&self, name: &str) -> Result<CacheStore, Error> {
        let owned = name.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                ensure_partition(conn, &owned)?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
        Ok(CacheStore { db: self.clone(), name: Arc::from(name) })
    }

    /// Names of every partition in the database.
    pub async fn partition_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a partition and all its entries.
    ///
    /// Returns false if no partition had that name.
    pub async fn delete_partition(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_entries WHERE partition = ?1", params![name])?;
                let removed = tx.execute("DELETE FROM partitions WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
            .map_err(Error::from)
    }
}

fn ensure_partition(conn: &rusqlite::Connection, name: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO partitions (name, next_seq, created_at) VALUES (?1, 1, ?2)",
        params![name, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

impl CacheStore {
    /// Partition name, including its version tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact-match lookup.
    pub async fn match_request(&self, method: &str, url: &str) -> Result<Option<CacheEntry>, Error> {
        let key = compute_request_key(method, url);
        let partition = self.name.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let row = conn
                    .query_row(
                        "SELECT key_hash, url, method, status, headers_json, body, seq, cached_at
                         FROM cache_entries WHERE partition = ?1 AND key_hash = ?2",
                        params![partition, key],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, u16>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, Vec<u8>>(5)?,
                                row.get::<_, i64>(6)?,
                                row.get::<_, String>(7)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((key, url, method, status, headers_json, body, seq, cached_at)) = row else {
                    return Ok(None);
                };
                let headers = serde_json::from_str(&headers_json)
                    .map_err(|e| Error::CorruptEntry(format!("{url}: headers: {e}")))?;

                Ok(Some(CacheEntry {
                    key,
                    url,
                    method,
                    response: StoredResponse { status, headers, body: Bytes::from(body) },
                    seq,
                    cached_at,
                }))
            })
            .await
            .map_err(Error::from)
    }

    /// GET lookup shortcut.
    pub async fn match_url(&self, url: &str) -> Result<Option<CacheEntry>, Error> {
        self.match_request("GET", url).await
    }

    /// Insert or replace an entry.
    ///
    /// A new key takes the partition's next sequence number; an existing key
    /// keeps its sequence number so refreshing an entry does not make it younger.
    pub async fn put(&self, method: &str, url: &str, response: &StoredResponse) -> Result<(), Error> {
        let key = compute_request_key(method, url);
        let partition = self.name.to_string();
        let method = method.to_ascii_uppercase();
        let url = url.to_string();
        let status = response.status;
        let headers_json =
            serde_json::to_string(&response.headers).map_err(|e| Error::InvalidInput(format!("headers: {e}")))?;
        let body = response.body.to_vec();
        let cached_at = chrono::Utc::now().to_rfc3339();

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                ensure_partition(&tx, &partition)?;

                let updated = tx.execute(
                    "UPDATE cache_entries
                     SET url = ?3, method = ?4, status = ?5, headers_json = ?6, body = ?7, cached_at = ?8
                     WHERE partition = ?1 AND key_hash = ?2",
                    params![partition, key, url, method, status, headers_json, body, cached_at],
                )?;

                if updated == 0 {
                    let seq: i64 =
                        tx.query_row("SELECT next_seq FROM partitions WHERE name = ?1", params![partition], |row| {
                            row.get(0)
                        })?;
                    tx.execute(
                        "INSERT INTO cache_entries
                         (partition, key_hash, url, method, status, headers_json, body, seq, cached_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![partition, key, url, method, status, headers_json, body, seq, cached_at],
                    )?;
                    tx.execute("UPDATE partitions SET next_seq = ?2 WHERE name = ?1", params![partition, seq + 1])?;
                }

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one entry. Returns whether it existed.
    pub async fn delete(&self, method: &str, url: &str) -> Result<bool, Error> {
        let key = compute_request_key(method, url);
        let partition = self.name.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE partition = ?1 AND key_hash = ?2",
                    params![partition, key],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove every entry, keeping the partition itself.
    ///
    /// Returns the number of deleted entries.
    pub async fn clear(&self) -> Result<u64, Error> {
        let partition = self.name.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE partition = ?1", params![partition])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Entry metadata in insertion order (oldest first).
    pub async fn entries(&self) -> Result<Vec<EntryMeta>, Error> {
        let partition = self.name.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<EntryMeta>, Error> {
                Ok(list_entries(conn, &partition)?)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn len(&self) -> Result<usize, Error> {
        let partition = self.name.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE partition = ?1",
                    params![partition],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }

    /// Trim the partition toward `max_items`, never removing pinned entries.
    ///
    /// Reads the current keys, plans and deletes in a single database call, so
    /// concurrent sweeps each see the state left by the previous one. Returns the
    /// URLs that were removed, oldest first.
    pub async fn enforce_bound<P>(&self, max_items: usize, pins: P) -> Result<Vec<String>, Error>
    where
        P: PinPolicy + Send + 'static,
    {
        let partition = self.name.to_string();
        let removed = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                let entries = list_entries(&tx, &partition)?;
                let victims = eviction::plan(&entries, max_items, &pins);

                let mut removed = Vec::with_capacity(victims.len());
                for victim in victims {
                    tx.execute(
                        "DELETE FROM cache_entries WHERE partition = ?1 AND key_hash = ?2",
                        params![partition, victim.key],
                    )?;
                    removed.push(victim.url.clone());
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(Error::from)?;

        if !removed.is_empty() {
            tracing::debug!(partition = %self.name, count = removed.len(), "evicted entries");
        }
        Ok(removed)
    }
}

fn list_entries(conn: &rusqlite::Connection, partition: &str) -> Result<Vec<EntryMeta>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT key_hash, url, seq, cached_at FROM cache_entries
         WHERE partition = ?1 ORDER BY seq ASC",
    )?;
    let entries = stmt
        .query_map(params![partition], |row| {
            Ok(EntryMeta { key: row.get(0)?, url: row.get(1)?, seq: row.get(2)?, cached_at: row.get(3)? })
        })?
        .collect::<Result<Vec<_>, _>>();
    entries
}

//! Key-value state operations.
//!
//! Durable JSON values keyed by name. The page session persists its
//! authoritative locked-item set and activity queue here.

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

impl CacheDb {
    /// Get a stored value by key.
    ///
    /// Returns None if the key doesn't exist.
    pub async fn kv_get(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        let key = key.to_string();
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let raw = conn
                    .query_row("SELECT value_json FROM kv_state WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(Error::from)?;

        raw.map(|json| serde_json::from_str(&json).map_err(|e| Error::CorruptEntry(format!("kv value: {e}"))))
            .transpose()
    }

    /// Insert or replace a stored value.
    ///
    /// Uses UPSERT semantics: inserts if the key doesn't exist, replaces the value if it does.
    pub async fn kv_put(&self, key: &str, value: &serde_json::Value) -> Result<(), Error> {
        let key = key.to_string();
        let value_json = value.to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO kv_state (key, value_json, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value_json = excluded.value_json,
                        updated_at = excluded.updated_at",
                    params![key, value_json, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.kv_put("locked-items", &json!(["moby-dick"])).await.unwrap();

        let value = db.kv_get("locked-items").await.unwrap().unwrap();
        assert_eq!(value, json!(["moby-dick"]));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.kv_get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.kv_put("pending-activity", &json!([{"subjectId": "a"}])).await.unwrap();
        db.kv_put("pending-activity", &json!([])).await.unwrap();

        assert_eq!(db.kv_get("pending-activity").await.unwrap().unwrap(), json!([]));
    }
}

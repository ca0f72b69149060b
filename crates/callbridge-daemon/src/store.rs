//! Buffered record store
//!
//! Call-detail records and recording jobs wait here between the switch-side
//! event handler that produces them and the drain pipeline that delivers
//! them. The store is an ordered key-value buffer: insertion order is the
//! delivery order, and a record stays selectable until the pipeline
//! explicitly deletes it after confirmed delivery.

use async_trait::async_trait;
use callbridge_common::{BridgeError, RecordKind, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// A pending record together with its store-assigned key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: i64,
    pub payload: String,
}

/// Ordered buffer of pending records, partitioned by kind
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Append a record; returns the assigned key. Keys grow monotonically
    /// and are never reused, even after deletes.
    async fn insert(&self, kind: RecordKind, payload: &str) -> Result<i64>;

    /// Up to `limit` oldest pending records of `kind`, in insertion order.
    async fn select_oldest(&self, kind: RecordKind, limit: u32) -> Result<Vec<StoredRecord>>;

    /// Delete one record by key; returns the number of rows affected.
    async fn delete(&self, kind: RecordKind, key: i64) -> Result<u64>;

    /// Number of pending records of `kind`.
    async fn count(&self, kind: RecordKind) -> Result<i64>;
}

fn store_err(err: sqlx::Error) -> BridgeError {
    BridgeError::Store(err.to_string())
}

/// SQLite-backed [`RecordStore`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(store_err)?;
        Self::init(pool).await
    }

    /// In-memory store for tests. Single connection, since every SQLite
    /// in-memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(store_err)?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        // AUTOINCREMENT keeps keys monotonic across deletes
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(store_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_kind ON records (kind, id)")
            .execute(&pool)
            .await
            .map_err(store_err)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, kind: RecordKind, payload: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO records (kind, payload) VALUES (?1, ?2)")
            .bind(kind.as_str())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn select_oldest(&self, kind: RecordKind, limit: u32) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, payload FROM records WHERE kind = ?1 ORDER BY id ASC LIMIT ?2",
        )
        .bind(kind.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredRecord {
                    key: row.try_get("id").map_err(store_err)?,
                    payload: row.try_get("payload").map_err(store_err)?,
                })
            })
            .collect()
    }

    async fn delete(&self, kind: RecordKind, key: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM records WHERE kind = ?1 AND id = ?2")
            .bind(kind.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, kind: RecordKind) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE kind = ?1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_select_returns_oldest_first() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store.insert(RecordKind::Cdr, "a").await.unwrap();
        let second = store.insert(RecordKind::Cdr, "b").await.unwrap();
        assert!(second > first);

        let records = store.select_oldest(RecordKind::Cdr, 10).await.unwrap();
        let payloads: Vec<&str> = records.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(payloads, vec!["a", "b"]);
        assert_eq!(records[0].key, first);
    }

    #[tokio::test]
    async fn test_select_respects_limit_and_kind() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        for i in 0..5 {
            store
                .insert(RecordKind::Cdr, &format!("cdr-{i}"))
                .await
                .unwrap();
        }
        store.insert(RecordKind::Recording, "rec-0").await.unwrap();

        let records = store.select_oldest(RecordKind::Cdr, 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, "cdr-0");

        let recordings = store.select_oldest(RecordKind::Recording, 10).await.unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].payload, "rec-0");
    }

    #[tokio::test]
    async fn test_delete_reports_affected_rows() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let key = store.insert(RecordKind::Cdr, "a").await.unwrap();

        assert_eq!(store.delete(RecordKind::Cdr, key).await.unwrap(), 1);
        assert_eq!(store.delete(RecordKind::Cdr, key).await.unwrap(), 0);
        assert_eq!(store.count(RecordKind::Cdr).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keys_stay_monotonic_after_delete() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert(RecordKind::Cdr, "a").await.unwrap();
        let last = store.insert(RecordKind::Cdr, "b").await.unwrap();
        store.delete(RecordKind::Cdr, last).await.unwrap();

        let next = store.insert(RecordKind::Cdr, "c").await.unwrap();
        assert!(next > last);
    }

    #[tokio::test]
    async fn test_count_is_per_kind() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert(RecordKind::Cdr, "a").await.unwrap();
        store.insert(RecordKind::Cdr, "b").await.unwrap();
        store.insert(RecordKind::Recording, "r").await.unwrap();

        assert_eq!(store.count(RecordKind::Cdr).await.unwrap(), 2);
        assert_eq!(store.count(RecordKind::Recording).await.unwrap(), 1);
    }
}

//! SQLite-backed persistence for the engine.
//!
//! # Design
//! - Reads used by the engine thread are served from an in-memory record cache guarded by an
//!   `RwLock`; cached records never carry metainfo or resume blobs.
//! - Mutations update the cache synchronously and queue the SQL write on the io worker, so
//!   callers on the engine thread never wait for disk.
//! - Startup loads are async and awaited before the engine starts ticking.
//! - A failed write is logged and counted; in-memory state stays authoritative.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tinytorrent_core::{AsyncTaskService, HistoryBucket, InfoHash, RpcId, SessionTotals};
use tracing::{debug, info, warn};

use crate::error::{DataError, DataResult};

/// Statistics key for lifetime uploaded bytes.
pub const STAT_UPLOADED_BYTES: &str = "uploadedBytes";
/// Statistics key for lifetime downloaded bytes.
pub const STAT_DOWNLOADED_BYTES: &str = "downloadedBytes";
/// Statistics key for lifetime seconds active.
pub const STAT_SECONDS_ACTIVE: &str = "secondsActive";
/// Statistics key for the number of sessions started.
pub const STAT_SESSION_COUNT: &str = "sessionCount";

/// Durable row describing one torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedTorrent {
    /// Info-hash, the primary key.
    pub hash: InfoHash,
    /// Save directory.
    pub save_path: PathBuf,
    /// Paused flag.
    pub paused: bool,
    /// Magnet URI the torrent was added from.
    pub magnet_uri: Option<String>,
    /// Raw `.torrent` bytes the torrent was added from.
    pub metainfo: Option<Vec<u8>>,
    /// Sidecar file holding metadata fetched from peers.
    pub metadata_path: Option<PathBuf>,
    /// Latest resume blob.
    pub resume_data: Option<Vec<u8>>,
    /// User labels.
    pub labels: Vec<String>,
    /// RPC id assigned to the torrent.
    pub rpc_id: Option<RpcId>,
    /// Unix seconds when added.
    pub added_at: i64,
}

impl PersistedTorrent {
    /// Copy without the metainfo and resume blobs.
    #[must_use]
    pub fn without_blobs(&self) -> Self {
        Self {
            metainfo: None,
            resume_data: None,
            ..self.clone()
        }
    }
}

enum ColumnValue {
    Text(String),
    Flag(bool),
    Integer(i64),
    Blob(Vec<u8>),
}

struct Inner {
    pool: SqlitePool,
    worker: AsyncTaskService,
    cache: RwLock<HashMap<InfoHash, PersistedTorrent>>,
    write_failures: AtomicU64,
}

/// Database handle plus record cache.
#[derive(Clone)]
pub struct PersistenceManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("cached", &self.cached_count())
            .field("write_failures", &self.write_failures())
            .finish_non_exhaustive()
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn encode_labels(labels: &[String]) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "[]".to_string())
}

fn decode_labels(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn decode_torrent(row: &SqliteRow) -> DataResult<PersistedTorrent> {
    let read = |source| DataError::QueryFailed {
        operation: "decode torrent row",
        source,
    };
    let hash_text: String = row.try_get("hash").map_err(read)?;
    let hash = InfoHash::from_hex(&hash_text).map_err(|_| DataError::Decode {
        field: "hash",
        value: hash_text.clone(),
    })?;
    let save_path: String = row.try_get("save_path").map_err(read)?;
    let metadata_path: Option<String> = row.try_get("metadata_path").map_err(read)?;
    let labels: String = row.try_get("labels").map_err(read)?;
    let rpc_id: Option<i64> = row.try_get("rpc_id").map_err(read)?;
    Ok(PersistedTorrent {
        hash,
        save_path: PathBuf::from(save_path),
        paused: row.try_get("paused").map_err(read)?,
        magnet_uri: row.try_get("magnet_uri").map_err(read)?,
        metainfo: row.try_get("metainfo").map_err(read)?,
        metadata_path: metadata_path
            .filter(|path| !path.is_empty())
            .map(PathBuf::from),
        resume_data: row.try_get("resume_data").map_err(read)?,
        labels: decode_labels(&labels),
        rpc_id: rpc_id
            .and_then(|id| RpcId::try_from(id).ok())
            .filter(|id| *id > 0),
        added_at: row.try_get("added_at").map_err(read)?,
    })
}

impl PersistenceManager {
    /// Open (creating if needed) the database file at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: &Path, worker: AsyncTaskService) -> DataResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "open database",
                source,
            })?;
        info!(path = %path.display(), "opened state database");
        Self::with_pool(pool, worker).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or migrated.
    pub async fn open_in_memory(worker: AsyncTaskService) -> DataResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|source| {
                DataError::QueryFailed {
                    operation: "parse database url",
                    source,
                }
            })?;
        // Every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "open database",
                source,
            })?;
        Self::with_pool(pool, worker).await
    }

    async fn with_pool(pool: SqlitePool, worker: AsyncTaskService) -> DataResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                worker,
                cache: RwLock::new(HashMap::new()),
                write_failures: AtomicU64::new(0),
            }),
        })
    }

    /// Wait until every queued write has been executed.
    pub async fn flush(&self) {
        self.inner.worker.wait_for_idle().await;
    }

    /// Writes that failed since startup.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.inner.write_failures.load(Ordering::Relaxed)
    }

    fn dispatch<F>(&self, operation: &'static str, write: F)
    where
        F: Future<Output = DataResult<()>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let accepted = self.inner.worker.submit(async move {
            if let Err(err) = write.await {
                inner.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(operation, error = %err, "persistence write failed");
            }
        });
        if !accepted {
            self.inner.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(operation, "persistence worker stopped; write dropped");
        }
    }

    fn pool(&self) -> SqlitePool {
        self.inner.pool.clone()
    }

    fn update_cached(&self, hash: &InfoHash, update: impl FnOnce(&mut PersistedTorrent)) {
        let mut cache = self
            .inner
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = cache.get_mut(hash) {
            update(record);
        }
    }

    /// Load every torrent record, blobs included, and prime the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails. Rows with an undecodable hash are skipped.
    pub async fn load_torrents(&self) -> DataResult<Vec<PersistedTorrent>> {
        let rows = sqlx::query(
            "SELECT hash, save_path, paused, magnet_uri, metainfo, metadata_path, resume_data, \
             labels, rpc_id, added_at FROM torrents ORDER BY added_at, hash",
        )
        .fetch_all(&self.inner.pool)
        .await
        .map_err(|source| DataError::QueryFailed {
            operation: "load torrents",
            source,
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_torrent(row) {
                Ok(record) => records.push(record),
                Err(err) => warn!(error = %err, "skipping unreadable torrent record"),
            }
        }

        let mut cache = self
            .inner
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cache.clear();
        for record in &records {
            cache.insert(record.hash, record.without_blobs());
        }
        info!(count = records.len(), "loaded persisted torrents");
        Ok(records)
    }

    /// Load every stored settings pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn load_settings(&self) -> DataResult<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(&self.inner.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load settings",
                source,
            })?;
        rows.iter()
            .map(|row| -> Result<(String, String), sqlx::Error> {
                let key: String = row.try_get("key")?;
                let value: String = row.try_get("value")?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|source| DataError::QueryFailed {
                operation: "decode settings",
                source,
            })
    }

    /// Load lifetime statistics and count this session.
    ///
    /// The incremented session count is written back before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read or written.
    pub async fn load_statistics(&self) -> DataResult<SessionTotals> {
        let rows = sqlx::query("SELECT key, value FROM statistics")
            .fetch_all(&self.inner.pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "load statistics",
                source,
            })?;
        let mut totals = SessionTotals::default();
        for row in &rows {
            let (Ok(key), Ok(value)) = (
                row.try_get::<String, _>("key"),
                row.try_get::<i64, _>("value"),
            ) else {
                continue;
            };
            let value = to_u64(value);
            match key.as_str() {
                STAT_UPLOADED_BYTES => totals.uploaded_bytes = value,
                STAT_DOWNLOADED_BYTES => totals.downloaded_bytes = value,
                STAT_SECONDS_ACTIVE => totals.seconds_active = value,
                STAT_SESSION_COUNT => totals.session_count = value,
                other => debug!(key = other, "ignoring unknown statistics key"),
            }
        }
        totals.session_count = totals.session_count.saturating_add(1);
        write_statistics(&self.inner.pool, totals).await?;
        Ok(totals)
    }

    /// Cached record for `hash`, without blobs.
    #[must_use]
    pub fn cached(&self, hash: &InfoHash) -> Option<PersistedTorrent> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    /// Number of cached records.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Insert or replace a torrent record.
    pub fn upsert_torrent(&self, record: PersistedTorrent) {
        self.inner
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.hash, record.without_blobs());
        let pool = self.pool();
        self.dispatch("upsert torrent", async move {
            sqlx::query(
                "INSERT INTO torrents (hash, save_path, paused, magnet_uri, metainfo, \
                 metadata_path, resume_data, labels, rpc_id, added_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(hash) DO UPDATE SET \
                 save_path = excluded.save_path, paused = excluded.paused, \
                 magnet_uri = excluded.magnet_uri, \
                 metainfo = COALESCE(excluded.metainfo, torrents.metainfo), \
                 metadata_path = COALESCE(excluded.metadata_path, torrents.metadata_path), \
                 resume_data = COALESCE(excluded.resume_data, torrents.resume_data), \
                 labels = excluded.labels, \
                 rpc_id = COALESCE(excluded.rpc_id, torrents.rpc_id), \
                 added_at = excluded.added_at",
            )
            .bind(record.hash.to_hex())
            .bind(path_text(&record.save_path))
            .bind(record.paused)
            .bind(record.magnet_uri)
            .bind(record.metainfo)
            .bind(record.metadata_path.as_deref().map(path_text))
            .bind(record.resume_data)
            .bind(encode_labels(&record.labels))
            .bind(record.rpc_id.map(i64::from))
            .bind(record.added_at)
            .execute(&pool)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "upsert torrent",
                source,
            })?;
            Ok(())
        });
    }

    /// Delete a torrent record.
    pub fn remove_torrent(&self, hash: &InfoHash) {
        self.inner
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hash);
        let pool = self.pool();
        let hash = hash.to_hex();
        self.dispatch("remove torrent", async move {
            sqlx::query("DELETE FROM torrents WHERE hash = ?")
                .bind(hash)
                .execute(&pool)
                .await
                .map_err(|source| DataError::QueryFailed {
                    operation: "remove torrent",
                    source,
                })?;
            Ok(())
        });
    }

    fn update_column(
        &self,
        operation: &'static str,
        sql: &'static str,
        hash: &InfoHash,
        value: ColumnValue,
    ) {
        let pool = self.pool();
        let hash = hash.to_hex();
        self.dispatch(operation, async move {
            let query = sqlx::query(sql);
            let query = match value {
                ColumnValue::Text(text) => query.bind(text),
                ColumnValue::Flag(flag) => query.bind(flag),
                ColumnValue::Integer(number) => query.bind(number),
                ColumnValue::Blob(bytes) => query.bind(bytes),
            };
            query
                .bind(hash)
                .execute(&pool)
                .await
                .map_err(|source| DataError::QueryFailed { operation, source })?;
            Ok(())
        });
    }

    /// Record a new save path.
    pub fn update_save_path(&self, hash: &InfoHash, path: &Path) {
        self.update_cached(hash, |record| record.save_path = path.to_path_buf());
        self.update_column(
            "update save path",
            "UPDATE torrents SET save_path = ? WHERE hash = ?",
            hash,
            ColumnValue::Text(path_text(path)),
        );
    }

    /// Record the paused flag.
    pub fn update_paused(&self, hash: &InfoHash, paused: bool) {
        self.update_cached(hash, |record| record.paused = paused);
        self.update_column(
            "update paused",
            "UPDATE torrents SET paused = ? WHERE hash = ?",
            hash,
            ColumnValue::Flag(paused),
        );
    }

    /// Record the label list.
    pub fn update_labels(&self, hash: &InfoHash, labels: &[String]) {
        self.update_cached(hash, |record| record.labels = labels.to_vec());
        self.update_column(
            "update labels",
            "UPDATE torrents SET labels = ? WHERE hash = ?",
            hash,
            ColumnValue::Text(encode_labels(labels)),
        );
    }

    /// Record the assigned RPC id.
    pub fn update_rpc_id(&self, hash: &InfoHash, id: RpcId) {
        self.update_cached(hash, |record| record.rpc_id = Some(id));
        self.update_column(
            "update rpc id",
            "UPDATE torrents SET rpc_id = ? WHERE hash = ?",
            hash,
            ColumnValue::Integer(i64::from(id)),
        );
    }

    /// Record the sidecar metadata location.
    pub fn update_metadata_path(&self, hash: &InfoHash, path: &Path) {
        self.update_cached(hash, |record| record.metadata_path = Some(path.to_path_buf()));
        self.update_column(
            "update metadata path",
            "UPDATE torrents SET metadata_path = ? WHERE hash = ?",
            hash,
            ColumnValue::Text(path_text(path)),
        );
    }

    /// Store a resume blob. The blob is not cached.
    pub fn update_resume_data(&self, hash: &InfoHash, data: Vec<u8>) {
        self.update_column(
            "update resume data",
            "UPDATE torrents SET resume_data = ? WHERE hash = ?",
            hash,
            ColumnValue::Blob(data),
        );
    }

    /// Replace the stored settings pairs.
    pub fn save_settings(&self, pairs: Vec<(&'static str, String)>) {
        let pool = self.pool();
        self.dispatch("save settings", async move {
            let failed = |source| DataError::QueryFailed {
                operation: "save settings",
                source,
            };
            let mut tx = pool.begin().await.map_err(failed)?;
            for (key, value) in pairs {
                sqlx::query(
                    "INSERT INTO settings (key, value) VALUES (?, ?) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
            }
            tx.commit().await.map_err(failed)?;
            Ok(())
        });
    }

    /// Store lifetime statistics.
    pub fn save_statistics(&self, totals: SessionTotals) {
        let pool = self.pool();
        self.dispatch("save statistics", async move {
            write_statistics(&pool, totals).await
        });
    }

    /// Write a history bucket. A bucket with the same start is merged.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn record_history_bucket(&self, bucket: HistoryBucket) -> DataResult<()> {
        write_history_bucket(&self.inner.pool, bucket).await
    }

    /// Buckets with `start <= timestamp <= end`, regrouped into `step`-second buckets.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn query_history(
        &self,
        start: i64,
        end: i64,
        step: i64,
    ) -> DataResult<Vec<HistoryBucket>> {
        let step = step.max(1);
        let rows = sqlx::query(
            "SELECT (timestamp / ?) * ? AS bucket, SUM(total_down) AS total_down, \
             SUM(total_up) AS total_up, MAX(peak_down) AS peak_down, MAX(peak_up) AS peak_up \
             FROM speed_history WHERE timestamp >= ? AND timestamp <= ? \
             GROUP BY bucket ORDER BY bucket",
        )
        .bind(step)
        .bind(step)
        .bind(start)
        .bind(end)
        .fetch_all(&self.inner.pool)
        .await
        .map_err(|source| DataError::QueryFailed {
            operation: "query history",
            source,
        })?;
        rows.iter()
            .map(|row| -> Result<HistoryBucket, sqlx::Error> {
                Ok(HistoryBucket {
                    timestamp: row.try_get("bucket")?,
                    total_down: to_u64(row.try_get("total_down")?),
                    total_up: to_u64(row.try_get("total_up")?),
                    peak_down: to_u64(row.try_get("peak_down")?),
                    peak_up: to_u64(row.try_get("peak_up")?),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|source| DataError::QueryFailed {
                operation: "decode history",
                source,
            })
    }

    /// Delete buckets older than `cutoff`, or every bucket when `cutoff` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_history(&self, cutoff: Option<i64>) -> DataResult<u64> {
        let result = match cutoff {
            Some(cutoff) => {
                sqlx::query("DELETE FROM speed_history WHERE timestamp < ?")
                    .bind(cutoff)
                    .execute(&self.inner.pool)
                    .await
            }
            None => {
                sqlx::query("DELETE FROM speed_history")
                    .execute(&self.inner.pool)
                    .await
            }
        }
        .map_err(|source| DataError::QueryFailed {
            operation: "delete history",
            source,
        })?;
        Ok(result.rows_affected())
    }

    /// Close the pool after draining queued writes.
    pub async fn close(&self) {
        self.flush().await;
        self.inner.pool.close().await;
    }
}

async fn write_statistics(pool: &SqlitePool, totals: SessionTotals) -> DataResult<()> {
    let failed = |source| DataError::QueryFailed {
        operation: "save statistics",
        source,
    };
    let mut tx = pool.begin().await.map_err(failed)?;
    for (key, value) in [
        (STAT_UPLOADED_BYTES, totals.uploaded_bytes),
        (STAT_DOWNLOADED_BYTES, totals.downloaded_bytes),
        (STAT_SECONDS_ACTIVE, totals.seconds_active),
        (STAT_SESSION_COUNT, totals.session_count),
    ] {
        sqlx::query(
            "INSERT INTO statistics (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(to_i64(value))
        .execute(&mut *tx)
        .await
        .map_err(failed)?;
    }
    tx.commit().await.map_err(failed)?;
    Ok(())
}

async fn write_history_bucket(pool: &SqlitePool, bucket: HistoryBucket) -> DataResult<()> {
    sqlx::query(
        "INSERT INTO speed_history (timestamp, total_down, total_up, peak_down, peak_up) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(timestamp) DO UPDATE SET \
         total_down = speed_history.total_down + excluded.total_down, \
         total_up = speed_history.total_up + excluded.total_up, \
         peak_down = MAX(speed_history.peak_down, excluded.peak_down), \
         peak_up = MAX(speed_history.peak_up, excluded.peak_up)",
    )
    .bind(bucket.timestamp)
    .bind(to_i64(bucket.total_down))
    .bind(to_i64(bucket.total_up))
    .bind(to_i64(bucket.peak_down))
    .bind(to_i64(bucket.peak_up))
    .execute(pool)
    .await
    .map_err(|source| DataError::QueryFailed {
        operation: "insert history bucket",
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    async fn manager() -> Result<PersistenceManager> {
        Ok(PersistenceManager::open_in_memory(AsyncTaskService::spawn("io")).await?)
    }

    fn record(byte: u8) -> PersistedTorrent {
        PersistedTorrent {
            hash: InfoHash::new([byte; 20]),
            save_path: PathBuf::from("/downloads"),
            magnet_uri: Some(format!("magnet:?xt=urn:btih:{}", "ab".repeat(20))),
            metainfo: Some(vec![1, 2, 3]),
            resume_data: Some(vec![9; 16]),
            labels: vec!["linux".to_string()],
            added_at: i64::from(byte),
            ..PersistedTorrent::default()
        }
    }

    #[tokio::test]
    async fn torrent_records_round_trip_and_cache_drops_blobs() -> Result<()> {
        let store = manager().await?;
        store.upsert_torrent(record(1));
        store.upsert_torrent(record(2));
        store.flush().await;

        let cached = store.cached(&InfoHash::new([1; 20])).expect("cached record");
        assert!(cached.metainfo.is_none());
        assert!(cached.resume_data.is_none());

        let loaded = store.load_torrents().await?;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].metainfo.as_deref(), Some([1, 2, 3].as_slice()));
        assert_eq!(loaded[0].labels, vec!["linux".to_string()]);
        assert_eq!(store.cached_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn column_updates_persist() -> Result<()> {
        let store = manager().await?;
        let hash = InfoHash::new([3; 20]);
        store.upsert_torrent(record(3));
        store.update_save_path(&hash, Path::new("/complete"));
        store.update_paused(&hash, true);
        store.update_labels(&hash, &["a".to_string(), "b".to_string()]);
        store.update_rpc_id(&hash, 7);
        store.update_metadata_path(&hash, Path::new("/state/metadata/x.torrent"));
        store.update_resume_data(&hash, vec![4, 5]);
        store.flush().await;

        let loaded = store.load_torrents().await?;
        let row = &loaded[0];
        assert_eq!(row.save_path, PathBuf::from("/complete"));
        assert!(row.paused);
        assert_eq!(row.labels.len(), 2);
        assert_eq!(row.rpc_id, Some(7));
        assert!(row.metadata_path.is_some());
        assert_eq!(row.resume_data.as_deref(), Some([4, 5].as_slice()));

        store.remove_torrent(&hash);
        store.flush().await;
        assert!(store.load_torrents().await?.is_empty());
        assert_eq!(store.write_failures(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn settings_and_statistics_persist() -> Result<()> {
        let store = manager().await?;
        store.save_settings(vec![("downloadPath", "/data".to_string())]);
        store.save_settings(vec![("downloadPath", "/srv".to_string())]);
        store.flush().await;
        assert_eq!(
            store.load_settings().await?,
            vec![("downloadPath".to_string(), "/srv".to_string())]
        );

        let first = store.load_statistics().await?;
        assert_eq!(first.session_count, 1);
        store.save_statistics(SessionTotals {
            uploaded_bytes: 10,
            downloaded_bytes: 20,
            seconds_active: 30,
            session_count: first.session_count,
        });
        store.flush().await;
        let second = store.load_statistics().await?;
        assert_eq!(second.session_count, 2);
        assert_eq!(second.downloaded_bytes, 20);
        Ok(())
    }

    #[tokio::test]
    async fn history_queries_regroup_and_delete() -> Result<()> {
        let store = manager().await?;
        for (timestamp, down) in [(60, 100), (120, 50), (180, 25), (240, 5)] {
            store
                .record_history_bucket(HistoryBucket {
                    timestamp,
                    total_down: down,
                    total_up: 1,
                    peak_down: down,
                    peak_up: 1,
                })
                .await?;
        }

        let buckets = store.query_history(0, 1_000, 120).await?;
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].timestamp, 0);
        assert_eq!(buckets[0].total_down, 100);
        assert_eq!(buckets[1].timestamp, 120);
        assert_eq!(buckets[1].total_down, 75);
        assert_eq!(buckets[1].peak_down, 50);

        assert_eq!(store.delete_history(Some(180)).await?, 2);
        assert_eq!(store.query_history(0, 1_000, 60).await?.len(), 2);
        assert_eq!(store.delete_history(None).await?, 2);
        Ok(())
    }
}

//! Speed-history bucketing and retention.
//!
//! # Design
//! - Bucket starts are aligned to the interval on wall-clock seconds; after a flush the next
//!   bucket starts at `previous + interval`, so buckets tile even when flushes run late.
//! - Flush timing is measured on the monotonic clock, retention cutoffs on the wall clock.
//! - Writes, retention deletes and reads all run on the history worker, so a read observes every
//!   write queued before it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tinytorrent_config::{HistoryConfig, MIN_HISTORY_INTERVAL_SECONDS};
use tinytorrent_core::{AsyncTaskService, HistoryBucket};
use tinytorrent_data::PersistenceManager;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// How often retention is enforced.
pub const RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

const SECONDS_PER_DAY: i64 = 86_400;

/// Storage for history buckets.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Persist a bucket, merging with an existing bucket at the same start.
    async fn insert_bucket(&self, bucket: HistoryBucket) -> anyhow::Result<()>;

    /// Buckets within `[start, end]`, regrouped into `step`-second buckets.
    async fn query_buckets(&self, start: i64, end: i64, step: i64)
    -> anyhow::Result<Vec<HistoryBucket>>;

    /// Delete buckets older than `cutoff`, or all of them. Returns rows removed.
    async fn delete_buckets(&self, cutoff: Option<i64>) -> anyhow::Result<u64>;
}

#[async_trait]
impl HistoryStore for PersistenceManager {
    async fn insert_bucket(&self, bucket: HistoryBucket) -> anyhow::Result<()> {
        Ok(self.record_history_bucket(bucket).await?)
    }

    async fn query_buckets(
        &self,
        start: i64,
        end: i64,
        step: i64,
    ) -> anyhow::Result<Vec<HistoryBucket>> {
        Ok(self.query_history(start, end, step).await?)
    }

    async fn delete_buckets(&self, cutoff: Option<i64>) -> anyhow::Result<u64> {
        Ok(self.delete_history(cutoff).await?)
    }
}

/// Start of the interval containing `wall_seconds`.
#[must_use]
pub fn align_to_interval(wall_seconds: i64, interval_seconds: i32) -> i64 {
    if interval_seconds <= 0 {
        return wall_seconds;
    }
    let interval = i64::from(interval_seconds);
    (wall_seconds / interval) * interval
}

fn normalize(config: HistoryConfig) -> HistoryConfig {
    HistoryConfig {
        interval_seconds: config.interval_seconds.max(MIN_HISTORY_INTERVAL_SECONDS),
        ..config
    }
}

/// Cloneable read and delete access that runs on the history worker.
#[derive(Clone)]
pub struct HistoryReader {
    store: Arc<dyn HistoryStore>,
    worker: AsyncTaskService,
}

impl std::fmt::Debug for HistoryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryReader")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl HistoryReader {
    async fn run<T, F, Fut>(&self, operation: &'static str, job: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn HistoryStore>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let accepted = self.worker.submit(async move {
            let _ = tx.send(job(store).await);
        });
        if !accepted {
            return Err(EngineError::ShuttingDown);
        }
        rx.await
            .map_err(|_| EngineError::TaskDropped { operation })?
            .map_err(|source| EngineError::History { operation, source })
    }

    /// Buckets within `[start, end]` regrouped into `step` seconds.
    ///
    /// # Errors
    ///
    /// Returns an error when the worker is stopped or the query fails.
    pub async fn query(
        &self,
        start: i64,
        end: i64,
        step: i64,
    ) -> EngineResult<Vec<HistoryBucket>> {
        self.run("query history", move |store| async move {
            store.query_buckets(start, end, step).await
        })
        .await
    }

    /// Delete buckets older than `older_than`, or every bucket.
    ///
    /// # Errors
    ///
    /// Returns an error when the worker is stopped or the delete fails.
    pub async fn clear(&self, older_than: Option<i64>) -> EngineResult<u64> {
        self.run("clear history", move |store| async move {
            store.delete_buckets(older_than).await
        })
        .await
    }
}

/// Accumulates transfer deltas into interval buckets.
pub struct HistoryAgent {
    store: Arc<dyn HistoryStore>,
    worker: AsyncTaskService,
    config: HistoryConfig,
    bucket_start: i64,
    down: u64,
    up: u64,
    peak_down: u64,
    peak_up: u64,
    last_flush: Instant,
    next_retention_check: Instant,
    failures: Arc<AtomicU64>,
}

impl std::fmt::Debug for HistoryAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryAgent")
            .field("config", &self.config)
            .field("bucket_start", &self.bucket_start)
            .field("down", &self.down)
            .field("up", &self.up)
            .finish_non_exhaustive()
    }
}

impl HistoryAgent {
    /// Construct an agent whose first bucket contains `wall_seconds`.
    #[must_use]
    pub fn new(
        store: Arc<dyn HistoryStore>,
        worker: AsyncTaskService,
        config: HistoryConfig,
        now: Instant,
        wall_seconds: i64,
    ) -> Self {
        let mut agent = Self {
            store,
            worker,
            config: normalize(config),
            bucket_start: 0,
            down: 0,
            up: 0,
            peak_down: 0,
            peak_up: 0,
            last_flush: now,
            next_retention_check: now,
            failures: Arc::new(AtomicU64::new(0)),
        };
        agent.configure_window(now, wall_seconds);
        agent
    }

    /// Read access sharing this agent's store and worker.
    #[must_use]
    pub fn reader(&self) -> HistoryReader {
        HistoryReader {
            store: Arc::clone(&self.store),
            worker: self.worker.clone(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> HistoryConfig {
        self.config
    }

    /// Bucket inserts that failed on the worker.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Start of the open bucket.
    #[must_use]
    pub const fn bucket_start(&self) -> i64 {
        self.bucket_start
    }

    /// Add one tick's deltas and current rates, flushing when the interval has elapsed.
    pub fn record(
        &mut self,
        now: Instant,
        downloaded: u64,
        uploaded: u64,
        download_rate: u64,
        upload_rate: u64,
    ) {
        if !self.config.enabled {
            return;
        }
        self.down = self.down.saturating_add(downloaded);
        self.up = self.up.saturating_add(uploaded);
        self.peak_down = self.peak_down.max(download_rate);
        self.peak_up = self.peak_up.max(upload_rate);
        self.flush_if_due(now, false);
    }

    /// Hand the open bucket to the worker when due, or unconditionally with `force`.
    pub fn flush_if_due(&mut self, now: Instant, force: bool) {
        if !self.config.enabled && !force {
            return;
        }
        let interval =
            Duration::from_secs(u64::try_from(self.config.interval_seconds).unwrap_or(0));
        if !force && now < self.last_flush + interval {
            return;
        }
        let bucket = HistoryBucket {
            timestamp: self.bucket_start,
            total_down: std::mem::take(&mut self.down),
            total_up: std::mem::take(&mut self.up),
            peak_down: std::mem::take(&mut self.peak_down),
            peak_up: std::mem::take(&mut self.peak_up),
        };
        let store = Arc::clone(&self.store);
        let failures = Arc::clone(&self.failures);
        let accepted = self.worker.submit(async move {
            if let Err(err) = store.insert_bucket(bucket).await {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(timestamp = bucket.timestamp, error = %err, "history bucket insert failed");
            }
        });
        if !accepted {
            warn!(timestamp = bucket.timestamp, "history worker stopped; bucket dropped");
        }
        debug!(
            timestamp = bucket.timestamp,
            down = bucket.total_down,
            up = bucket.total_up,
            "history bucket flushed"
        );
        self.bucket_start += i64::from(self.config.interval_seconds);
        self.last_flush = now;
    }

    /// Delete expired buckets at most once per [`RETENTION_CHECK_INTERVAL`].
    pub fn perform_retention(&mut self, now: Instant, wall_seconds: i64) {
        if self.config.retention_days <= 0 || now < self.next_retention_check {
            return;
        }
        self.next_retention_check = now + RETENTION_CHECK_INTERVAL;
        let cutoff =
            (wall_seconds - i64::from(self.config.retention_days) * SECONDS_PER_DAY).max(0);
        let store = Arc::clone(&self.store);
        self.worker.submit(async move {
            match store.delete_buckets(Some(cutoff)).await {
                Ok(removed) => debug!(cutoff, removed, "history retention applied"),
                Err(err) => warn!(cutoff, error = %err, "history retention delete failed"),
            }
        });
    }

    /// Replace the configuration, optionally flushing first and realigning afterwards.
    pub fn update_config(
        &mut self,
        config: HistoryConfig,
        flush_after: bool,
        reconfigure_after: bool,
        now: Instant,
        wall_seconds: i64,
    ) {
        self.config = normalize(config);
        if flush_after {
            self.flush_if_due(now, true);
        }
        if reconfigure_after {
            self.configure_window(now, wall_seconds);
        }
    }

    fn configure_window(&mut self, now: Instant, wall_seconds: i64) {
        self.bucket_start = align_to_interval(wall_seconds, self.config.interval_seconds);
        self.down = 0;
        self.up = 0;
        self.peak_down = 0;
        self.peak_up = 0;
        self.last_flush = now;
        self.next_retention_check = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::timeout;

    #[derive(Default)]
    struct MemoryStore {
        buckets: Mutex<Vec<HistoryBucket>>,
        deletes: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl HistoryStore for MemoryStore {
        async fn insert_bucket(&self, bucket: HistoryBucket) -> anyhow::Result<()> {
            self.buckets.lock().expect("lock").push(bucket);
            Ok(())
        }

        async fn query_buckets(
            &self,
            start: i64,
            end: i64,
            _step: i64,
        ) -> anyhow::Result<Vec<HistoryBucket>> {
            Ok(self
                .buckets
                .lock()
                .expect("lock")
                .iter()
                .filter(|bucket| (start..=end).contains(&bucket.timestamp))
                .copied()
                .collect())
        }

        async fn delete_buckets(&self, cutoff: Option<i64>) -> anyhow::Result<u64> {
            self.deletes.lock().expect("lock").push(cutoff);
            Ok(0)
        }
    }

    fn config(interval_seconds: i32) -> HistoryConfig {
        HistoryConfig {
            enabled: true,
            interval_seconds,
            retention_days: 1,
        }
    }

    #[test]
    fn alignment_floors_to_interval() {
        assert_eq!(align_to_interval(1_000, 60), 960);
        assert_eq!(align_to_interval(1_020, 60), 1_020);
        assert_eq!(align_to_interval(77, 0), 77);
    }

    #[tokio::test]
    async fn buckets_tile_despite_flush_jitter() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::default());
        let worker = AsyncTaskService::spawn("history-test");
        let start = Instant::now();
        let mut agent =
            HistoryAgent::new(store.clone(), worker.clone(), config(60), start, 1_000);

        agent.record(start + Duration::from_secs(61), 10, 1, 10, 1);
        agent.record(start + Duration::from_secs(125), 20, 2, 30, 2);
        agent.record(start + Duration::from_secs(187), 30, 3, 5, 3);
        timeout(Duration::from_secs(2), worker.wait_for_idle()).await?;

        let buckets = store.buckets.lock().expect("lock").clone();
        let starts: Vec<i64> = buckets.iter().map(|bucket| bucket.timestamp).collect();
        assert_eq!(starts, vec![960, 1_020, 1_080]);
        assert_eq!(buckets[1].total_down, 20);
        assert_eq!(buckets[1].peak_down, 30);
        Ok(())
    }

    #[tokio::test]
    async fn deltas_accumulate_until_interval_elapses() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::default());
        let worker = AsyncTaskService::spawn("history-test");
        let start = Instant::now();
        let mut agent = HistoryAgent::new(store.clone(), worker.clone(), config(60), start, 0);

        agent.record(start + Duration::from_secs(10), 5, 0, 0, 0);
        agent.record(start + Duration::from_secs(20), 7, 0, 0, 0);
        timeout(Duration::from_secs(2), worker.wait_for_idle()).await?;
        assert!(store.buckets.lock().expect("lock").is_empty());

        agent.flush_if_due(start + Duration::from_secs(30), true);
        timeout(Duration::from_secs(2), worker.wait_for_idle()).await?;
        assert_eq!(store.buckets.lock().expect("lock")[0].total_down, 12);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_history_ignores_records() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::default());
        let worker = AsyncTaskService::spawn("history-test");
        let start = Instant::now();
        let mut disabled = config(60);
        disabled.enabled = false;
        let mut agent = HistoryAgent::new(store.clone(), worker.clone(), disabled, start, 0);

        agent.record(start + Duration::from_secs(600), 5, 5, 5, 5);
        timeout(Duration::from_secs(2), worker.wait_for_idle()).await?;
        assert!(store.buckets.lock().expect("lock").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn retention_runs_hourly_with_wall_clock_cutoff() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::default());
        let worker = AsyncTaskService::spawn("history-test");
        let start = Instant::now();
        let mut agent = HistoryAgent::new(store.clone(), worker.clone(), config(60), start, 0);

        agent.perform_retention(start, 200_000);
        agent.perform_retention(start + Duration::from_secs(60), 200_060);
        agent.perform_retention(start + RETENTION_CHECK_INTERVAL, 203_600);
        timeout(Duration::from_secs(2), worker.wait_for_idle()).await?;

        let deletes = store.deletes.lock().expect("lock").clone();
        assert_eq!(deletes, vec![Some(200_000 - 86_400), Some(203_600 - 86_400)]);
        Ok(())
    }

    #[tokio::test]
    async fn short_interval_is_raised_to_minimum() {
        let store = Arc::new(MemoryStore::default());
        let worker = AsyncTaskService::spawn("history-test");
        let agent = HistoryAgent::new(store, worker, config(5), Instant::now(), 0);
        assert_eq!(agent.config().interval_seconds, MIN_HISTORY_INTERVAL_SECONDS);
    }

    #[tokio::test]
    async fn reconfigure_realigns_the_window() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::default());
        let worker = AsyncTaskService::spawn("history-test");
        let start = Instant::now();
        let mut agent = HistoryAgent::new(store.clone(), worker.clone(), config(60), start, 1_000);
        agent.record(start + Duration::from_secs(1), 9, 9, 9, 9);

        agent.update_config(config(300), true, true, start + Duration::from_secs(2), 1_234);
        assert_eq!(agent.bucket_start(), 1_200);
        timeout(Duration::from_secs(2), worker.wait_for_idle()).await?;
        let buckets = store.buckets.lock().expect("lock").clone();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, 960);

        let reader = agent.reader();
        assert_eq!(reader.query(0, 2_000, 60).await?.len(), 1);
        assert_eq!(reader.clear(None).await?, 0);
        Ok(())
    }

    struct FailingStore;

    #[async_trait]
    impl HistoryStore for FailingStore {
        async fn insert_bucket(&self, _bucket: HistoryBucket) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn query_buckets(
            &self,
            _start: i64,
            _end: i64,
            _step: i64,
        ) -> anyhow::Result<Vec<HistoryBucket>> {
            Ok(Vec::new())
        }

        async fn delete_buckets(&self, _cutoff: Option<i64>) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn failed_inserts_are_counted() -> anyhow::Result<()> {
        let worker = AsyncTaskService::spawn("history-test");
        let start = Instant::now();
        let mut agent =
            HistoryAgent::new(Arc::new(FailingStore), worker.clone(), config(60), start, 0);

        agent.flush_if_due(start, true);
        agent.flush_if_due(start, true);
        timeout(Duration::from_secs(2), worker.wait_for_idle()).await?;
        assert_eq!(agent.write_failures(), 2);
        Ok(())
    }
}

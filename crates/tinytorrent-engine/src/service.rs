//! Per-tick orchestration of the engine task.
//!
//! # Design
//! - One tokio task owns the [`SessionService`]; every mutation reaches it as an [`EngineTask`]
//!   drained from the bounded task queue.
//! - A tick runs queued tasks, drains alerts, rechecks the speed-limit mode, rebuilds and
//!   publishes the snapshot, applies batched seed-limit pauses, then housekeeping.
//! - Shutdown asks every handle for resume data and keeps ticking until every hash confirms,
//!   confirmations stall, or the hard timeout passes.
//! - Disk work never runs inline: persistence writes go through its own worker; scans, sidecars
//!   and blocklist parsing go through the io worker.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::Utc;
use tinytorrent_config::{
    CoreSettings, SettingsPatch, build_engine_settings, should_use_alt_speed_now,
};
use tinytorrent_core::{
    AsyncTaskService, InfoHash, RpcId, SessionSnapshot, SessionTotals, TorrentBandwidth,
    TorrentStatus,
};
use tinytorrent_data::PersistenceManager;
use tinytorrent_events::{ErrorSource, Event, EventBus, HandlerId};
use tinytorrent_fsops::{WatchFingerprints, dht_state_path, write_atomic};
use tinytorrent_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::blocklist::BlocklistStatus;
use crate::history::{HistoryAgent, HistoryReader};
use crate::limits::{GlobalSeedLimits, SeedLimits};
use crate::manager::{SnapshotHooks, TorrentManager};
use crate::queue::{DEFAULT_QUEUE_CAPACITY, TaskQueue};
use crate::resume::{DEFAULT_RESUME_ALERT_TIMEOUT, ResumeTracker};

/// Work executed on the engine task.
pub type EngineTask = Box<dyn FnOnce(&mut SessionService) -> anyhow::Result<()> + Send>;

/// Hard limit on the shutdown drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
/// Cadence of watch scans, retention and statistics checks.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(2);
/// Minimum spacing of statistics writes.
pub const STATS_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Quiet period before changed settings are written.
pub const SETTINGS_PERSIST_DELAY: Duration = Duration::from_millis(500);

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timing and sizing knobs of the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Quiet period allowed between resume confirmations during shutdown.
    pub resume_alert_timeout: Duration,
    /// Hard limit on the shutdown drain.
    pub shutdown_timeout: Duration,
    /// Maximum pending tasks.
    pub queue_capacity: usize,
    /// Cadence of watch scans, retention and statistics checks.
    pub housekeeping_interval: Duration,
    /// Minimum spacing of statistics writes.
    pub stats_flush_interval: Duration,
    /// Quiet period before changed settings are written.
    pub settings_persist_delay: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            resume_alert_timeout: DEFAULT_RESUME_ALERT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            housekeeping_interval: HOUSEKEEPING_INTERVAL,
            stats_flush_interval: STATS_FLUSH_INTERVAL,
            settings_persist_delay: SETTINGS_PERSIST_DELAY,
        }
    }
}

/// Effective listen endpoint or the last bind failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ListenState {
    pub(crate) endpoint: Option<String>,
    pub(crate) error: Option<String>,
}

/// State shared between the engine task and its handles.
pub(crate) struct EngineShared {
    pub(crate) queue: Arc<TaskQueue<EngineTask>>,
    pub(crate) snapshot: Arc<ArcSwap<SessionSnapshot>>,
    pub(crate) settings: RwLock<CoreSettings>,
    pub(crate) listen: RwLock<ListenState>,
    pub(crate) blocklist: RwLock<BlocklistStatus>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) events: EventBus,
    pub(crate) metrics: Metrics,
    pub(crate) persistence: PersistenceManager,
    pub(crate) io: AsyncTaskService,
    pub(crate) history: HistoryReader,
}

impl EngineShared {
    pub(crate) fn with_settings<R>(&self, read: impl FnOnce(&CoreSettings) -> R) -> R {
        read(&self.settings.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn settings(&self) -> CoreSettings {
        self.with_settings(CoreSettings::clone)
    }

    pub(crate) fn store_settings(&self, settings: CoreSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub(crate) fn listen(&self) -> ListenState {
        self.listen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update_listen(&self, update: impl FnOnce(&mut ListenState)) {
        update(&mut self.listen.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub(crate) fn blocklist_status(&self) -> BlocklistStatus {
        *self.blocklist.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_blocklist_status(&self, status: BlocklistStatus) {
        *self.blocklist.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();
    }
}

/// Run blocking filesystem work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await?)
}

/// Lifetime and per-process transfer counters.
#[derive(Debug)]
pub(crate) struct SessionStats {
    baseline: SessionTotals,
    current: SessionTotals,
    last: HashMap<InfoHash, (i64, i64)>,
    started: Instant,
    dirty: bool,
    last_flush: Instant,
}

fn counter_delta(previous: i64, total: i64) -> u64 {
    u64::try_from(total.saturating_sub(previous)).unwrap_or(0)
}

impl SessionStats {
    pub(crate) fn new(baseline: SessionTotals, now: Instant) -> Self {
        Self {
            baseline,
            current: SessionTotals {
                uploaded_bytes: 0,
                downloaded_bytes: 0,
                seconds_active: 0,
                session_count: 1,
            },
            last: HashMap::new(),
            started: now,
            dirty: false,
            last_flush: now,
        }
    }

    /// Fold in the latest per-torrent session counters. Returns the `(down, up)` deltas.
    ///
    /// A torrent's counters start at zero when it joins the session; a counter that went
    /// backwards contributes nothing. Torrents missing from `transfers` are forgotten.
    pub(crate) fn record(
        &mut self,
        transfers: HashMap<InfoHash, (i64, i64)>,
        now: Instant,
    ) -> (u64, u64) {
        let mut down = 0_u64;
        let mut up = 0_u64;
        for (hash, (total_down, total_up)) in &transfers {
            let (last_down, last_up) = self.last.get(hash).copied().unwrap_or((0, 0));
            down = down.saturating_add(counter_delta(last_down, *total_down));
            up = up.saturating_add(counter_delta(last_up, *total_up));
        }
        self.last = transfers;
        self.current.downloaded_bytes = self.current.downloaded_bytes.saturating_add(down);
        self.current.uploaded_bytes = self.current.uploaded_bytes.saturating_add(up);
        self.current.seconds_active = now.saturating_duration_since(self.started).as_secs();
        if down > 0 || up > 0 {
            self.dirty = true;
        }
        (down, up)
    }

    pub(crate) const fn current(&self) -> SessionTotals {
        self.current
    }

    pub(crate) const fn cumulative(&self) -> SessionTotals {
        SessionTotals {
            uploaded_bytes: self
                .baseline
                .uploaded_bytes
                .saturating_add(self.current.uploaded_bytes),
            downloaded_bytes: self
                .baseline
                .downloaded_bytes
                .saturating_add(self.current.downloaded_bytes),
            seconds_active: self
                .baseline
                .seconds_active
                .saturating_add(self.current.seconds_active),
            session_count: self.baseline.session_count,
        }
    }
}

/// Engine-task state other than the session itself.
pub(crate) struct ServiceState {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) options: EngineOptions,
    pub(crate) history: HistoryAgent,
    pub(crate) history_worker: AsyncTaskService,
    pub(crate) seed_limits: SeedLimits,
    pub(crate) labels: HashMap<InfoHash, Vec<String>>,
    pub(crate) priorities: HashMap<RpcId, i32>,
    pub(crate) bandwidth: HashMap<RpcId, TorrentBandwidth>,
    pub(crate) errors: HashMap<InfoHash, String>,
    pub(crate) pending_moves: HashMap<InfoHash, PathBuf>,
    pub(crate) final_paths: HashMap<InfoHash, PathBuf>,
    pub(crate) resume: ResumeTracker,
    pub(crate) watch: WatchFingerprints,
    pub(crate) watch_busy: Arc<AtomicBool>,
    pub(crate) next_housekeeping: Instant,
    pub(crate) health: BTreeSet<String>,
    pub(crate) alt_active: bool,
    pub(crate) force_speed_check: bool,
    pub(crate) stats: SessionStats,
    pub(crate) settings_dirty_since: Option<Instant>,
    pub(crate) write_failures: u64,
    pub(crate) history_failures: u64,
    pub(crate) completion_handler: Option<HandlerId>,
}

impl ServiceState {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        options: EngineOptions,
        history: HistoryAgent,
        history_worker: AsyncTaskService,
        stats: SessionStats,
        now: Instant,
    ) -> Self {
        Self {
            shared,
            resume: ResumeTracker::new(options.resume_alert_timeout),
            options,
            history,
            history_worker,
            seed_limits: SeedLimits::new(),
            labels: HashMap::new(),
            priorities: HashMap::new(),
            bandwidth: HashMap::new(),
            errors: HashMap::new(),
            pending_moves: HashMap::new(),
            final_paths: HashMap::new(),
            watch: WatchFingerprints::new(),
            watch_busy: Arc::new(AtomicBool::new(false)),
            next_housekeeping: now,
            health: BTreeSet::new(),
            alt_active: false,
            force_speed_check: false,
            stats,
            settings_dirty_since: None,
            write_failures: 0,
            history_failures: 0,
            completion_handler: None,
        }
    }

    pub(crate) fn publish(&self, event: Event) {
        self.shared.events.publish(event);
    }

    pub(crate) fn mark_degraded(&mut self, component: &str, detail: Option<&str>) {
        let inserted = self.health.insert(component.to_string());
        if inserted {
            let degraded = self.health.iter().cloned().collect::<Vec<_>>();
            self.publish(Event::HealthChanged { degraded });
            if let Some(detail) = detail {
                warn!(component, detail = %detail, "engine component degraded");
            } else {
                warn!(component, "engine component degraded");
            }
        } else if let Some(detail) = detail {
            debug!(component, detail = %detail, "engine component still degraded");
        }
    }

    pub(crate) fn mark_recovered(&mut self, component: &str) {
        if self.health.remove(component) {
            let degraded = self.health.iter().cloned().collect::<Vec<_>>();
            self.publish(Event::HealthChanged { degraded });
            info!(component, "engine component recovered");
        }
    }

    /// Attach an error to a torrent's snapshot until it is cleared.
    pub(crate) fn record_error(
        &mut self,
        manager: &mut TorrentManager,
        hash: InfoHash,
        message: String,
        source: ErrorSource,
    ) {
        warn!(hash = %hash, source = source.as_str(), message = %message, "torrent error");
        self.errors.insert(hash, message.clone());
        manager.mark_hash_dirty(&hash);
        self.publish(Event::TorrentError {
            hash: hash.to_hex(),
            message,
            source,
        });
    }

    pub(crate) fn clear_error(&mut self, manager: &mut TorrentManager, hash: &InfoHash) {
        if self.errors.remove(hash).is_some() {
            manager.mark_hash_dirty(hash);
        }
    }

    pub(crate) fn mark_settings_dirty(&mut self, now: Instant) {
        self.settings_dirty_since = Some(now);
    }
}

struct SnapshotContext<'a> {
    limits: &'a mut SeedLimits,
    global: GlobalSeedLimits,
    labels: &'a HashMap<InfoHash, Vec<String>>,
    priorities: &'a HashMap<RpcId, i32>,
    errors: &'a HashMap<InfoHash, String>,
    now: Instant,
    pauses: Vec<RpcId>,
}

impl SnapshotHooks for SnapshotContext<'_> {
    fn visit(&mut self, id: RpcId, status: &TorrentStatus) {
        if self.limits.check(id, status, &self.global, self.now) {
            self.pauses.push(id);
        }
    }

    fn labels(&self, hash: &InfoHash) -> Vec<String> {
        self.labels.get(hash).cloned().unwrap_or_default()
    }

    fn priority(&self, id: RpcId) -> i32 {
        self.priorities.get(&id).copied().unwrap_or(0)
    }

    fn error(&self, hash: &InfoHash) -> Option<&str> {
        self.errors.get(hash).map(String::as_str)
    }
}

/// The engine task: the torrent manager plus everything ticked alongside it.
pub struct SessionService {
    pub(crate) manager: TorrentManager,
    pub(crate) state: ServiceState,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("manager", &self.manager)
            .field("degraded", &self.state.health)
            .finish_non_exhaustive()
    }
}

impl SessionService {
    pub(crate) const fn new(manager: TorrentManager, state: ServiceState) -> Self {
        Self { manager, state }
    }

    /// The torrent manager.
    #[must_use]
    pub const fn manager(&self) -> &TorrentManager {
        &self.manager
    }

    /// The torrent manager, mutably.
    pub const fn manager_mut(&mut self) -> &mut TorrentManager {
        &mut self.manager
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> CoreSettings {
        self.state.shared.settings()
    }

    /// Components currently marked degraded.
    #[must_use]
    pub fn degraded(&self) -> Vec<String> {
        self.state.health.iter().cloned().collect()
    }

    /// Drive ticks until shutdown completes.
    pub(crate) async fn run(mut self) {
        info!(
            torrents = self.manager.session().handles().len(),
            "engine loop started"
        );
        let mut draining: Option<Instant> = None;
        loop {
            let now = Instant::now();
            if draining.is_none() && self.state.shared.shutdown_requested() {
                self.persist_resume_data(now);
                draining = Some(now);
            }

            self.tick(now);

            if let Some(started) = draining {
                let now = Instant::now();
                if self.state.resume.is_done(now) {
                    info!(pending = self.state.resume.pending(), "resume data drain finished");
                    break;
                }
                if now.saturating_duration_since(started) >= self.state.options.shutdown_timeout {
                    warn!(
                        pending = self.state.resume.pending(),
                        timeout_ms = self.state.options.shutdown_timeout.as_millis(),
                        "shutdown timeout reached with resume data outstanding"
                    );
                    break;
                }
            }

            let wait = if draining.is_some() {
                SHUTDOWN_POLL_INTERVAL
            } else {
                Duration::from_millis(
                    self.state
                        .shared
                        .with_settings(|settings| settings.idle_sleep_ms)
                        .max(1),
                )
            };
            let queue = Arc::clone(self.manager.queue());
            let _ = tokio::time::timeout(wait, queue.notified()).await;
        }
        self.finish().await;
    }

    pub(crate) fn tick(&mut self, now: Instant) {
        let (executed, failed) = self.process_tasks();
        self.manager.session_mut().post_torrent_updates();
        let alerts = self.manager.process_alerts(&mut self.state);
        self.check_speed_limits();
        let pauses = self.update_snapshot(now);
        self.apply_pauses(&pauses);
        self.housekeeping(now);
        self.flush_settings(now, false);

        let metrics = &self.state.shared.metrics;
        metrics.inc_tick();
        metrics.record_tasks(executed, failed);
        metrics.set_pending_tasks(i64::try_from(self.manager.queue().len()).unwrap_or(i64::MAX));
        if executed > 0 || alerts > 0 {
            debug!(tasks = executed, failed, alerts, "engine tick");
        }
    }

    fn process_tasks(&mut self) -> (u64, u64) {
        let tasks = self.manager.take_tasks();
        let mut executed = 0;
        let mut failed = 0;
        for task in tasks {
            executed += 1;
            if let Err(err) = task(self) {
                failed += 1;
                warn!(error = %err, "engine task failed");
            }
        }
        (executed, failed)
    }

    fn check_speed_limits(&mut self) {
        let settings = self.state.shared.settings();
        let alt = should_use_alt_speed_now(&settings);
        if alt == self.state.alt_active && !self.state.force_speed_check {
            return;
        }
        let mode_changed = alt != self.state.alt_active;
        self.state.alt_active = alt;
        self.state.force_speed_check = false;
        let patch = SettingsPatch::full(build_engine_settings(&settings, alt));
        match self.manager.session_mut().apply_settings(&patch) {
            Ok(()) => {
                self.state.mark_recovered("session");
                if mode_changed {
                    info!(alt_speed = alt, "alternate speed mode changed");
                }
            }
            Err(err) => {
                let detail = err.to_string();
                self.state.mark_degraded("session", Some(&detail));
            }
        }
    }

    fn update_snapshot(&mut self, now: Instant) -> Vec<RpcId> {
        let global = self
            .state
            .shared
            .with_settings(GlobalSeedLimits::from_settings);
        let mut hooks = SnapshotContext {
            limits: &mut self.state.seed_limits,
            global,
            labels: &self.state.labels,
            priorities: &self.state.priorities,
            errors: &self.state.errors,
            now,
            pauses: Vec::new(),
        };
        let build = self.manager.build_snapshot(&mut hooks);
        let pauses = hooks.pauses;

        let (down, up) = self.state.stats.record(build.transfers, now);
        self.state.history.record(
            now,
            down,
            up,
            u64::try_from(build.snapshot.download_rate).unwrap_or(0),
            u64::try_from(build.snapshot.upload_rate).unwrap_or(0),
        );

        let mut snapshot = build.snapshot;
        snapshot.alt_speed_active = self.state.alt_active;
        snapshot.cumulative_stats = self.state.stats.cumulative();
        snapshot.current_stats = self.state.stats.current();
        let metrics = &self.state.shared.metrics;
        metrics.set_torrents(
            i64::try_from(snapshot.torrent_count).unwrap_or(i64::MAX),
            i64::try_from(snapshot.active_torrent_count).unwrap_or(i64::MAX),
        );
        metrics.set_rates(snapshot.download_rate, snapshot.upload_rate);
        self.manager.store_snapshot(snapshot);

        self.state.seed_limits.retain(&build.seen);
        self.state.priorities.retain(|id, _| build.seen.contains(id));
        self.state.bandwidth.retain(|id, _| build.seen.contains(id));
        let persistence = &self.state.shared.persistence;
        for (hash, id) in self.manager.take_fresh_ids() {
            if persistence.cached(&hash).is_some_and(|record| record.rpc_id != Some(id)) {
                persistence.update_rpc_id(&hash, id);
            }
        }
        pauses
    }

    fn apply_pauses(&mut self, ids: &[RpcId]) {
        for id in ids {
            let Some(hash) = self.manager.hash_for(*id) else {
                continue;
            };
            match self.manager.session_mut().pause(&hash) {
                Ok(()) => {
                    info!(torrent_id = id, hash = %hash, "seed limit reached; torrent paused");
                    self.state.shared.persistence.update_paused(&hash, true);
                    self.manager.mark_dirty(*id);
                }
                Err(err) => warn!(torrent_id = id, error = %err, "seed limit pause failed"),
            }
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        if now < self.state.next_housekeeping {
            return;
        }
        self.state.next_housekeeping = now + self.state.options.housekeeping_interval;
        self.scan_watch_dir();
        self.relocate_stranded();
        self.state
            .history
            .perform_retention(now, Utc::now().timestamp());
        self.flush_statistics(now, false);

        let failures = self.state.shared.persistence.write_failures();
        if failures > self.state.write_failures {
            self.state.write_failures = failures;
            self.state
                .mark_degraded("persistence", Some("database writes are failing"));
        } else {
            self.state.mark_recovered("persistence");
        }

        let failures = self.state.history.write_failures();
        if failures > self.state.history_failures {
            self.state.history_failures = failures;
            self.state
                .mark_degraded("history", Some("history buckets are not being stored"));
        } else {
            self.state.mark_recovered("history");
        }
    }

    fn flush_statistics(&mut self, now: Instant, force: bool) {
        let stats = &mut self.state.stats;
        let due = stats.dirty
            && now.saturating_duration_since(stats.last_flush)
                >= self.state.options.stats_flush_interval;
        if !force && !due {
            return;
        }
        stats.dirty = false;
        stats.last_flush = now;
        self.state
            .shared
            .persistence
            .save_statistics(stats.cumulative());
    }

    fn flush_settings(&mut self, now: Instant, force: bool) {
        let Some(since) = self.state.settings_dirty_since else {
            return;
        };
        if !force
            && now.saturating_duration_since(since) < self.state.options.settings_persist_delay
        {
            return;
        }
        self.state.settings_dirty_since = None;
        let pairs = self.state.shared.with_settings(CoreSettings::to_pairs);
        self.state.shared.persistence.save_settings(pairs);
        debug!("settings persisted");
    }

    fn persist_resume_data(&mut self, now: Instant) {
        let handles = self.manager.session().handles();
        let mut requested = Vec::with_capacity(handles.len());
        for hash in handles {
            match self.manager.session_mut().save_resume_data(&hash) {
                Ok(()) => requested.push(hash),
                Err(err) => warn!(hash = %hash, error = %err, "resume data request failed"),
            }
        }
        info!(torrents = requested.len(), "requesting resume data before shutdown");
        self.state.resume.begin(requested, now);
    }

    async fn finish(mut self) {
        let now = Instant::now();
        if let Some(id) = self.state.completion_handler.take() {
            self.state.shared.events.unregister_handler(id);
        }
        if self.state.history.config().enabled {
            self.state.history.flush_if_due(now, true);
        }

        let state_dir = self
            .state
            .shared
            .with_settings(|settings| settings.state_path.clone());
        if !state_dir.as_os_str().is_empty()
            && let Some(dht) = self.manager.session().dht_state()
        {
            let path = dht_state_path(&state_dir);
            self.state.shared.io.submit(async move {
                let target = path.clone();
                match blocking(move || write_atomic(&target, &dht)).await {
                    Ok(Ok(())) => debug!(path = %path.display(), "dht state saved"),
                    Ok(Err(err)) => {
                        warn!(path = %path.display(), error = %err, "dht state save failed");
                    }
                    Err(err) => warn!(error = %err, "dht state save aborted"),
                }
            });
        }

        self.flush_statistics(now, true);
        self.flush_settings(now, true);
        self.state.history_worker.stop().await;
        self.state.shared.io.stop().await;
        self.state.shared.persistence.flush().await;
        info!("engine loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_deltas_are_tracked_per_torrent() {
        let start = Instant::now();
        let baseline = SessionTotals {
            uploaded_bytes: 10,
            downloaded_bytes: 20,
            seconds_active: 30,
            session_count: 4,
        };
        let a = InfoHash::new([1; 20]);
        let b = InfoHash::new([2; 20]);
        let at = |secs| start + Duration::from_secs(secs);
        let mut stats = SessionStats::new(baseline, start);

        assert_eq!(stats.record(HashMap::from([(a, (100, 50))]), start), (100, 50));
        assert_eq!(
            stats.record(HashMap::from([(a, (160, 70)), (b, (500, 0))]), at(1)),
            (560, 20)
        );
        // b leaves the session while a keeps transferring.
        assert_eq!(stats.record(HashMap::from([(a, (170, 75))]), at(2)), (10, 5));
        // a counter that went backwards adds nothing.
        assert_eq!(stats.record(HashMap::from([(a, (40, 75))]), at(3)), (0, 0));
        assert_eq!(stats.record(HashMap::from([(a, (45, 75))]), at(4)), (5, 0));

        assert_eq!(stats.current().downloaded_bytes, 675);
        assert_eq!(stats.current().seconds_active, 4);
        let cumulative = stats.cumulative();
        assert_eq!(cumulative.downloaded_bytes, 695);
        assert_eq!(cumulative.uploaded_bytes, 85);
        assert_eq!(cumulative.seconds_active, 34);
        assert_eq!(cumulative.session_count, 4);
    }

    #[test]
    fn default_options_match_engine_constants() {
        let options = EngineOptions::default();
        assert_eq!(options.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(options.resume_alert_timeout, Duration::from_secs(5));
        assert_eq!(options.queue_capacity, 4_096);
    }
}

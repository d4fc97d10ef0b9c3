//! Engine session ownership: RPC ids, revisions, alert dispatch and snapshot publication.
//!
//! # Design
//! - A `TorrentManager` lives on the engine task and is never shared; the only cross-thread
//!   touch points are the task queue and the published snapshot pointer.
//! - RPC ids are append-only for the life of the process. Ids recovered from persisted records
//!   are applied before any new id is allocated, and allocation resumes above them.
//! - Revisions are drawn from one counter, so a bump always yields a value larger than anything
//!   the torrent held before and leaves every other torrent untouched.
//! - Snapshot entries are rebuilt only when their revision moved, so per-torrent fields (rates
//!   included) stay as cached until an alert or command marks the torrent dirty. Session-wide
//!   rates and transfer counters are summed from the live status on every pass.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tinytorrent_core::{
    Alert, InfoHash, RpcId, SessionPort, SessionSnapshot, TorrentSnapshot, TorrentStatus,
};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::queue::TaskQueue;
use crate::service::EngineTask;
use crate::snapshot::SnapshotBuilder;

const ALERT_BUFFER_CAPACITY: usize = 256;

/// Receives drained alerts one at a time.
pub trait AlertHandler {
    /// Handle one alert. Errors are logged and do not stop the batch.
    ///
    /// # Errors
    ///
    /// Returns an error when the alert could not be applied.
    fn on_alert(&mut self, manager: &mut TorrentManager, alert: Alert) -> anyhow::Result<()>;
}

/// Lookups and per-torrent callbacks used while building a snapshot.
pub trait SnapshotHooks {
    /// Called once per live torrent with its fresh status.
    fn visit(&mut self, id: RpcId, status: &TorrentStatus);
    /// Labels attached to a torrent.
    fn labels(&self, hash: &InfoHash) -> Vec<String>;
    /// Bandwidth priority of a torrent.
    fn priority(&self, id: RpcId) -> i32;
    /// Recorded error overriding the engine's message.
    fn error(&self, hash: &InfoHash) -> Option<&str>;
}

/// Result of one snapshot pass.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuild {
    /// The snapshot, not yet published.
    pub snapshot: SessionSnapshot,
    /// RPC ids seen during the pass.
    pub seen: HashSet<RpcId>,
    /// Session `(download, upload)` counters of every live torrent.
    pub transfers: HashMap<InfoHash, (i64, i64)>,
}

/// Owner of the engine session and the id, revision and snapshot bookkeeping around it.
pub struct TorrentManager {
    session: Box<dyn SessionPort>,
    queue: Arc<TaskQueue<EngineTask>>,
    ids: HashMap<InfoHash, RpcId>,
    hashes: BTreeMap<RpcId, InfoHash>,
    next_id: RpcId,
    fresh_ids: Vec<(InfoHash, RpcId)>,
    revisions: HashMap<RpcId, u64>,
    next_revision: u64,
    alerts: Vec<Alert>,
    cache: HashMap<RpcId, TorrentSnapshot>,
    published: Arc<ArcSwap<SessionSnapshot>>,
    generation: u64,
}

impl std::fmt::Debug for TorrentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentManager")
            .field("torrents", &self.ids.len())
            .field("next_id", &self.next_id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl TorrentManager {
    /// Wrap `session`, publishing snapshots into `published`.
    #[must_use]
    pub fn new(
        session: Box<dyn SessionPort>,
        queue: Arc<TaskQueue<EngineTask>>,
        published: Arc<ArcSwap<SessionSnapshot>>,
    ) -> Self {
        Self {
            session,
            queue,
            ids: HashMap::new(),
            hashes: BTreeMap::new(),
            next_id: 1,
            fresh_ids: Vec::new(),
            revisions: HashMap::new(),
            next_revision: 1,
            alerts: Vec::with_capacity(ALERT_BUFFER_CAPACITY),
            cache: HashMap::new(),
            published,
            generation: 0,
        }
    }

    /// The wrapped session.
    #[must_use]
    pub fn session(&self) -> &dyn SessionPort {
        &*self.session
    }

    /// The wrapped session, mutably.
    pub fn session_mut(&mut self) -> &mut dyn SessionPort {
        &mut *self.session
    }

    /// Queue a task for the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue is full or closed.
    pub fn enqueue_task(&self, task: EngineTask) -> EngineResult<()> {
        self.queue.push(task)
    }

    /// Everything queued so far, oldest first.
    pub fn take_tasks(&self) -> VecDeque<EngineTask> {
        self.queue.take_all()
    }

    /// Shared task queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<TaskQueue<EngineTask>> {
        &self.queue
    }

    /// RPC id for `hash`, allocating the next one on first sight.
    pub fn assign_rpc_id(&mut self, hash: InfoHash) -> RpcId {
        if let Some(id) = self.ids.get(&hash) {
            return *id;
        }
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.ids.insert(hash, id);
        self.hashes.insert(id, hash);
        self.fresh_ids.push((hash, id));
        debug!(torrent_id = id, hash = %hash, "assigned rpc id");
        id
    }

    /// Re-apply an id stored on a persisted record.
    ///
    /// Returns `false` when the hash already has an id or the id is taken.
    pub fn recover_rpc_id(&mut self, hash: InfoHash, id: RpcId) -> bool {
        if id == 0 || self.ids.contains_key(&hash) || self.hashes.contains_key(&id) {
            return false;
        }
        self.ids.insert(hash, id);
        self.hashes.insert(id, hash);
        self.next_id = self.next_id.max(id.saturating_add(1));
        true
    }

    /// RPC id already assigned to `hash`.
    #[must_use]
    pub fn id_for(&self, hash: &InfoHash) -> Option<RpcId> {
        self.ids.get(hash).copied()
    }

    /// Hash behind an RPC id.
    #[must_use]
    pub fn hash_for(&self, id: RpcId) -> Option<InfoHash> {
        self.hashes.get(&id).copied()
    }

    /// Ids allocated since the previous call.
    pub fn take_fresh_ids(&mut self) -> Vec<(InfoHash, RpcId)> {
        std::mem::take(&mut self.fresh_ids)
    }

    /// Bump the revision of `id`.
    pub fn mark_dirty(&mut self, id: RpcId) {
        let revision = self.next_revision;
        self.next_revision += 1;
        self.revisions.insert(id, revision);
    }

    /// Bump the revision of the torrent behind `hash`, if it has an id.
    pub fn mark_hash_dirty(&mut self, hash: &InfoHash) {
        if let Some(id) = self.id_for(hash) {
            self.mark_dirty(id);
        }
    }

    /// Current revision of `id`.
    #[must_use]
    pub fn revision(&self, id: RpcId) -> Option<u64> {
        self.revisions.get(&id).copied()
    }

    fn ensure_revision(&mut self, id: RpcId) -> u64 {
        if let Some(revision) = self.revisions.get(&id) {
            return *revision;
        }
        self.mark_dirty(id);
        self.revisions.get(&id).copied().unwrap_or_default()
    }

    /// Drain pending alerts and hand each one to `handler`, in emission order.
    ///
    /// Returns the number of alerts processed.
    pub fn process_alerts<H>(&mut self, handler: &mut H) -> usize
    where
        H: AlertHandler + ?Sized,
    {
        let mut batch = std::mem::take(&mut self.alerts);
        self.session.pop_alerts(&mut batch);
        let count = batch.len();
        for alert in batch.drain(..) {
            let kind = alert.kind();
            let hash = alert.hash();
            if let Err(err) = handler.on_alert(self, alert) {
                warn!(alert = kind, hash = ?hash, error = %err, "alert handler failed");
            }
        }
        self.alerts = batch;
        count
    }

    /// Walk every live handle and build the next snapshot.
    ///
    /// Entries whose revision matches the cached copy are reused as-is; cache and revision
    /// entries for torrents that left the session are dropped.
    pub fn build_snapshot<H>(&mut self, hooks: &mut H) -> SnapshotBuild
    where
        H: SnapshotHooks + ?Sized,
    {
        let handles = self.session.handles();
        let mut build = SnapshotBuild {
            seen: HashSet::with_capacity(handles.len()),
            ..SnapshotBuild::default()
        };
        let mut torrents = Vec::with_capacity(handles.len());

        for hash in handles {
            let Some(status) = self.session.status(&hash) else {
                continue;
            };
            let id = self.assign_rpc_id(hash);
            let revision = self.ensure_revision(id);
            build.seen.insert(id);
            hooks.visit(id, &status);

            build
                .transfers
                .insert(hash, (status.total_download, status.total_upload));
            build.snapshot.download_rate += status.download_rate;
            build.snapshot.upload_rate += status.upload_rate;
            if status.paused {
                build.snapshot.paused_torrent_count += 1;
            } else if status.download_rate > 0 || status.upload_rate > 0 {
                build.snapshot.active_torrent_count += 1;
            }

            let cached = self.cache.get(&id);
            let reusable = cached.filter(|entry| entry.revision == revision).cloned();
            let added_time = cached.map(|entry| entry.added_time);
            let entry = if let Some(entry) = reusable {
                entry
            } else {
                let mut entry =
                    SnapshotBuilder::build(id, &status, revision, added_time, hooks.error(&hash));
                entry.labels = hooks.labels(&hash);
                entry.bandwidth_priority = hooks.priority(id);
                self.cache.insert(id, entry.clone());
                entry
            };
            torrents.push(entry);
        }

        torrents.sort_by_key(|entry| entry.id);
        build.snapshot.torrent_count = torrents.len();
        build.snapshot.torrents = torrents;
        self.cache.retain(|id, _| build.seen.contains(id));
        self.revisions.retain(|id, _| build.seen.contains(id));
        build
    }

    /// Publish `snapshot`, stamping it with the next generation.
    pub fn store_snapshot(&mut self, mut snapshot: SessionSnapshot) -> u64 {
        self.generation += 1;
        snapshot.generation = self.generation;
        self.published.store(Arc::new(snapshot));
        self.generation
    }

    /// Most recently published snapshot.
    #[must_use]
    pub fn snapshot_copy(&self) -> Arc<SessionSnapshot> {
        self.published.load_full()
    }

    /// Cached snapshot entry for `id` from the last pass.
    #[must_use]
    pub fn cached_entry(&self, id: RpcId) -> Option<&TorrentSnapshot> {
        self.cache.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::thread;
    use tinytorrent_core::metainfo::encode_single_file;
    use tinytorrent_core::{
        AddTorrentParams, StubController, StubSession, TorrentSource, parse_metainfo,
    };

    fn manager() -> (TorrentManager, StubController) {
        let session = StubSession::new();
        let controller = session.controller();
        let manager = TorrentManager::new(
            Box::new(session),
            Arc::new(TaskQueue::with_capacity(16)),
            Arc::new(ArcSwap::from_pointee(SessionSnapshot::default())),
        );
        (manager, controller)
    }

    fn add(manager: &mut TorrentManager, name: &str) -> InfoHash {
        let bytes = encode_single_file(name, 65_536, 16_384, "http://tracker/announce");
        let hash = parse_metainfo(&bytes).expect("metainfo").hash;
        manager
            .session_mut()
            .add_torrent(AddTorrentParams {
                hash,
                name: None,
                source: TorrentSource::metainfo(bytes),
                save_path: PathBuf::from("/downloads"),
                paused: false,
                resume_data: None,
            })
            .expect("add");
        hash
    }

    struct NoHooks;

    impl SnapshotHooks for NoHooks {
        fn visit(&mut self, _id: RpcId, _status: &TorrentStatus) {}
        fn labels(&self, _hash: &InfoHash) -> Vec<String> {
            Vec::new()
        }
        fn priority(&self, _id: RpcId) -> i32 {
            0
        }
        fn error(&self, _hash: &InfoHash) -> Option<&str> {
            None
        }
    }

    #[test]
    fn rpc_ids_are_idempotent_and_distinct() {
        let (mut manager, _) = manager();
        let a = InfoHash::new([1; 20]);
        let b = InfoHash::new([2; 20]);
        let first = manager.assign_rpc_id(a);
        assert_eq!(manager.assign_rpc_id(a), first);
        let second = manager.assign_rpc_id(b);
        assert_ne!(first, second);
        assert_eq!(manager.hash_for(second), Some(b));
        assert_eq!(manager.take_fresh_ids(), vec![(a, first), (b, second)]);
        assert!(manager.take_fresh_ids().is_empty());
    }

    #[test]
    fn recovered_ids_push_the_allocator_forward() {
        let (mut manager, _) = manager();
        let a = InfoHash::new([1; 20]);
        assert!(manager.recover_rpc_id(a, 41));
        assert!(!manager.recover_rpc_id(InfoHash::new([2; 20]), 41));
        assert!(!manager.recover_rpc_id(a, 7));
        assert_eq!(manager.assign_rpc_id(InfoHash::new([3; 20])), 42);
        assert_eq!(manager.id_for(&a), Some(41));
    }

    #[test]
    fn revisions_bump_only_the_marked_torrent() {
        let (mut manager, _) = manager();
        manager.mark_dirty(1);
        manager.mark_dirty(2);
        let (one, two) = (manager.revision(1), manager.revision(2));
        manager.mark_dirty(1);
        assert!(manager.revision(1) > one);
        assert_eq!(manager.revision(2), two);
    }

    #[test]
    fn unchanged_revision_reuses_cached_entry() {
        let (mut manager, controller) = manager();
        let hash = add(&mut manager, "cached.iso");
        let first = manager.build_snapshot(&mut NoHooks);
        assert_eq!(first.snapshot.torrent_count, 1);
        let id = first.snapshot.torrents[0].id;

        controller.update_status(&hash, |status| status.name = "renamed".into());
        let stale = manager.build_snapshot(&mut NoHooks);
        assert_eq!(stale.snapshot.torrents[0].name, "cached.iso");

        manager.mark_dirty(id);
        let fresh = manager.build_snapshot(&mut NoHooks);
        assert_eq!(fresh.snapshot.torrents[0].name, "renamed");
        assert!(fresh.snapshot.torrents[0].revision > first.snapshot.torrents[0].revision);
    }

    #[test]
    fn departed_torrents_leave_the_cache() {
        let (mut manager, _) = manager();
        let hash = add(&mut manager, "gone.iso");
        let build = manager.build_snapshot(&mut NoHooks);
        let id = build.snapshot.torrents[0].id;
        manager.session_mut().remove_torrent(&hash, false).expect("remove");

        let build = manager.build_snapshot(&mut NoHooks);
        assert!(build.seen.is_empty());
        assert!(manager.cached_entry(id).is_none());
        assert!(manager.revision(id).is_none());
        assert_eq!(manager.id_for(&hash), Some(id));
    }

    struct FailingHandler {
        seen: Vec<&'static str>,
    }

    impl AlertHandler for FailingHandler {
        fn on_alert(&mut self, _manager: &mut TorrentManager, alert: Alert) -> anyhow::Result<()> {
            self.seen.push(alert.kind());
            if matches!(alert, Alert::PortmapError { .. }) {
                anyhow::bail!("unexpected alert");
            }
            Ok(())
        }
    }

    #[test]
    fn failing_alert_does_not_stop_the_batch() {
        let (mut manager, controller) = manager();
        controller.push_alert(Alert::PortmapError {
            message: "no gateway".into(),
        });
        controller.push_alert(Alert::TorrentFinished {
            hash: InfoHash::new([9; 20]),
        });
        let mut handler = FailingHandler { seen: Vec::new() };
        assert_eq!(manager.process_alerts(&mut handler), 2);
        assert_eq!(handler.seen, vec!["portmap_error", "torrent_finished"]);
        assert_eq!(manager.process_alerts(&mut handler), 0);
    }

    #[test]
    fn readers_never_see_a_partial_snapshot() {
        let (mut manager, _) = manager();
        let published = Arc::clone(&manager.published);
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let published = Arc::clone(&published);
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        let snapshot = published.load_full();
                        assert_eq!(snapshot.torrent_count, snapshot.torrents.len());
                        assert!(snapshot.generation >= last);
                        last = snapshot.generation;
                    }
                })
            })
            .collect();

        for round in 0..2_000_usize {
            let torrents = (0..round % 17)
                .map(|index| TorrentSnapshot {
                    id: RpcId::try_from(index).expect("id"),
                    ..TorrentSnapshot::default()
                })
                .collect::<Vec<_>>();
            manager.store_snapshot(SessionSnapshot {
                torrent_count: torrents.len(),
                torrents,
                ..SessionSnapshot::default()
            });
        }
        for reader in readers {
            reader.join().expect("reader");
        }
        assert_eq!(manager.snapshot_copy().generation, 2_000);
    }
}

//! Cloneable handle onto the running engine.
//!
//! Commands are queued without waiting; queries that need the session run as tasks and await a
//! oneshot reply. Snapshot reads never touch the engine task.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::Utc;
use tinytorrent_config::{
    CoreSettings, SessionUpdate, SettingsPatch, build_engine_settings, should_use_alt_speed_now,
};
use tinytorrent_core::{
    AddTorrentStatus, AsyncTaskService, HistoryBucket, InfoHash, QueueMove, RpcId, SessionPort,
    SessionSnapshot, TorrentAddRequest, TorrentBandwidth, TorrentDetail, TorrentSeedLimit,
    TrackerEntry,
};
use tinytorrent_data::PersistenceManager;
use tinytorrent_events::{Event, EventBus, HandlerId};
use tinytorrent_fsops::{dht_state_path, read_optional};
use tinytorrent_telemetry::Metrics;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blocklist::{BlocklistStatus, load_blocklist};
use crate::commands::{PeerLimits, SpeedLimits, prepare_add};
use crate::error::{EngineError, EngineResult};
use crate::history::{HistoryAgent, HistoryStore};
use crate::manager::TorrentManager;
use crate::queue::TaskQueue;
use crate::service::{
    EngineOptions, EngineShared, EngineTask, ListenState, ServiceState, SessionService,
    SessionStats, blocking,
};

/// Everything the engine needs to start.
pub struct EngineSetup {
    /// Session the engine drives.
    pub session: Box<dyn SessionPort>,
    /// Durable state.
    pub persistence: PersistenceManager,
    /// Settings before persisted overrides are applied.
    pub settings: CoreSettings,
    /// Event bus shared with the rest of the process.
    pub events: EventBus,
    /// Engine metrics.
    pub metrics: Metrics,
    /// Loop timings.
    pub options: EngineOptions,
}

impl std::fmt::Debug for EngineSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSetup")
            .field("settings", &self.settings)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Cloneable handle onto the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("pending_tasks", &self.shared.queue.len())
            .field("shutting_down", &self.shared.shutdown_requested())
            .finish_non_exhaustive()
    }
}

fn load_failed(operation: &'static str) -> impl FnOnce(tinytorrent_data::DataError) -> EngineError {
    move |source| EngineError::Persistence { operation, source }
}

/// Load the blocklist on the io worker and apply it on the engine task.
fn schedule_blocklist_load(
    shared: &EngineShared,
    reply: Option<oneshot::Sender<bool>>,
) -> EngineResult<()> {
    let path = shared.with_settings(|settings| settings.blocklist_path.clone());
    let queue = Arc::clone(&shared.queue);
    let accepted = shared.io.submit(async move {
        let loaded = blocking(move || load_blocklist(&path))
            .await
            .and_then(|result| result.map_err(anyhow::Error::from));
        let pushed = queue.push(Box::new(move |service: &mut SessionService| {
            let applied = service.apply_blocklist(loaded);
            if let Some(reply) = reply {
                let _ = reply.send(applied);
            }
            Ok(())
        }));
        if let Err(err) = pushed {
            debug!(error = %err, "blocklist result dropped");
        }
    });
    if accepted {
        Ok(())
    } else {
        Err(EngineError::ShuttingDown)
    }
}

/// Queue completion relocation whenever a torrent finishes.
fn register_completion_handler(
    events: &EventBus,
    queue: Arc<TaskQueue<EngineTask>>,
) -> HandlerId {
    events.register_handler(move |event| {
        let Event::TorrentFinished { hash } = event else {
            return;
        };
        let Ok(hash) = InfoHash::from_hex(hash) else {
            return;
        };
        let pushed = queue.push(Box::new(move |service: &mut SessionService| {
            service.relocate_completed(hash)
        }));
        if let Err(err) = pushed {
            debug!(hash = %hash, error = %err, "completion handling skipped");
        }
    })
}

impl EngineHandle {
    /// Restore persisted state into the session and spawn the engine task.
    ///
    /// # Errors
    ///
    /// Returns an error when persisted settings, statistics or torrents cannot be loaded.
    pub async fn start(setup: EngineSetup) -> EngineResult<Self> {
        let EngineSetup {
            mut session,
            persistence,
            mut settings,
            events,
            metrics,
            options,
        } = setup;

        let state_path = settings.state_path.clone();
        let pairs = persistence
            .load_settings()
            .await
            .map_err(load_failed("load settings"))?;
        for err in settings.apply_pairs(pairs) {
            warn!(field = err.field(), error = %err, "ignoring stored setting");
        }
        settings.state_path = state_path;
        let totals = persistence
            .load_statistics()
            .await
            .map_err(load_failed("load statistics"))?;
        let records = persistence
            .load_torrents()
            .await
            .map_err(load_failed("load torrents"))?;

        let now = Instant::now();
        let io = AsyncTaskService::spawn("engine-io");
        let history_worker = AsyncTaskService::spawn("engine-history");
        let store: Arc<dyn HistoryStore> = Arc::new(persistence.clone());
        let history = HistoryAgent::new(
            store,
            history_worker.clone(),
            settings.history_config(),
            now,
            Utc::now().timestamp(),
        );

        let alt_active = should_use_alt_speed_now(&settings);
        let initial = session.apply_settings(&SettingsPatch::full(build_engine_settings(
            &settings, alt_active,
        )));
        if !settings.state_path.as_os_str().is_empty() {
            match read_optional(&dht_state_path(&settings.state_path)) {
                Ok(Some(state)) => match session.restore_dht_state(&state) {
                    Ok(()) => debug!(bytes = state.len(), "dht state restored"),
                    Err(err) => warn!(error = %err, "dht state rejected"),
                },
                Ok(None) => {}
                Err(err) => warn!(error = %err, "dht state unreadable"),
            }
        }

        let queue: Arc<TaskQueue<EngineTask>> =
            Arc::new(TaskQueue::with_capacity(options.queue_capacity));
        let published = Arc::new(ArcSwap::from_pointee(SessionSnapshot::default()));
        let blocklist_configured = !settings.blocklist_path.as_os_str().is_empty();
        let shared = Arc::new(EngineShared {
            queue: Arc::clone(&queue),
            snapshot: Arc::clone(&published),
            settings: RwLock::new(settings),
            listen: RwLock::new(ListenState::default()),
            blocklist: RwLock::new(BlocklistStatus::default()),
            shutdown: AtomicBool::new(false),
            events,
            metrics,
            persistence,
            io,
            history: history.reader(),
        });

        let mut state = ServiceState::new(
            Arc::clone(&shared),
            options,
            history,
            history_worker,
            SessionStats::new(totals, now),
            now,
        );
        state.alt_active = alt_active;
        if let Err(err) = initial {
            let detail = err.to_string();
            state.mark_degraded("session", Some(&detail));
        }

        state.completion_handler = Some(register_completion_handler(
            &shared.events,
            Arc::clone(&queue),
        ));

        let manager = TorrentManager::new(session, queue, published);
        let mut service = SessionService::new(manager, state);
        service.replay(records);
        let join = tokio::spawn(service.run());

        let handle = Self {
            shared,
            join: Arc::new(Mutex::new(Some(join))),
        };
        if blocklist_configured {
            schedule_blocklist_load(&handle.shared, None)?;
        }
        info!("engine started");
        Ok(handle)
    }

    fn submit<F>(&self, task: F) -> EngineResult<()>
    where
        F: FnOnce(&mut SessionService) -> anyhow::Result<()> + Send + 'static,
    {
        self.shared.queue.push(Box::new(task))
    }

    /// Run `task` on the engine task and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the task, the engine drops it, or it fails.
    pub async fn run_task<T, F>(&self, operation: &'static str, task: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionService) -> anyhow::Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |service| {
            let _ = tx.send(task(service));
            Ok(())
        })?;
        rx.await
            .map_err(|_| EngineError::TaskDropped { operation })?
            .map_err(|source| EngineError::TaskFailed { operation, source })
    }

    /// Validate and queue a torrent.
    ///
    /// Parsing and path checks run synchronously; the add itself happens on the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the add.
    pub fn add_torrent(&self, request: TorrentAddRequest) -> EngineResult<AddTorrentStatus> {
        match prepare_add(request) {
            Ok(prepared) => {
                self.submit(move |service| service.add_validated(prepared))?;
                Ok(AddTorrentStatus::Ok)
            }
            Err(status) => Ok(status),
        }
    }

    /// Resume torrents.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn start_torrents(&self, ids: &[RpcId]) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.start_torrents(&ids);
            Ok(())
        })
    }

    /// Pause torrents.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn stop_torrents(&self, ids: &[RpcId]) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.stop_torrents(&ids);
            Ok(())
        })
    }

    /// Recheck torrent data.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn verify_torrents(&self, ids: &[RpcId]) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.verify_torrents(&ids);
            Ok(())
        })
    }

    /// Remove torrents, optionally deleting their data.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn remove_torrents(&self, ids: &[RpcId], delete_data: bool) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.remove_torrents(&ids, delete_data);
            Ok(())
        })
    }

    /// Announce to trackers now.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn reannounce_torrents(&self, ids: &[RpcId]) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.reannounce_torrents(&ids);
            Ok(())
        })
    }

    /// Change queue positions.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn queue_move(&self, ids: &[RpcId], direction: QueueMove) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.queue_move(&ids, direction);
            Ok(())
        })
    }

    /// Select or skip files by index.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_files_wanted(
        &self,
        ids: &[RpcId],
        files: &[usize],
        wanted: bool,
    ) -> EngineResult<()> {
        let ids = ids.to_vec();
        let files = files.to_vec();
        self.submit(move |service| {
            service.set_files_wanted(&ids, &files, wanted);
            Ok(())
        })
    }

    /// Toggle sequential download.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_sequential(&self, ids: &[RpcId], enabled: bool) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.set_sequential(&ids, enabled);
            Ok(())
        })
    }

    /// Toggle super-seeding.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_super_seeding(&self, ids: &[RpcId], enabled: bool) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.set_super_seeding(&ids, enabled);
            Ok(())
        })
    }

    /// Move one torrent's storage.
    ///
    /// # Errors
    ///
    /// Returns an error when `path` is empty or the queue rejects the command.
    pub fn move_storage(&self, id: RpcId, path: PathBuf, move_data: bool) -> EngineResult<()> {
        if path.as_os_str().is_empty() {
            return Err(EngineError::InvalidInput {
                field: "path",
                reason: "storage location is empty",
            });
        }
        self.submit(move |service| service.move_storage(id, &path, move_data))
    }

    /// Change the default download directory.
    ///
    /// # Errors
    ///
    /// Returns an error when `path` is empty or the queue rejects the command.
    pub fn set_download_path(&self, path: PathBuf) -> EngineResult<()> {
        if path.as_os_str().is_empty() {
            return Err(EngineError::InvalidInput {
                field: "download_path",
                reason: "download path is empty",
            });
        }
        self.submit(move |service| {
            service.set_download_path(path);
            Ok(())
        })
    }

    /// Change the listen port. Returns `false` for port zero.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_listen_port(&self, port: u16) -> EngineResult<bool> {
        if port == 0 {
            return Ok(false);
        }
        self.submit(move |service| service.set_listen_port(port))?;
        Ok(true)
    }

    /// Update global speed limits.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_speed_limits(&self, limits: SpeedLimits) -> EngineResult<()> {
        self.submit(move |service| {
            service.set_speed_limits(limits);
            Ok(())
        })
    }

    /// Update global connection limits.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_peer_limits(&self, limits: PeerLimits) -> EngineResult<()> {
        self.submit(move |service| {
            service.set_peer_limits(limits);
            Ok(())
        })
    }

    /// Apply a partial session settings update.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn update_session_settings(&self, update: SessionUpdate) -> EngineResult<()> {
        self.submit(move |service| {
            service.update_session_settings(&update);
            Ok(())
        })
    }

    /// Add trackers that are not yet present.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn add_trackers(&self, ids: &[RpcId], trackers: Vec<TrackerEntry>) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.add_trackers(&ids, &trackers);
            Ok(())
        })
    }

    /// Remove trackers by announce URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn remove_trackers(&self, ids: &[RpcId], announces: Vec<String>) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.remove_trackers(&ids, &announces);
            Ok(())
        })
    }

    /// Replace the tracker list.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn replace_trackers(&self, ids: &[RpcId], trackers: Vec<TrackerEntry>) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.replace_trackers(&ids, &trackers);
            Ok(())
        })
    }

    /// Merge per-torrent bandwidth settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_bandwidth(&self, ids: &[RpcId], bandwidth: TorrentBandwidth) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.set_bandwidth(&ids, &bandwidth);
            Ok(())
        })
    }

    /// Configure per-torrent seed limits.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_seed_limits(&self, ids: &[RpcId], limits: TorrentSeedLimit) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.set_seed_limits(&ids, &limits);
            Ok(())
        })
    }

    /// Replace torrent labels.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue rejects the command.
    pub fn set_labels(&self, ids: &[RpcId], labels: Vec<String>) -> EngineResult<()> {
        let ids = ids.to_vec();
        self.submit(move |service| {
            service.set_labels(&ids, &labels);
            Ok(())
        })
    }

    /// Reload the configured blocklist. Resolves to whether it was applied.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine is shutting down.
    pub async fn reload_blocklist(&self) -> EngineResult<bool> {
        let (tx, rx) = oneshot::channel();
        schedule_blocklist_load(&self.shared, Some(tx))?;
        Ok(rx.await.unwrap_or(false))
    }

    /// Stored speed history regrouped into `step`-second buckets.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or inverted range, or when the query fails.
    pub async fn history_data(
        &self,
        start: i64,
        end: i64,
        step: i64,
    ) -> EngineResult<Vec<HistoryBucket>> {
        if step <= 0 {
            return Err(EngineError::InvalidInput {
                field: "step",
                reason: "step must be positive",
            });
        }
        if end < start {
            return Err(EngineError::InvalidInput {
                field: "end",
                reason: "range ends before it starts",
            });
        }
        self.shared.history.query(start, end, step).await
    }

    /// Delete history older than `older_than`, or all of it.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine is shutting down.
    pub async fn history_clear(&self, older_than: Option<i64>) -> EngineResult<bool> {
        match self.shared.history.clear(older_than).await {
            Ok(removed) => {
                info!(removed, older_than = ?older_than, "history cleared");
                Ok(true)
            }
            Err(EngineError::ShuttingDown) => Err(EngineError::ShuttingDown),
            Err(err) => {
                warn!(error = %err, "history clear failed");
                Ok(false)
            }
        }
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.shared.snapshot.load_full()
    }

    /// Full detail for one torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the id is unknown or the engine cannot answer.
    pub async fn torrent_detail(&self, id: RpcId) -> EngineResult<TorrentDetail> {
        self.run_task("torrent detail", move |service| Ok(service.torrent_detail(id)))
            .await?
            .ok_or(EngineError::TorrentNotFound { id })
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> CoreSettings {
        self.shared.settings()
    }

    /// Bound listen endpoint, once known.
    #[must_use]
    pub fn listen_endpoint(&self) -> Option<String> {
        self.shared.listen().endpoint
    }

    /// Last listen failure, cleared by a successful bind.
    #[must_use]
    pub fn listen_error(&self) -> Option<String> {
        self.shared.listen().error
    }

    /// Active blocklist size and load time.
    #[must_use]
    pub fn blocklist_status(&self) -> BlocklistStatus {
        self.shared.blocklist_status()
    }

    /// Event bus the engine publishes on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Engine metrics.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    /// Stop accepting work, drain resume data and wait for the engine task to exit.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine task panicked.
    pub async fn shutdown(&self) -> EngineResult<()> {
        info!("engine shutdown requested");
        self.shared.request_shutdown();
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            join.await.map_err(|source| EngineError::Join { source })?;
        }
        Ok(())
    }
}

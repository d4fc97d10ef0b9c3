//! Command handlers executed on the engine task.
//!
//! Every handler resolves RPC ids against the manager, applies the change to the session, mirrors
//! durable state into persistence and marks the affected snapshot entries dirty. Per-torrent
//! failures are logged and the remaining ids are still processed.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use tinytorrent_config::{
    SessionUpdate, SettingsPatch, apply_update, connection_limits, kbps_to_bytes, network_settings,
};
use tinytorrent_core::{
    AddTorrentParams, AddTorrentStatus, InfoHash, MoveMode, QueueMove, RpcId, TorrentAddRequest,
    TorrentBandwidth, TorrentDetail, TorrentLimits, TorrentSeedLimit, TorrentSource, TrackerEntry,
    parse_magnet, parse_metainfo,
};
use tinytorrent_data::PersistedTorrent;
use tinytorrent_events::Event;
use tinytorrent_fsops::read_optional;
use tracing::{debug, info, warn};

use crate::blocklist::{Blocklist, BlocklistStatus};
use crate::service::{SessionService, blocking};
use crate::snapshot::SnapshotBuilder;

/// Engine priority for a wanted file.
pub const FILE_PRIORITY_WANTED: i32 = 4;
/// Engine priority that skips a file.
pub const FILE_PRIORITY_SKIPPED: i32 = 0;

/// Partial update of the global speed limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeedLimits {
    /// Download limit in KiB/s.
    pub download_kbps: Option<i32>,
    /// Whether the download limit applies.
    pub download_enabled: Option<bool>,
    /// Upload limit in KiB/s.
    pub upload_kbps: Option<i32>,
    /// Whether the upload limit applies.
    pub upload_enabled: Option<bool>,
}

/// Partial update of the global connection limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerLimits {
    /// Session-wide connection cap.
    pub global: Option<i32>,
    /// Default per-torrent connection cap.
    pub per_torrent: Option<i32>,
}

/// An add request that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct PreparedAdd {
    pub(crate) hash: InfoHash,
    pub(crate) name: Option<String>,
    pub(crate) source: TorrentSource,
    pub(crate) download_path: PathBuf,
    pub(crate) paused: bool,
}

/// Validate an add request without touching the engine.
///
/// An empty download path defers to the session default. A non-empty path is created when
/// missing and must end up a directory.
pub(crate) fn prepare_add(request: TorrentAddRequest) -> Result<PreparedAdd, AddTorrentStatus> {
    let TorrentAddRequest {
        source,
        download_path,
        paused,
    } = request;
    let (hash, name) = match &source {
        TorrentSource::Magnet { uri } => {
            let link = parse_magnet(uri).map_err(|err| {
                debug!(error = %err, "magnet rejected");
                AddTorrentStatus::InvalidUri
            })?;
            (link.hash, link.name)
        }
        TorrentSource::Metainfo { bytes } => {
            let meta = parse_metainfo(bytes).map_err(|err| {
                debug!(error = %err, "metainfo rejected");
                AddTorrentStatus::InvalidUri
            })?;
            (meta.hash, Some(meta.name))
        }
    };

    if !download_path.as_os_str().is_empty() {
        if let Err(err) = fs::create_dir_all(&download_path) {
            debug!(path = %download_path.display(), error = %err, "download path unusable");
            return Err(AddTorrentStatus::InvalidPath);
        }
        if !download_path.is_dir() {
            return Err(AddTorrentStatus::InvalidPath);
        }
    }

    Ok(PreparedAdd {
        hash,
        name,
        source,
        download_path,
        paused,
    })
}

fn normalize_labels(labels: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .map(|label| label.trim())
        .filter(|label| !label.is_empty())
        .filter(|label| seen.insert(label.to_string()))
        .map(str::to_string)
        .collect()
}

fn merge_bandwidth(current: &mut TorrentBandwidth, update: &TorrentBandwidth) {
    if update.priority.is_some() {
        current.priority = update.priority;
    }
    if update.download_limit_kbps.is_some() {
        current.download_limit_kbps = update.download_limit_kbps;
    }
    if update.download_limited.is_some() {
        current.download_limited = update.download_limited;
    }
    if update.upload_limit_kbps.is_some() {
        current.upload_limit_kbps = update.upload_limit_kbps;
    }
    if update.upload_limited.is_some() {
        current.upload_limited = update.upload_limited;
    }
    if update.peer_limit.is_some() {
        current.peer_limit = update.peer_limit;
    }
}

const fn touches_limits(update: &TorrentBandwidth) -> bool {
    update.download_limit_kbps.is_some()
        || update.download_limited.is_some()
        || update.upload_limit_kbps.is_some()
        || update.upload_limited.is_some()
        || update.peer_limit.is_some()
}

fn replace_port(interface: &str, port: u16) -> String {
    let host = interface
        .rsplit_once(':')
        .map_or(interface, |(host, _)| host);
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    format!("{host}:{port}")
}

impl SessionService {
    fn for_each_torrent<F>(&mut self, ids: &[RpcId], operation: &'static str, mut apply: F)
    where
        F: FnMut(&mut Self, RpcId, InfoHash) -> anyhow::Result<()>,
    {
        for id in ids {
            let Some(hash) = self.manager.hash_for(*id) else {
                debug!(torrent_id = id, operation, "unknown torrent id");
                continue;
            };
            if let Err(err) = apply(self, *id, hash) {
                warn!(
                    torrent_id = id,
                    hash = %hash,
                    operation,
                    error = %err,
                    "torrent command failed"
                );
            }
        }
    }

    /// Add a validated torrent to the session and persist its record.
    pub(crate) fn add_validated(&mut self, add: PreparedAdd) -> anyhow::Result<()> {
        let PreparedAdd {
            hash,
            name,
            source,
            download_path,
            paused,
        } = add;
        if self.manager.session().status(&hash).is_some() {
            info!(hash = %hash, "torrent already present");
            return Ok(());
        }

        let settings = self.state.shared.settings();
        let requested = !download_path.as_os_str().is_empty();
        let final_dir = if requested {
            download_path
        } else {
            settings.download_path.clone()
        };
        let staging = settings.incomplete_dir_enabled
            && !settings.incomplete_dir.as_os_str().is_empty()
            && final_dir != settings.incomplete_dir;
        let save_path = if staging {
            if requested {
                self.state.final_paths.insert(hash, final_dir);
            }
            settings.incomplete_dir.clone()
        } else {
            final_dir
        };

        let (magnet_uri, metainfo) = match &source {
            TorrentSource::Magnet { uri } => (Some(uri.clone()), None),
            TorrentSource::Metainfo { bytes } => (None, Some(bytes.clone())),
        };
        self.manager
            .session_mut()
            .add_torrent(AddTorrentParams {
                hash,
                name,
                source,
                save_path: save_path.clone(),
                paused,
                resume_data: None,
            })
            .with_context(|| format!("session rejected torrent {hash}"))?;

        let id = self.manager.assign_rpc_id(hash);
        self.state.shared.persistence.upsert_torrent(PersistedTorrent {
            hash,
            save_path: save_path.clone(),
            paused,
            magnet_uri,
            metainfo,
            metadata_path: None,
            resume_data: None,
            labels: Vec::new(),
            rpc_id: Some(id),
            added_at: Utc::now().timestamp(),
        });
        info!(
            torrent_id = id,
            hash = %hash,
            save_path = %save_path.display(),
            "torrent queued for add"
        );
        Ok(())
    }

    /// Re-add persisted torrents, keeping their stored RPC ids.
    pub(crate) fn replay(&mut self, records: Vec<PersistedTorrent>) {
        for record in &records {
            if let Some(id) = record.rpc_id
                && !self.manager.recover_rpc_id(record.hash, id)
            {
                warn!(hash = %record.hash, torrent_id = id, "stored rpc id conflicts; reassigning");
            }
        }

        let mut restored = 0_usize;
        for record in records {
            let PersistedTorrent {
                hash,
                save_path,
                paused,
                magnet_uri,
                metainfo,
                metadata_path,
                resume_data,
                labels,
                ..
            } = record;
            let source = if let Some(bytes) = metainfo {
                TorrentSource::Metainfo { bytes }
            } else if let Some(uri) = magnet_uri {
                TorrentSource::Magnet { uri }
            } else if let Some(path) = metadata_path {
                match read_optional(&path) {
                    Ok(Some(bytes)) => TorrentSource::Metainfo { bytes },
                    Ok(None) => {
                        warn!(
                            hash = %hash,
                            path = %path.display(),
                            "metadata sidecar missing; torrent skipped"
                        );
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            hash = %hash,
                            error = %err,
                            "metadata sidecar unreadable; torrent skipped"
                        );
                        continue;
                    }
                }
            } else {
                warn!(hash = %hash, "persisted torrent has no source; skipped");
                continue;
            };

            if !labels.is_empty() {
                self.state.labels.insert(hash, labels);
            }
            let added = self.manager.session_mut().add_torrent(AddTorrentParams {
                hash,
                name: None,
                source,
                save_path,
                paused,
                resume_data,
            });
            match added {
                Ok(()) => {
                    self.manager.assign_rpc_id(hash);
                    restored += 1;
                }
                Err(err) => warn!(hash = %hash, error = %err, "failed to restore torrent"),
            }
        }
        info!(restored, "persisted torrents restored");
    }

    /// Resume torrents and restart their idle clocks; recorded errors are cleared.
    pub(crate) fn start_torrents(&mut self, ids: &[RpcId]) {
        let now = Instant::now();
        self.for_each_torrent(ids, "start", |service, id, hash| {
            service.manager.session_mut().resume(&hash)?;
            service.state.seed_limits.restart(id, now);
            service.state.shared.persistence.update_paused(&hash, false);
            service.state.clear_error(&mut service.manager, &hash);
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn stop_torrents(&mut self, ids: &[RpcId]) {
        self.for_each_torrent(ids, "stop", |service, id, hash| {
            service.manager.session_mut().pause(&hash)?;
            service.state.shared.persistence.update_paused(&hash, true);
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn verify_torrents(&mut self, ids: &[RpcId]) {
        self.for_each_torrent(ids, "verify", |service, id, hash| {
            service.manager.session_mut().force_recheck(&hash)?;
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn reannounce_torrents(&mut self, ids: &[RpcId]) {
        self.for_each_torrent(ids, "reannounce", |service, _, hash| {
            Ok(service.manager.session_mut().force_reannounce(&hash)?)
        });
    }

    /// Remove torrents, their records and their metadata sidecars.
    pub(crate) fn remove_torrents(&mut self, ids: &[RpcId], delete_data: bool) {
        self.for_each_torrent(ids, "remove", |service, _, hash| {
            service
                .manager
                .session_mut()
                .remove_torrent(&hash, delete_data)?;
            let persistence = &service.state.shared.persistence;
            let sidecar = persistence
                .cached(&hash)
                .and_then(|record| record.metadata_path);
            persistence.remove_torrent(&hash);
            service.state.labels.remove(&hash);
            service.state.errors.remove(&hash);
            service.state.pending_moves.remove(&hash);
            service.state.final_paths.remove(&hash);
            if let Some(path) = sidecar {
                service.state.shared.io.submit(async move {
                    let target = path.clone();
                    match blocking(move || fs::remove_file(&target)).await {
                        Ok(Ok(())) => debug!(path = %path.display(), "metadata sidecar removed"),
                        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Ok(Err(err)) => warn!(
                            path = %path.display(),
                            error = %err,
                            "metadata sidecar removal failed"
                        ),
                        Err(err) => warn!(error = %err, "metadata sidecar removal aborted"),
                    }
                });
            }
            info!(hash = %hash, delete_data, "torrent removal requested");
            Ok(())
        });
    }

    /// Move queue positions, keeping the relative order of `ids` for multi-torrent moves.
    pub(crate) fn queue_move(&mut self, ids: &[RpcId], direction: QueueMove) {
        let ordered: Vec<RpcId> = match direction {
            QueueMove::Top | QueueMove::Down => ids.iter().rev().copied().collect(),
            QueueMove::Bottom | QueueMove::Up => ids.to_vec(),
        };
        self.for_each_torrent(&ordered, "queue move", |service, _, hash| {
            service.manager.session_mut().queue_move(&hash, direction)?;
            Ok(())
        });
        let hashes = self.manager.session().handles();
        for hash in &hashes {
            self.manager.mark_hash_dirty(hash);
        }
    }

    pub(crate) fn set_files_wanted(&mut self, ids: &[RpcId], files: &[usize], wanted: bool) {
        let priority = if wanted {
            FILE_PRIORITY_WANTED
        } else {
            FILE_PRIORITY_SKIPPED
        };
        let priorities: Vec<(usize, i32)> = files.iter().map(|index| (*index, priority)).collect();
        self.for_each_torrent(ids, "file selection", |service, id, hash| {
            service
                .manager
                .session_mut()
                .set_file_priorities(&hash, &priorities)?;
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn set_sequential(&mut self, ids: &[RpcId], enabled: bool) {
        self.for_each_torrent(ids, "sequential", |service, id, hash| {
            service.manager.session_mut().set_sequential(&hash, enabled)?;
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn set_super_seeding(&mut self, ids: &[RpcId], enabled: bool) {
        self.for_each_torrent(ids, "super seeding", |service, id, hash| {
            service
                .manager
                .session_mut()
                .set_super_seeding(&hash, enabled)?;
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    /// Point a torrent at `path`, moving its data when `move_data` is set.
    pub(crate) fn move_storage(
        &mut self,
        id: RpcId,
        path: &Path,
        move_data: bool,
    ) -> anyhow::Result<()> {
        let hash = self
            .manager
            .hash_for(id)
            .with_context(|| format!("unknown torrent id {id}"))?;
        self.begin_move(hash, path, move_data)?;
        self.state.final_paths.remove(&hash);
        Ok(())
    }

    pub(crate) fn begin_move(
        &mut self,
        hash: InfoHash,
        path: &Path,
        move_data: bool,
    ) -> anyhow::Result<()> {
        let mode = if move_data {
            MoveMode::MoveData
        } else {
            MoveMode::PathOnly
        };
        self.state.pending_moves.insert(hash, path.to_path_buf());
        if let Err(err) = self.manager.session_mut().move_storage(&hash, path, mode) {
            self.state.pending_moves.remove(&hash);
            return Err(err.into());
        }
        info!(hash = %hash, path = %path.display(), move_data, "storage move requested");
        Ok(())
    }

    fn settings_changed(&mut self, description: &str, now: Instant) {
        self.state.mark_settings_dirty(now);
        self.state.publish(Event::SettingsChanged {
            description: description.to_string(),
        });
    }

    pub(crate) fn set_download_path(&mut self, path: PathBuf) {
        let mut settings = self.state.shared.settings();
        info!(path = %path.display(), "default download path changed");
        settings.download_path = path;
        self.state.shared.store_settings(settings);
        self.settings_changed("download path", Instant::now());
    }

    pub(crate) fn set_listen_port(&mut self, port: u16) -> anyhow::Result<()> {
        let mut settings = self.state.shared.settings();
        settings.listen_interface = replace_port(&settings.listen_interface, port);
        let patch = SettingsPatch {
            network: Some(network_settings(&settings)),
            ..SettingsPatch::default()
        };
        info!(interface = %settings.listen_interface, "listen port changed");
        self.state.shared.store_settings(settings);
        self.settings_changed("listen port", Instant::now());
        self.manager.session_mut().apply_settings(&patch)?;
        Ok(())
    }

    pub(crate) fn set_speed_limits(&mut self, limits: SpeedLimits) {
        let mut settings = self.state.shared.settings();
        if let Some(kbps) = limits.download_kbps {
            settings.download_rate_limit_kbps = kbps.max(0);
        }
        if let Some(enabled) = limits.download_enabled {
            settings.download_rate_limit_enabled = enabled;
        }
        if let Some(kbps) = limits.upload_kbps {
            settings.upload_rate_limit_kbps = kbps.max(0);
        }
        if let Some(enabled) = limits.upload_enabled {
            settings.upload_rate_limit_enabled = enabled;
        }
        self.state.shared.store_settings(settings);
        self.state.force_speed_check = true;
        self.settings_changed("speed limits", Instant::now());
    }

    pub(crate) fn set_peer_limits(&mut self, limits: PeerLimits) {
        let mut settings = self.state.shared.settings();
        if let Some(global) = limits.global {
            settings.peer_limit = global.max(0);
        }
        if let Some(per_torrent) = limits.per_torrent {
            settings.peer_limit_per_torrent = per_torrent.max(0);
        }
        self.state.shared.store_settings(settings);
        self.state.force_speed_check = true;
        self.settings_changed("peer limits", Instant::now());
    }

    pub(crate) fn update_session_settings(&mut self, update: &SessionUpdate) {
        let now = Instant::now();
        let current = self.state.shared.settings();
        let result = apply_update(&current, update);
        if result.engine_changed()
            || connection_limits(&current) != connection_limits(&result.settings)
        {
            self.state.force_speed_check = true;
        }
        self.state.history.update_config(
            result.history_config,
            result.flush_history_after,
            result.configure_history_after,
            now,
            Utc::now().timestamp(),
        );
        self.state.shared.store_settings(result.settings);
        if result.persist {
            self.settings_changed("session settings", now);
        }
    }

    pub(crate) fn add_trackers(&mut self, ids: &[RpcId], entries: &[TrackerEntry]) {
        self.for_each_torrent(ids, "add trackers", |service, id, hash| {
            let mut trackers = service.manager.session().trackers(&hash);
            for entry in entries {
                if !trackers.iter().any(|existing| existing.announce == entry.announce) {
                    trackers.push(entry.clone());
                }
            }
            service
                .manager
                .session_mut()
                .replace_trackers(&hash, &trackers)?;
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn remove_trackers(&mut self, ids: &[RpcId], announces: &[String]) {
        self.for_each_torrent(ids, "remove trackers", |service, id, hash| {
            let trackers: Vec<TrackerEntry> = service
                .manager
                .session()
                .trackers(&hash)
                .into_iter()
                .filter(|entry| !announces.contains(&entry.announce))
                .collect();
            service
                .manager
                .session_mut()
                .replace_trackers(&hash, &trackers)?;
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn replace_trackers(&mut self, ids: &[RpcId], entries: &[TrackerEntry]) {
        self.for_each_torrent(ids, "replace trackers", |service, id, hash| {
            service
                .manager
                .session_mut()
                .replace_trackers(&hash, entries)?;
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    /// Merge a bandwidth update into each torrent's stored configuration.
    pub(crate) fn set_bandwidth(&mut self, ids: &[RpcId], update: &TorrentBandwidth) {
        self.for_each_torrent(ids, "bandwidth", |service, id, hash| {
            let merged = {
                let entry = service.state.bandwidth.entry(id).or_default();
                merge_bandwidth(entry, update);
                *entry
            };
            if let Some(priority) = merged.priority {
                service.state.priorities.insert(id, priority.clamp(-1, 1));
            }
            if touches_limits(update) {
                let limits = TorrentLimits {
                    download_bps: kbps_to_bytes(
                        merged.download_limit_kbps.unwrap_or(0),
                        merged.download_limited.unwrap_or(false),
                    ),
                    upload_bps: kbps_to_bytes(
                        merged.upload_limit_kbps.unwrap_or(0),
                        merged.upload_limited.unwrap_or(false),
                    ),
                    max_connections: merged.peer_limit.unwrap_or(0).max(0),
                };
                service
                    .manager
                    .session_mut()
                    .set_torrent_limits(&hash, limits)?;
            }
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn set_seed_limits(&mut self, ids: &[RpcId], limits: &TorrentSeedLimit) {
        let now = Instant::now();
        self.for_each_torrent(ids, "seed limits", |service, id, _| {
            service.state.seed_limits.configure(id, limits, now);
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    pub(crate) fn set_labels(&mut self, ids: &[RpcId], labels: &[String]) {
        let labels = normalize_labels(labels);
        self.for_each_torrent(ids, "labels", |service, id, hash| {
            service.state.shared.persistence.update_labels(&hash, &labels);
            if labels.is_empty() {
                service.state.labels.remove(&hash);
            } else {
                service.state.labels.insert(hash, labels.clone());
            }
            service.manager.mark_dirty(id);
            Ok(())
        });
    }

    /// Install a parsed blocklist, or record why it could not be loaded.
    pub(crate) fn apply_blocklist(&mut self, loaded: anyhow::Result<Blocklist>) -> bool {
        let applied = loaded.and_then(|blocklist| {
            self.manager
                .session_mut()
                .set_ip_filter(&blocklist.ranges)?;
            Ok(blocklist)
        });
        match applied {
            Ok(blocklist) => {
                let entries = blocklist.ranges.len();
                self.state.shared.set_blocklist_status(BlocklistStatus {
                    entries,
                    updated_at: Some(blocklist.loaded_at),
                });
                info!(entries, "blocklist applied");
                self.state.mark_recovered("blocklist");
                self.state.publish(Event::BlocklistLoaded { entries });
                true
            }
            Err(err) => {
                let detail = format!("{err:#}");
                self.state.mark_degraded("blocklist", Some(&detail));
                false
            }
        }
    }

    /// Full detail for one torrent.
    pub(crate) fn torrent_detail(&self, id: RpcId) -> Option<TorrentDetail> {
        let hash = self.manager.hash_for(id)?;
        let session = self.manager.session();
        let summary = match self.manager.cached_entry(id) {
            Some(entry) => entry.clone(),
            None => {
                let status = session.status(&hash)?;
                let error = self.state.errors.get(&hash).map(String::as_str);
                SnapshotBuilder::build(id, &status, 0, None, error)
            }
        };
        let internals = session.internals(&hash)?;
        Some(SnapshotBuilder::detail(summary, &internals, session.trackers(&hash)))
    }
}

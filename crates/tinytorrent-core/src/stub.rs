//! In-memory [`SessionPort`] used by tests and local development.
//!
//! The session and its [`StubController`] share state, so a test can hand the session to the
//! engine and keep poking statuses and alerts from outside.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use tinytorrent_config::SettingsPatch;

use crate::metainfo::parse_metainfo;
use crate::model::{InfoHash, QueueMove, TorrentSource, TorrentState, TrackerEntry};
use crate::session::{
    AddTorrentParams, Alert, FileStatus, IpRange, MoveMode, SessionPort, TorrentInternals,
    TorrentLimits, TorrentStatus,
};

#[derive(Debug, Clone)]
struct StubTorrent {
    status: TorrentStatus,
    files: Vec<FileStatus>,
    trackers: Vec<TrackerEntry>,
    torrent_file: Option<Vec<u8>>,
    piece_size: i64,
    piece_count: usize,
    resume_data: Option<Vec<u8>>,
    limits: TorrentLimits,
}

#[derive(Debug, Default)]
struct StubState {
    torrents: Vec<StubTorrent>,
    alerts: Vec<Alert>,
    applied_settings: Vec<SettingsPatch>,
    ip_filter: Vec<IpRange>,
    dht_state: Option<Vec<u8>>,
    silent_resume: HashSet<InfoHash>,
    reject_next_add: Option<String>,
    fail_moves: bool,
    posted: HashMap<InfoHash, TorrentStatus>,
}

impl StubState {
    fn torrent_mut(&mut self, hash: &InfoHash) -> Result<&mut StubTorrent> {
        self.torrents
            .iter_mut()
            .find(|torrent| torrent.status.hash == *hash)
            .ok_or_else(|| anyhow!("unknown torrent {hash}"))
    }

    fn torrent(&self, hash: &InfoHash) -> Option<&StubTorrent> {
        self.torrents
            .iter()
            .find(|torrent| torrent.status.hash == *hash)
    }

    fn renumber_queue(&mut self) {
        for (index, torrent) in self.torrents.iter_mut().enumerate() {
            torrent.status.queue_position = i32::try_from(index).unwrap_or(i32::MAX);
        }
    }
}

fn lock(state: &Mutex<StubState>) -> MutexGuard<'_, StubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}

/// In-memory session double.
#[derive(Debug, Default)]
pub struct StubSession {
    state: Arc<Mutex<StubState>>,
}

impl StubSession {
    /// Construct an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for inspecting and driving the session from outside the engine.
    #[must_use]
    pub fn controller(&self) -> StubController {
        StubController {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        lock(&self.state)
    }
}

impl SessionPort for StubSession {
    fn handles(&self) -> Vec<InfoHash> {
        self.state()
            .torrents
            .iter()
            .map(|torrent| torrent.status.hash)
            .collect()
    }

    fn status(&self, hash: &InfoHash) -> Option<TorrentStatus> {
        self.state()
            .torrent(hash)
            .map(|torrent| torrent.status.clone())
    }

    fn internals(&self, hash: &InfoHash) -> Option<TorrentInternals> {
        let state = self.state();
        let torrent = state.torrent(hash)?;
        let complete = torrent.status.progress >= 1.0;
        Some(TorrentInternals {
            files: torrent.files.clone(),
            peers: Vec::new(),
            piece_size: torrent.piece_size,
            pieces: vec![complete; torrent.piece_count],
            availability: vec![0; torrent.piece_count],
        })
    }

    fn trackers(&self, hash: &InfoHash) -> Vec<TrackerEntry> {
        self.state()
            .torrent(hash)
            .map(|torrent| torrent.trackers.clone())
            .unwrap_or_default()
    }

    fn torrent_file(&self, hash: &InfoHash) -> Option<Vec<u8>> {
        self.state()
            .torrent(hash)
            .and_then(|torrent| torrent.torrent_file.clone())
    }

    fn add_torrent(&mut self, params: AddTorrentParams) -> Result<()> {
        let mut state = self.state();
        if let Some(message) = state.reject_next_add.take() {
            state.alerts.push(Alert::AddFailed {
                hash: Some(params.hash),
                message,
            });
            return Ok(());
        }
        if state.torrent(&params.hash).is_some() {
            state.alerts.push(Alert::AddFailed {
                hash: Some(params.hash),
                message: "torrent already in session".to_string(),
            });
            return Ok(());
        }

        let mut status = TorrentStatus {
            hash: params.hash,
            name: params.name.clone().unwrap_or_default(),
            save_path: params.save_path.clone(),
            state: TorrentState::DownloadingMetadata,
            paused: params.paused,
            queue_position: i32::try_from(state.torrents.len()).unwrap_or(i32::MAX),
            added_time: unix_now(),
            ..TorrentStatus::default()
        };
        let mut torrent = StubTorrent {
            status: TorrentStatus::default(),
            files: Vec::new(),
            trackers: Vec::new(),
            torrent_file: None,
            piece_size: 0,
            piece_count: 0,
            resume_data: params.resume_data.clone(),
            limits: TorrentLimits::default(),
        };
        if let TorrentSource::Metainfo { bytes } = &params.source {
            let meta = parse_metainfo(bytes)?;
            status.name.clone_from(&meta.name);
            status.state = TorrentState::Downloading;
            status.has_metadata = true;
            status.total_size = meta.total_length();
            status.total_wanted = meta.total_length();
            torrent.files = meta
                .files
                .iter()
                .map(|file| FileStatus {
                    path: file.path.clone(),
                    size: file.length,
                    downloaded: 0,
                    priority: 4,
                })
                .collect();
            torrent.trackers = meta.trackers;
            torrent.torrent_file = Some(bytes.clone());
            torrent.piece_size = meta.piece_length;
            torrent.piece_count = meta.piece_count;
        }
        torrent.status = status;
        state.torrents.push(torrent);
        state.alerts.push(Alert::TorrentAdded { hash: params.hash });
        Ok(())
    }

    fn remove_torrent(&mut self, hash: &InfoHash, _delete_data: bool) -> Result<()> {
        let mut state = self.state();
        let before = state.torrents.len();
        state.torrents.retain(|torrent| torrent.status.hash != *hash);
        if state.torrents.len() == before {
            return Err(anyhow!("unknown torrent {hash} for remove command"));
        }
        state.renumber_queue();
        state.alerts.push(Alert::TorrentRemoved { hash: *hash });
        Ok(())
    }

    fn pause(&mut self, hash: &InfoHash) -> Result<()> {
        let mut state = self.state();
        let torrent = state.torrent_mut(hash)?;
        torrent.status.paused = true;
        torrent.status.download_rate = 0;
        torrent.status.upload_rate = 0;
        state.alerts.push(Alert::TorrentPaused { hash: *hash });
        Ok(())
    }

    fn resume(&mut self, hash: &InfoHash) -> Result<()> {
        let mut state = self.state();
        state.torrent_mut(hash)?.status.paused = false;
        state.alerts.push(Alert::TorrentResumed { hash: *hash });
        Ok(())
    }

    fn force_recheck(&mut self, hash: &InfoHash) -> Result<()> {
        let mut state = self.state();
        state.torrent_mut(hash)?.status.state = TorrentState::CheckingFiles;
        state.alerts.push(Alert::StateChanged {
            hash: *hash,
            state: TorrentState::CheckingFiles,
        });
        Ok(())
    }

    fn force_reannounce(&mut self, hash: &InfoHash) -> Result<()> {
        self.state().torrent_mut(hash).map(|_| ())
    }

    fn queue_move(&mut self, hash: &InfoHash, direction: QueueMove) -> Result<()> {
        let mut state = self.state();
        let index = state
            .torrents
            .iter()
            .position(|torrent| torrent.status.hash == *hash)
            .ok_or_else(|| anyhow!("unknown torrent {hash} for queue move"))?;
        let last = state.torrents.len() - 1;
        let target = match direction {
            QueueMove::Top => 0,
            QueueMove::Bottom => last,
            QueueMove::Up => index.saturating_sub(1),
            QueueMove::Down => (index + 1).min(last),
        };
        let torrent = state.torrents.remove(index);
        state.torrents.insert(target, torrent);
        state.renumber_queue();
        Ok(())
    }

    fn set_file_priorities(
        &mut self,
        hash: &InfoHash,
        priorities: &[(usize, i32)],
    ) -> Result<()> {
        let mut state = self.state();
        let torrent = state.torrent_mut(hash)?;
        for (index, priority) in priorities {
            if let Some(file) = torrent.files.get_mut(*index) {
                file.priority = *priority;
            }
        }
        torrent.status.total_wanted = torrent
            .files
            .iter()
            .filter(|file| file.priority > 0)
            .map(|file| file.size)
            .sum();
        Ok(())
    }

    fn set_sequential(&mut self, hash: &InfoHash, enabled: bool) -> Result<()> {
        self.state().torrent_mut(hash)?.status.sequential_download = enabled;
        Ok(())
    }

    fn set_super_seeding(&mut self, hash: &InfoHash, enabled: bool) -> Result<()> {
        self.state().torrent_mut(hash)?.status.super_seeding = enabled;
        Ok(())
    }

    fn move_storage(&mut self, hash: &InfoHash, path: &Path, _mode: MoveMode) -> Result<()> {
        let mut state = self.state();
        let fail = state.fail_moves;
        let torrent = state.torrent_mut(hash)?;
        let alert = if fail {
            Alert::StorageMoveFailed {
                hash: *hash,
                message: "permission denied".to_string(),
            }
        } else {
            torrent.status.save_path = path.to_path_buf();
            Alert::StorageMoved {
                hash: *hash,
                path: path.to_path_buf(),
            }
        };
        state.alerts.push(alert);
        Ok(())
    }

    fn replace_trackers(&mut self, hash: &InfoHash, trackers: &[TrackerEntry]) -> Result<()> {
        self.state().torrent_mut(hash)?.trackers = trackers.to_vec();
        Ok(())
    }

    fn set_torrent_limits(&mut self, hash: &InfoHash, limits: TorrentLimits) -> Result<()> {
        self.state().torrent_mut(hash)?.limits = limits;
        Ok(())
    }

    fn save_resume_data(&mut self, hash: &InfoHash) -> Result<()> {
        let mut state = self.state();
        let silent = state.silent_resume.contains(hash);
        let torrent = state.torrent_mut(hash)?;
        let data = format!("resume:{hash}").into_bytes();
        torrent.resume_data = Some(data.clone());
        if !silent {
            state.alerts.push(Alert::SaveResumeData { hash: *hash, data });
        }
        Ok(())
    }

    fn apply_settings(&mut self, patch: &SettingsPatch) -> Result<()> {
        self.state().applied_settings.push(patch.clone());
        Ok(())
    }

    fn set_ip_filter(&mut self, ranges: &[IpRange]) -> Result<()> {
        self.state().ip_filter = ranges.to_vec();
        Ok(())
    }

    fn dht_state(&self) -> Option<Vec<u8>> {
        self.state().dht_state.clone()
    }

    fn restore_dht_state(&mut self, state: &[u8]) -> Result<()> {
        self.state().dht_state = Some(state.to_vec());
        Ok(())
    }

    fn post_torrent_updates(&mut self) {
        let mut state = self.state();
        let mut changed = Vec::new();
        let mut posted = HashMap::with_capacity(state.torrents.len());
        for torrent in &state.torrents {
            let hash = torrent.status.hash;
            if state.posted.get(&hash) != Some(&torrent.status) {
                changed.push(hash);
            }
            posted.insert(hash, torrent.status.clone());
        }
        state.posted = posted;
        if !changed.is_empty() {
            state.alerts.push(Alert::StateUpdate { hashes: changed });
        }
    }

    fn pop_alerts(&mut self, out: &mut Vec<Alert>) {
        out.append(&mut self.state().alerts);
    }
}

/// Shared handle onto a [`StubSession`]'s state.
#[derive(Debug, Clone)]
pub struct StubController {
    state: Arc<Mutex<StubState>>,
}

impl StubController {
    fn state(&self) -> MutexGuard<'_, StubState> {
        lock(&self.state)
    }

    /// Queue an alert for the next drain.
    pub fn push_alert(&self, alert: Alert) {
        self.state().alerts.push(alert);
    }

    /// Mutate a torrent's status. Returns `false` for unknown hashes.
    pub fn update_status(&self, hash: &InfoHash, update: impl FnOnce(&mut TorrentStatus)) -> bool {
        let mut state = self.state();
        state.torrent_mut(hash).is_ok_and(|torrent| {
            update(&mut torrent.status);
            true
        })
    }

    /// Mark a torrent fully downloaded and seeding, and raise the finished alert.
    pub fn complete(&self, hash: &InfoHash) -> bool {
        let updated = self.update_status(hash, |status| {
            status.progress = 1.0;
            status.total_wanted_done = status.total_wanted;
            status.state = TorrentState::Seeding;
            status.is_finished = true;
        });
        if updated {
            self.push_alert(Alert::TorrentFinished { hash: *hash });
        }
        updated
    }

    /// Current status of a torrent.
    #[must_use]
    pub fn status(&self, hash: &InfoHash) -> Option<TorrentStatus> {
        self.state()
            .torrent(hash)
            .map(|torrent| torrent.status.clone())
    }

    /// Hashes currently in the session.
    #[must_use]
    pub fn hashes(&self) -> Vec<InfoHash> {
        self.state()
            .torrents
            .iter()
            .map(|torrent| torrent.status.hash)
            .collect()
    }

    /// Never answer resume-data requests for `hash`.
    pub fn silence_resume(&self, hash: InfoHash) {
        let _ = self.state().silent_resume.insert(hash);
    }

    /// Refuse the next add with `message`.
    pub fn reject_next_add(&self, message: impl Into<String>) {
        self.state().reject_next_add = Some(message.into());
    }

    /// Make storage moves fail.
    pub fn fail_storage_moves(&self, fail: bool) {
        self.state().fail_moves = fail;
    }

    /// Every settings patch applied so far.
    #[must_use]
    pub fn applied_settings(&self) -> Vec<SettingsPatch> {
        self.state().applied_settings.clone()
    }

    /// Current IP filter.
    #[must_use]
    pub fn ip_filter(&self) -> Vec<IpRange> {
        self.state().ip_filter.clone()
    }

    /// Resume data last produced or supplied for a torrent.
    #[must_use]
    pub fn resume_data(&self, hash: &InfoHash) -> Option<Vec<u8>> {
        self.state()
            .torrent(hash)
            .and_then(|torrent| torrent.resume_data.clone())
    }

    /// Per-torrent caps last applied.
    #[must_use]
    pub fn limits(&self, hash: &InfoHash) -> Option<TorrentLimits> {
        self.state().torrent(hash).map(|torrent| torrent.limits)
    }

    /// Replace the DHT state the session reports.
    pub fn set_dht_state(&self, state: Vec<u8>) {
        self.state().dht_state = Some(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::encode_single_file;
    use std::path::PathBuf;

    fn metainfo_params(name: &str) -> AddTorrentParams {
        let bytes = encode_single_file(name, 32_768, 16_384, "http://tracker/announce");
        let hash = parse_metainfo(&bytes).expect("metainfo").hash;
        AddTorrentParams {
            hash,
            name: None,
            source: TorrentSource::metainfo(bytes),
            save_path: PathBuf::from("/downloads"),
            paused: false,
            resume_data: None,
        }
    }

    #[test]
    fn add_torrent_records_handle_and_alert() -> Result<()> {
        let mut session = StubSession::new();
        let params = metainfo_params("demo.iso");
        let hash = params.hash;
        session.add_torrent(params)?;

        assert_eq!(session.handles(), vec![hash]);
        let status = session.status(&hash).expect("status");
        assert_eq!(status.name, "demo.iso");
        assert!(status.has_metadata);
        assert_eq!(session.internals(&hash).expect("internals").pieces.len(), 2);

        let mut alerts = Vec::new();
        session.pop_alerts(&mut alerts);
        assert_eq!(alerts, vec![Alert::TorrentAdded { hash }]);
        session.pop_alerts(&mut alerts);
        assert_eq!(alerts.len(), 1);
        Ok(())
    }

    #[test]
    fn remove_unknown_torrent_errors() {
        let mut session = StubSession::new();
        assert!(session.remove_torrent(&InfoHash::new([1; 20]), false).is_err());
    }

    #[test]
    fn silenced_resume_produces_no_alert() -> Result<()> {
        let mut session = StubSession::new();
        let controller = session.controller();
        let params = metainfo_params("quiet");
        let hash = params.hash;
        session.add_torrent(params)?;
        controller.silence_resume(hash);

        let mut alerts = Vec::new();
        session.pop_alerts(&mut alerts);
        alerts.clear();
        session.save_resume_data(&hash)?;
        session.pop_alerts(&mut alerts);
        assert!(alerts.is_empty());
        assert!(controller.resume_data(&hash).is_some());
        Ok(())
    }

    #[test]
    fn queue_moves_reorder_handles() -> Result<()> {
        let mut session = StubSession::new();
        let first = metainfo_params("a");
        let second = metainfo_params("b");
        let (a, b) = (first.hash, second.hash);
        session.add_torrent(first)?;
        session.add_torrent(second)?;

        session.queue_move(&b, QueueMove::Top)?;
        assert_eq!(session.handles(), vec![b, a]);
        assert_eq!(session.status(&a).expect("status").queue_position, 1);
        Ok(())
    }

    #[test]
    fn state_updates_list_only_changed_handles() -> Result<()> {
        let mut session = StubSession::new();
        let controller = session.controller();
        let first = metainfo_params("one");
        let second = metainfo_params("two");
        let (a, b) = (first.hash, second.hash);
        session.add_torrent(first)?;
        session.add_torrent(second)?;

        let mut alerts = Vec::new();
        session.pop_alerts(&mut alerts);
        alerts.clear();

        session.post_torrent_updates();
        session.pop_alerts(&mut alerts);
        assert_eq!(alerts, vec![Alert::StateUpdate { hashes: vec![a, b] }]);

        alerts.clear();
        session.post_torrent_updates();
        session.pop_alerts(&mut alerts);
        assert!(alerts.is_empty());

        controller.update_status(&b, |status| status.download_rate = 512);
        session.post_torrent_updates();
        session.pop_alerts(&mut alerts);
        assert_eq!(alerts, vec![Alert::StateUpdate { hashes: vec![b] }]);
        Ok(())
    }

    #[test]
    fn controller_completion_raises_finished_alert() -> Result<()> {
        let mut session = StubSession::new();
        let controller = session.controller();
        let params = metainfo_params("done");
        let hash = params.hash;
        session.add_torrent(params)?;
        assert!(controller.complete(&hash));

        let status = session.status(&hash).expect("status");
        assert_eq!(status.state, TorrentState::Seeding);
        let mut alerts = Vec::new();
        session.pop_alerts(&mut alerts);
        assert!(alerts.contains(&Alert::TorrentFinished { hash }));
        Ok(())
    }
}

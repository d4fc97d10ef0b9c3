//! Translation from engine status structs into the published snapshot and detail views.

use tinytorrent_core::{
    PeerInfo, RpcId, TorrentDetail, TorrentFileInfo, TorrentInternals, TorrentSnapshot,
    TorrentState, TorrentStatus, TrackerEntry,
};

/// Status code reported for paused torrents.
pub const STATUS_STOPPED: i32 = 0;
/// Status code reported while verifying data.
pub const STATUS_CHECKING: i32 = 2;
/// Status code reported while downloading.
pub const STATUS_DOWNLOADING: i32 = 4;
/// Status code reported while seeding.
pub const STATUS_SEEDING: i32 = 6;

/// Error code attached to snapshots carrying an error string.
pub const ERROR_LOCAL: i32 = 3;

/// Numeric status used by RPC consumers.
#[must_use]
pub const fn status_code(status: &TorrentStatus) -> i32 {
    if status.paused {
        return STATUS_STOPPED;
    }
    match status.state {
        TorrentState::CheckingFiles | TorrentState::CheckingResumeData => STATUS_CHECKING,
        TorrentState::DownloadingMetadata | TorrentState::Downloading => STATUS_DOWNLOADING,
        TorrentState::Finished | TorrentState::Seeding => STATUS_SEEDING,
        TorrentState::Unknown => STATUS_STOPPED,
    }
}

/// Seconds until the wanted bytes are done at the current rate, or `-1` when stalled.
#[must_use]
pub const fn eta_seconds(status: &TorrentStatus) -> i64 {
    if status.download_rate <= 0 {
        return -1;
    }
    let remaining = status.total_wanted - status.total_wanted_done;
    if remaining <= 0 {
        return 0;
    }
    (remaining + status.download_rate - 1) / status.download_rate
}

#[allow(clippy::cast_precision_loss)]
fn ratio(status: &TorrentStatus) -> f64 {
    if status.total_download > 0 {
        status.total_upload as f64 / status.total_download as f64
    } else {
        0.0
    }
}

/// Builds snapshot entries for one torrent at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Snapshot entry for `status`.
    ///
    /// `added_time` from a previous entry wins over the engine's value so the timestamp stays
    /// stable across rebuilds; `error_override` replaces the engine's error text.
    #[must_use]
    pub fn build(
        id: RpcId,
        status: &TorrentStatus,
        revision: u64,
        added_time: Option<i64>,
        error_override: Option<&str>,
    ) -> TorrentSnapshot {
        let error_string = error_override
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .or_else(|| status.error.clone())
            .unwrap_or_default();
        TorrentSnapshot {
            id,
            hash: status.hash.to_hex(),
            name: status.name.clone(),
            state: status.state,
            status: status_code(status),
            progress: status.progress,
            total_size: status.total_size,
            total_wanted: status.total_wanted,
            total_done: status.total_wanted_done,
            left_until_done: (status.total_wanted - status.total_wanted_done).max(0),
            downloaded: status.total_download,
            uploaded: status.total_upload,
            download_rate: status.download_rate,
            upload_rate: status.upload_rate,
            peers_connected: status.num_peers,
            seeds_connected: status.num_seeds,
            eta: eta_seconds(status),
            ratio: ratio(status),
            is_finished: status.is_finished,
            paused: status.paused,
            sequential_download: status.sequential_download,
            super_seeding: status.super_seeding,
            queue_position: status.queue_position,
            bandwidth_priority: 0,
            error: if error_string.is_empty() { 0 } else { ERROR_LOCAL },
            error_string,
            labels: Vec::new(),
            save_path: status.save_path.to_string_lossy().into_owned(),
            added_time: added_time.unwrap_or(status.added_time),
            revision,
        }
    }

    /// Full detail view from a summary plus the handle's live internals.
    #[must_use]
    pub fn detail(
        summary: TorrentSnapshot,
        internals: &TorrentInternals,
        trackers: Vec<TrackerEntry>,
    ) -> TorrentDetail {
        TorrentDetail {
            summary,
            files: collect_files(internals),
            trackers,
            peers: collect_peers(internals),
            piece_count: i32::try_from(internals.pieces.len()).unwrap_or(i32::MAX),
            piece_size: internals.piece_size,
            piece_states: internals.pieces.clone(),
            piece_availability: internals.availability.clone(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn collect_files(internals: &TorrentInternals) -> Vec<TorrentFileInfo> {
    internals
        .files
        .iter()
        .enumerate()
        .map(|(index, file)| TorrentFileInfo {
            index: i32::try_from(index).unwrap_or(i32::MAX),
            name: file.path.clone(),
            length: file.size,
            bytes_completed: file.downloaded,
            progress: if file.size > 0 {
                file.downloaded as f64 / file.size as f64
            } else {
                0.0
            },
            priority: file.priority,
            wanted: file.priority > 0,
        })
        .collect()
}

fn collect_peers(internals: &TorrentInternals) -> Vec<PeerInfo> {
    internals
        .peers
        .iter()
        .map(|peer| PeerInfo {
            address: std::net::SocketAddr::new(peer.ip, peer.port).to_string(),
            client: peer.client.clone(),
            client_is_choking: peer.choked,
            client_is_interested: peer.interesting,
            peer_is_choking: peer.remote_choked,
            peer_is_interested: peer.remote_interested,
            download_rate: peer.download_rate,
            upload_rate: peer.upload_rate,
            progress: peer.progress,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tinytorrent_core::{FileStatus, InfoHash, PeerStatus};

    fn downloading() -> TorrentStatus {
        TorrentStatus {
            hash: InfoHash::new([3; 20]),
            name: "linux.iso".into(),
            state: TorrentState::Downloading,
            total_wanted: 1_000,
            total_wanted_done: 250,
            download_rate: 100,
            total_download: 400,
            total_upload: 200,
            added_time: 1_700_000_000,
            ..TorrentStatus::default()
        }
    }

    #[test]
    fn eta_rounds_up_and_reports_stalls() {
        let mut status = downloading();
        assert_eq!(eta_seconds(&status), 8);
        status.download_rate = 0;
        assert_eq!(eta_seconds(&status), -1);
        status.download_rate = 10;
        status.total_wanted_done = status.total_wanted;
        assert_eq!(eta_seconds(&status), 0);
    }

    #[test]
    fn status_codes_follow_state_and_pause() {
        let mut status = downloading();
        assert_eq!(status_code(&status), STATUS_DOWNLOADING);
        status.state = TorrentState::CheckingResumeData;
        assert_eq!(status_code(&status), STATUS_CHECKING);
        status.state = TorrentState::Seeding;
        assert_eq!(status_code(&status), STATUS_SEEDING);
        status.paused = true;
        assert_eq!(status_code(&status), STATUS_STOPPED);
    }

    #[test]
    fn build_fills_derived_fields() {
        let snapshot = SnapshotBuilder::build(4, &downloading(), 9, None, None);
        assert_eq!(snapshot.id, 4);
        assert_eq!(snapshot.revision, 9);
        assert_eq!(snapshot.left_until_done, 750);
        assert!((snapshot.ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.error, 0);
        assert_eq!(snapshot.added_time, 1_700_000_000);
    }

    #[test]
    fn recorded_error_overrides_engine_message() {
        let mut status = downloading();
        status.error = Some("disk full".into());
        let plain = SnapshotBuilder::build(1, &status, 1, Some(5), None);
        assert_eq!(plain.error_string, "disk full");
        assert_eq!(plain.added_time, 5);

        let overridden = SnapshotBuilder::build(1, &status, 1, None, Some("tracker: timed out"));
        assert_eq!(overridden.error_string, "tracker: timed out");
        assert_eq!(overridden.error, ERROR_LOCAL);
    }

    #[test]
    fn detail_collects_files_peers_and_pieces() {
        let internals = TorrentInternals {
            files: vec![
                FileStatus {
                    path: "a/one.bin".into(),
                    size: 200,
                    downloaded: 50,
                    priority: 4,
                },
                FileStatus {
                    path: "a/two.bin".into(),
                    size: 0,
                    downloaded: 0,
                    priority: 0,
                },
            ],
            peers: vec![PeerStatus {
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                port: 51_413,
                client: "peer/1.0".into(),
                choked: false,
                interesting: true,
                remote_choked: true,
                remote_interested: false,
                download_rate: 10,
                upload_rate: 0,
                progress: 0.5,
            }],
            piece_size: 16_384,
            pieces: vec![true, false, true],
            availability: vec![1, 0, 2],
        };
        let summary = SnapshotBuilder::build(2, &downloading(), 1, None, None);
        let detail = SnapshotBuilder::detail(summary, &internals, Vec::new());

        assert_eq!(detail.piece_count, 3);
        assert_eq!(detail.files.len(), 2);
        assert!((detail.files[0].progress - 0.25).abs() < f64::EPSILON);
        assert!(!detail.files[1].wanted);
        assert_eq!(detail.peers[0].address, "10.0.0.2:51413");
        assert_eq!(detail.piece_availability, vec![1, 0, 2]);
    }
}

//! Torrent domain types and the published snapshot views.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TorrentError;

/// Small integer assigned to each torrent for external consumers.
pub type RpcId = u32;

/// 20-byte torrent content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether every byte is zero (the engine's "unknown" hash).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 40-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidHash`] when the input is not 40 hex digits.
    pub fn from_hex(value: &str) -> Result<Self, TorrentError> {
        let mut bytes = [0_u8; 20];
        hex::decode_to_slice(value.trim(), &mut bytes).map_err(|_| TorrentError::InvalidHash {
            value: value.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = TorrentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_hex(value)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state reported by the engine for a torrent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TorrentState {
    /// Verifying pieces already on disk.
    CheckingFiles,
    /// Fetching metadata from peers.
    DownloadingMetadata,
    /// Transferring payload.
    Downloading,
    /// All wanted pieces present, not seeding.
    Finished,
    /// All pieces present and uploading.
    Seeding,
    /// Validating stored resume data.
    CheckingResumeData,
    /// State not reported.
    #[default]
    Unknown,
}

impl TorrentState {
    /// Stable label used in snapshots and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CheckingFiles => "checking-files",
            Self::DownloadingMetadata => "downloading-metadata",
            Self::Downloading => "downloading",
            Self::Finished => "finished",
            Self::Seeding => "seeding",
            Self::CheckingResumeData => "checking-resume-data",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the torrent is verifying local data.
    #[must_use]
    pub const fn is_checking(self) -> bool {
        matches!(self, Self::CheckingFiles | Self::CheckingResumeData)
    }

    /// Whether seed limits apply in this state.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Finished | Self::Seeding)
    }
}

/// How a torrent is supplied to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TorrentSource {
    /// Magnet URI.
    Magnet {
        /// URI text.
        uri: String,
    },
    /// Raw `.torrent` bytes.
    Metainfo {
        /// Bencoded payload.
        bytes: Vec<u8>,
    },
}

impl TorrentSource {
    /// Convenience constructor for magnet sources.
    #[must_use]
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Convenience constructor for metainfo sources.
    #[must_use]
    pub fn metainfo(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Metainfo {
            bytes: bytes.into(),
        }
    }
}

/// Request to add a torrent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TorrentAddRequest {
    /// Magnet or metainfo payload.
    pub source: TorrentSource,
    /// Requested download directory; empty uses the session default.
    #[serde(default)]
    pub download_path: PathBuf,
    /// Add in the paused state.
    #[serde(default)]
    pub paused: bool,
}

/// Synchronous validation outcome of an add request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AddTorrentStatus {
    /// Accepted and queued for the engine.
    Ok,
    /// Magnet or metainfo could not be parsed.
    InvalidUri,
    /// Download path cannot be used.
    InvalidPath,
}

/// Direction for queue position changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueMove {
    /// First position.
    Top,
    /// Last position.
    Bottom,
    /// One position earlier.
    Up,
    /// One position later.
    Down,
}

/// Tracker announce URL and tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackerEntry {
    /// Announce URL.
    pub announce: String,
    /// Tier, lower tiers are tried first.
    #[serde(default)]
    pub tier: i32,
}

/// Per-torrent seed limit configuration request.
///
/// Modes: 0 follows the global setting, 1 uses the torrent's own value, 2 is unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TorrentSeedLimit {
    /// Ratio threshold.
    pub ratio_limit: Option<f64>,
    /// Ratio limit switch.
    pub ratio_enabled: Option<bool>,
    /// Ratio mode.
    pub ratio_mode: Option<i32>,
    /// Idle threshold in minutes.
    pub idle_limit: Option<i32>,
    /// Idle limit switch.
    pub idle_enabled: Option<bool>,
    /// Idle mode.
    pub idle_mode: Option<i32>,
}

/// Per-torrent bandwidth configuration request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TorrentBandwidth {
    /// Priority: -1 low, 0 normal, 1 high.
    pub priority: Option<i32>,
    /// Download cap in KiB/s.
    pub download_limit_kbps: Option<i32>,
    /// Whether the download cap applies.
    pub download_limited: Option<bool>,
    /// Upload cap in KiB/s.
    pub upload_limit_kbps: Option<i32>,
    /// Whether the upload cap applies.
    pub upload_limited: Option<bool>,
    /// Per-torrent connection cap.
    pub peer_limit: Option<i32>,
}

/// Byte and time counters for a session or the lifetime of the install.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTotals {
    /// Bytes uploaded.
    pub uploaded_bytes: u64,
    /// Bytes downloaded.
    pub downloaded_bytes: u64,
    /// Seconds the session was running.
    pub seconds_active: u64,
    /// Number of sessions started.
    pub session_count: u64,
}

/// Immutable view of one torrent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TorrentSnapshot {
    /// RPC id.
    pub id: RpcId,
    /// Lowercase hex info-hash.
    pub hash: String,
    /// Display name.
    pub name: String,
    /// Engine lifecycle state.
    pub state: TorrentState,
    /// Transmission-style status code.
    pub status: i32,
    /// Completion fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Size of every file in bytes.
    pub total_size: i64,
    /// Bytes selected for download.
    pub total_wanted: i64,
    /// Selected bytes already verified.
    pub total_done: i64,
    /// Selected bytes still missing.
    pub left_until_done: i64,
    /// All-time bytes downloaded.
    pub downloaded: i64,
    /// All-time bytes uploaded.
    pub uploaded: i64,
    /// Download rate in bytes per second.
    pub download_rate: i64,
    /// Upload rate in bytes per second.
    pub upload_rate: i64,
    /// Connected peers.
    pub peers_connected: i32,
    /// Connected seeds.
    pub seeds_connected: i32,
    /// Seconds to completion, -1 when unknown.
    pub eta: i64,
    /// All-time upload/download ratio.
    pub ratio: f64,
    /// All wanted pieces present.
    pub is_finished: bool,
    /// Paused by the user or a limit.
    pub paused: bool,
    /// Pieces are fetched in order.
    pub sequential_download: bool,
    /// Super-seeding mode.
    pub super_seeding: bool,
    /// Position in the download queue.
    pub queue_position: i32,
    /// Bandwidth priority.
    pub bandwidth_priority: i32,
    /// Non-zero when `error_string` is set.
    pub error: i32,
    /// Last recorded error.
    pub error_string: String,
    /// User labels.
    pub labels: Vec<String>,
    /// Directory holding the payload.
    pub save_path: String,
    /// Unix seconds when added.
    pub added_time: i64,
    /// Bumped whenever the entry changes.
    pub revision: u64,
}

/// Immutable view of the whole session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    /// Torrents in RPC id order.
    pub torrents: Vec<TorrentSnapshot>,
    /// Length of `torrents`.
    pub torrent_count: usize,
    /// Torrents transferring data.
    pub active_torrent_count: usize,
    /// Paused torrents.
    pub paused_torrent_count: usize,
    /// Download rate in bytes per second.
    pub download_rate: i64,
    /// Upload rate in bytes per second.
    pub upload_rate: i64,
    /// Whether alternate speed limits apply.
    pub alt_speed_active: bool,
    /// Lifetime counters.
    pub cumulative_stats: SessionTotals,
    /// Counters for this process.
    pub current_stats: SessionTotals,
    /// Tick counter at which the snapshot was built.
    pub generation: u64,
}

impl SessionSnapshot {
    /// Find a torrent by RPC id.
    #[must_use]
    pub fn torrent(&self, id: RpcId) -> Option<&TorrentSnapshot> {
        self.torrents.iter().find(|torrent| torrent.id == id)
    }
}

/// One file inside a torrent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TorrentFileInfo {
    /// File index.
    pub index: i32,
    /// Display name.
    pub name: String,
    /// File size in bytes.
    pub length: i64,
    /// Bytes present on disk.
    pub bytes_completed: i64,
    /// Completion fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Engine download priority; zero skips the file.
    pub priority: i32,
    /// Selected for download.
    pub wanted: bool,
}

/// One connected peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PeerInfo {
    /// `ip:port`.
    pub address: String,
    /// Peer client name.
    pub client: String,
    /// We are choking the peer.
    pub client_is_choking: bool,
    /// We want data from the peer.
    pub client_is_interested: bool,
    /// The peer is choking us.
    pub peer_is_choking: bool,
    /// The peer wants data from us.
    pub peer_is_interested: bool,
    /// Download rate in bytes per second.
    pub download_rate: i64,
    /// Upload rate in bytes per second.
    pub upload_rate: i64,
    /// Completion fraction in `0.0..=1.0`.
    pub progress: f64,
}

/// Full detail for one torrent, built on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TorrentDetail {
    /// Snapshot entry for the torrent.
    pub summary: TorrentSnapshot,
    /// Files.
    pub files: Vec<TorrentFileInfo>,
    /// Trackers.
    pub trackers: Vec<TrackerEntry>,
    /// Connected peers.
    pub peers: Vec<PeerInfo>,
    /// Number of pieces.
    pub piece_count: i32,
    /// Piece size in bytes.
    pub piece_size: i64,
    /// Whether each piece is present.
    pub piece_states: Vec<bool>,
    /// Copies of each piece among connected peers.
    pub piece_availability: Vec<i32>,
}

/// Aggregated transfer totals for one history bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryBucket {
    /// Bucket start, unix seconds.
    pub timestamp: i64,
    /// Bytes downloaded during the bucket.
    pub total_down: u64,
    /// Bytes uploaded during the bucket.
    pub total_up: u64,
    /// Highest per-tick download delta seen in the bucket.
    pub peak_down: u64,
    /// Highest per-tick upload delta seen in the bucket.
    pub peak_up: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_hash_round_trips_through_hex() {
        let hash = InfoHash::new([0xab; 20]);
        let parsed: InfoHash = hash.to_hex().parse().expect("parse hex");
        assert_eq!(parsed, hash);
        assert!(InfoHash::from_hex("zz").is_err());
        assert!(InfoHash::default().is_zero());
    }

    #[test]
    fn states_serialise_as_kebab_labels() {
        let json = serde_json::to_string(&TorrentState::DownloadingMetadata).expect("serialise");
        assert_eq!(json, "\"downloading-metadata\"");
        assert!(TorrentState::Seeding.is_complete());
        assert!(TorrentState::CheckingResumeData.is_checking());
    }

    #[test]
    fn snapshot_lookup_by_id() {
        let snapshot = SessionSnapshot {
            torrents: vec![TorrentSnapshot {
                id: 7,
                ..TorrentSnapshot::default()
            }],
            torrent_count: 1,
            ..SessionSnapshot::default()
        };
        assert!(snapshot.torrent(7).is_some());
        assert!(snapshot.torrent(8).is_none());
    }
}

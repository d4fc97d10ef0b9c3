//! Narrow interface over the third-party torrent engine session.
//!
//! # Design
//! - The session is owned by the engine task and only ever touched from it, so the trait is
//!   synchronous and takes `&mut self` for mutations.
//! - Alerts are drained into a caller-owned buffer to avoid per-tick allocation.
//! - Handles are identified by info-hash; RPC ids are an engine-core concern.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tinytorrent_config::SettingsPatch;

use crate::model::{InfoHash, QueueMove, TorrentSource, TorrentState, TrackerEntry};

/// Point-in-time status of one torrent handle as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct TorrentStatus {
    /// Info-hash.
    pub hash: InfoHash,
    /// Name, empty until metadata is known.
    pub name: String,
    /// Current save directory.
    pub save_path: PathBuf,
    /// Lifecycle state.
    pub state: TorrentState,
    /// Paused flag.
    pub paused: bool,
    /// Completion fraction.
    pub progress: f64,
    /// Size of every file.
    pub total_size: i64,
    /// Bytes selected for download.
    pub total_wanted: i64,
    /// Selected bytes verified.
    pub total_wanted_done: i64,
    /// Download rate in bytes per second.
    pub download_rate: i64,
    /// Upload rate in bytes per second.
    pub upload_rate: i64,
    /// Bytes downloaded in this session.
    pub total_download: i64,
    /// Bytes uploaded in this session.
    pub total_upload: i64,
    /// Bytes downloaded over the torrent's lifetime.
    pub all_time_download: i64,
    /// Bytes uploaded over the torrent's lifetime.
    pub all_time_upload: i64,
    /// Connected peers.
    pub num_peers: i32,
    /// Connected seeds.
    pub num_seeds: i32,
    /// Queue position, -1 when not queued.
    pub queue_position: i32,
    /// Engine-reported error.
    pub error: Option<String>,
    /// All wanted pieces present.
    pub is_finished: bool,
    /// Metadata is known.
    pub has_metadata: bool,
    /// Sequential download mode.
    pub sequential_download: bool,
    /// Super-seeding mode.
    pub super_seeding: bool,
    /// Unix seconds when added.
    pub added_time: i64,
}

/// One file of a torrent handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStatus {
    /// Path relative to the save directory.
    pub path: String,
    /// Size in bytes.
    pub size: i64,
    /// Bytes present.
    pub downloaded: i64,
    /// Download priority; zero skips the file.
    pub priority: i32,
}

/// One connected peer of a torrent handle.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PeerStatus {
    /// Remote address.
    pub ip: IpAddr,
    /// Remote port.
    pub port: u16,
    /// Client name.
    pub client: String,
    /// We choke the peer.
    pub choked: bool,
    /// We are interested in the peer.
    pub interesting: bool,
    /// The peer chokes us.
    pub remote_choked: bool,
    /// The peer is interested in us.
    pub remote_interested: bool,
    /// Download rate from the peer.
    pub download_rate: i64,
    /// Upload rate to the peer.
    pub upload_rate: i64,
    /// Peer's completion fraction.
    pub progress: f64,
}

/// Live handle state not captured by [`TorrentStatus`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TorrentInternals {
    /// Files in payload order.
    pub files: Vec<FileStatus>,
    /// Connected peers.
    pub peers: Vec<PeerStatus>,
    /// Piece size in bytes.
    pub piece_size: i64,
    /// Whether each piece is present.
    pub pieces: Vec<bool>,
    /// Copies of each piece among connected peers.
    pub availability: Vec<i32>,
}

/// Parameters for adding a torrent to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTorrentParams {
    /// Hash known ahead of the add.
    pub hash: InfoHash,
    /// Display name hint.
    pub name: Option<String>,
    /// Magnet or metainfo.
    pub source: TorrentSource,
    /// Save directory.
    pub save_path: PathBuf,
    /// Start paused.
    pub paused: bool,
    /// Previously saved resume data.
    pub resume_data: Option<Vec<u8>>,
}

/// Whether a storage move relocates existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// Move files to the new location.
    MoveData,
    /// Only point the torrent at the new location.
    PathOnly,
}

/// Inclusive address range rejected by the session's IP filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    /// First blocked address.
    pub start: IpAddr,
    /// Last blocked address.
    pub end: IpAddr,
}

/// Per-torrent transfer caps in bytes per second; zero is unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TorrentLimits {
    /// Download cap.
    pub download_bps: i64,
    /// Upload cap.
    pub upload_bps: i64,
    /// Connection cap; zero leaves the default.
    pub max_connections: i32,
}

/// Asynchronous notification drained from the engine session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// A torrent was added.
    TorrentAdded {
        /// Info-hash.
        hash: InfoHash,
    },
    /// The session refused a torrent.
    AddFailed {
        /// Info-hash when known.
        hash: Option<InfoHash>,
        /// Engine message.
        message: String,
    },
    /// A torrent was removed.
    TorrentRemoved {
        /// Info-hash.
        hash: InfoHash,
    },
    /// A torrent finished downloading.
    TorrentFinished {
        /// Info-hash.
        hash: InfoHash,
    },
    /// Statuses changed since the previous post.
    StateUpdate {
        /// Info-hashes whose status changed.
        hashes: Vec<InfoHash>,
    },
    /// A torrent changed lifecycle state.
    StateChanged {
        /// Info-hash.
        hash: InfoHash,
        /// New state.
        state: TorrentState,
    },
    /// A torrent was paused.
    TorrentPaused {
        /// Info-hash.
        hash: InfoHash,
    },
    /// A torrent was resumed.
    TorrentResumed {
        /// Info-hash.
        hash: InfoHash,
    },
    /// Metadata arrived for a magnet torrent.
    MetadataReceived {
        /// Info-hash.
        hash: InfoHash,
    },
    /// Resume data was produced.
    SaveResumeData {
        /// Info-hash.
        hash: InfoHash,
        /// Serialized resume blob.
        data: Vec<u8>,
    },
    /// Resume data could not be produced.
    SaveResumeDataFailed {
        /// Info-hash.
        hash: InfoHash,
        /// Engine message.
        message: String,
    },
    /// Stored resume data was rejected.
    FastresumeRejected {
        /// Info-hash.
        hash: InfoHash,
        /// Engine message.
        message: String,
    },
    /// A listen socket was bound.
    ListenSucceeded {
        /// Interface address.
        address: String,
        /// Bound port.
        port: u16,
        /// IPv6 socket.
        is_ipv6: bool,
    },
    /// A listen socket could not be bound.
    ListenFailed {
        /// Interface address.
        address: String,
        /// Requested port.
        port: u16,
        /// IPv6 socket.
        is_ipv6: bool,
        /// Engine message.
        message: String,
    },
    /// Disk I/O failed for a torrent.
    FileError {
        /// Info-hash.
        hash: InfoHash,
        /// File involved.
        file: String,
        /// Engine message.
        message: String,
    },
    /// A tracker announce failed.
    TrackerError {
        /// Info-hash.
        hash: InfoHash,
        /// Tracker URL.
        url: String,
        /// Engine message.
        message: String,
    },
    /// Port mapping failed.
    PortmapError {
        /// Engine message.
        message: String,
    },
    /// Storage was moved.
    StorageMoved {
        /// Info-hash.
        hash: InfoHash,
        /// New save path.
        path: PathBuf,
    },
    /// Storage move failed.
    StorageMoveFailed {
        /// Info-hash.
        hash: InfoHash,
        /// Engine message.
        message: String,
    },
}

impl Alert {
    /// Discriminator used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentAdded { .. } => "torrent_added",
            Self::AddFailed { .. } => "add_failed",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::TorrentFinished { .. } => "torrent_finished",
            Self::StateUpdate { .. } => "state_update",
            Self::StateChanged { .. } => "state_changed",
            Self::TorrentPaused { .. } => "torrent_paused",
            Self::TorrentResumed { .. } => "torrent_resumed",
            Self::MetadataReceived { .. } => "metadata_received",
            Self::SaveResumeData { .. } => "save_resume_data",
            Self::SaveResumeDataFailed { .. } => "save_resume_data_failed",
            Self::FastresumeRejected { .. } => "fastresume_rejected",
            Self::ListenSucceeded { .. } => "listen_succeeded",
            Self::ListenFailed { .. } => "listen_failed",
            Self::FileError { .. } => "file_error",
            Self::TrackerError { .. } => "tracker_error",
            Self::PortmapError { .. } => "portmap_error",
            Self::StorageMoved { .. } => "storage_moved",
            Self::StorageMoveFailed { .. } => "storage_move_failed",
        }
    }

    /// Torrent the alert refers to, if any.
    #[must_use]
    pub const fn hash(&self) -> Option<InfoHash> {
        match self {
            Self::TorrentAdded { hash }
            | Self::TorrentRemoved { hash }
            | Self::TorrentFinished { hash }
            | Self::StateChanged { hash, .. }
            | Self::TorrentPaused { hash }
            | Self::TorrentResumed { hash }
            | Self::MetadataReceived { hash }
            | Self::SaveResumeData { hash, .. }
            | Self::SaveResumeDataFailed { hash, .. }
            | Self::FastresumeRejected { hash, .. }
            | Self::FileError { hash, .. }
            | Self::TrackerError { hash, .. }
            | Self::StorageMoved { hash, .. }
            | Self::StorageMoveFailed { hash, .. } => Some(*hash),
            Self::AddFailed { hash, .. } => *hash,
            Self::StateUpdate { .. }
            | Self::ListenSucceeded { .. }
            | Self::ListenFailed { .. }
            | Self::PortmapError { .. } => None,
        }
    }
}

/// Operations the engine core needs from a torrent session.
pub trait SessionPort: Send {
    /// Hashes of every live handle, in the session's order.
    fn handles(&self) -> Vec<InfoHash>;

    /// Status of one handle.
    fn status(&self, hash: &InfoHash) -> Option<TorrentStatus>;

    /// Files, peers and pieces of one handle.
    fn internals(&self, hash: &InfoHash) -> Option<TorrentInternals>;

    /// Trackers of one handle.
    fn trackers(&self, hash: &InfoHash) -> Vec<TrackerEntry>;

    /// Raw `.torrent` bytes once metadata is known.
    fn torrent_file(&self, hash: &InfoHash) -> Option<Vec<u8>>;

    /// Add a torrent. Completion is reported through alerts.
    ///
    /// # Errors
    ///
    /// Returns an error when the session rejects the parameters outright.
    fn add_torrent(&mut self, params: AddTorrentParams) -> Result<()>;

    /// Remove a torrent, optionally deleting its files.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn remove_torrent(&mut self, hash: &InfoHash, delete_data: bool) -> Result<()>;

    /// Pause a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn pause(&mut self, hash: &InfoHash) -> Result<()>;

    /// Resume a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn resume(&mut self, hash: &InfoHash) -> Result<()>;

    /// Re-verify on-disk data.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn force_recheck(&mut self, hash: &InfoHash) -> Result<()>;

    /// Announce to every tracker now.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn force_reannounce(&mut self, hash: &InfoHash) -> Result<()>;

    /// Change queue position.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn queue_move(&mut self, hash: &InfoHash, direction: QueueMove) -> Result<()>;

    /// Set per-file priorities; zero skips a file.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn set_file_priorities(&mut self, hash: &InfoHash, priorities: &[(usize, i32)])
    -> Result<()>;

    /// Toggle sequential download.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn set_sequential(&mut self, hash: &InfoHash, enabled: bool) -> Result<()>;

    /// Toggle super-seeding.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn set_super_seeding(&mut self, hash: &InfoHash, enabled: bool) -> Result<()>;

    /// Relocate storage. Completion is reported through alerts.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn move_storage(&mut self, hash: &InfoHash, path: &Path, mode: MoveMode) -> Result<()>;

    /// Replace the tracker list.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn replace_trackers(&mut self, hash: &InfoHash, trackers: &[TrackerEntry]) -> Result<()>;

    /// Apply per-torrent transfer caps.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn set_torrent_limits(&mut self, hash: &InfoHash, limits: TorrentLimits) -> Result<()>;

    /// Request resume data. Completion is reported through alerts.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    fn save_resume_data(&mut self, hash: &InfoHash) -> Result<()>;

    /// Push session-wide parameters.
    ///
    /// # Errors
    ///
    /// Returns an error when the session rejects a parameter.
    fn apply_settings(&mut self, patch: &SettingsPatch) -> Result<()>;

    /// Replace the IP filter.
    ///
    /// # Errors
    ///
    /// Returns an error when the session rejects the filter.
    fn set_ip_filter(&mut self, ranges: &[IpRange]) -> Result<()>;

    /// Serialized DHT routing state.
    fn dht_state(&self) -> Option<Vec<u8>>;

    /// Seed the DHT routing table from a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error when the state cannot be decoded.
    fn restore_dht_state(&mut self, state: &[u8]) -> Result<()>;

    /// Queue a [`Alert::StateUpdate`] listing handles whose status changed since the last call.
    fn post_torrent_updates(&mut self);

    /// Move every pending alert into `out`.
    fn pop_alerts(&mut self, out: &mut Vec<Alert>);
}

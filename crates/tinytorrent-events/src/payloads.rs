//! Event payload types carried across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each event emitted by the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Subsystem that reported a per-torrent error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// Disk read/write failure on the torrent payload.
    File,
    /// Tracker announce or scrape failure.
    Tracker,
    /// Storage relocation failure.
    Storage,
    /// Metadata could not be retrieved or stored.
    Metadata,
    /// Stored resume data was rejected by the engine.
    Fastresume,
    /// The engine refused to add the torrent.
    Add,
}

impl ErrorSource {
    /// Stable label used in logs and persisted diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Tracker => "tracker",
            Self::Storage => "storage",
            Self::Metadata => "metadata",
            Self::Fastresume => "fastresume",
            Self::Add => "add",
        }
    }
}

/// Typed domain events raised by the engine thread and its satellite services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The engine accepted a new torrent.
    TorrentAdded {
        /// Lowercase hex info-hash.
        hash: String,
        /// Display name known at add time.
        name: String,
    },
    /// A torrent was removed from the session.
    TorrentRemoved {
        /// Lowercase hex info-hash.
        hash: String,
    },
    /// A torrent finished downloading every wanted piece.
    TorrentFinished {
        /// Lowercase hex info-hash.
        hash: String,
    },
    /// Torrent metadata was written to its sidecar file.
    MetadataPersisted {
        /// Lowercase hex info-hash.
        hash: String,
        /// Location of the sidecar file.
        path: String,
    },
    /// Resume data for a torrent was handed to persistence.
    ResumeDataSaved {
        /// Lowercase hex info-hash.
        hash: String,
        /// Size of the resume blob in bytes.
        bytes: u64,
    },
    /// The engine failed to produce resume data for a torrent.
    ResumeDataFailed {
        /// Lowercase hex info-hash.
        hash: String,
        /// Engine-provided failure detail.
        message: String,
    },
    /// The session bound a listen socket.
    ListenSucceeded {
        /// Interface address.
        interface: String,
        /// Bound port.
        port: u16,
        /// Whether the socket is IPv6.
        is_ipv6: bool,
    },
    /// The session failed to bind a listen socket.
    ListenFailed {
        /// Interface address.
        interface: String,
        /// Requested port.
        port: u16,
        /// Whether the socket is IPv6.
        is_ipv6: bool,
        /// Failure detail.
        message: String,
    },
    /// Port mapping (UPnP/NAT-PMP) failed.
    PortmapFailed {
        /// Failure detail.
        message: String,
    },
    /// Torrent storage was moved to a new location.
    StorageMoved {
        /// Lowercase hex info-hash.
        hash: String,
        /// New save path.
        path: String,
    },
    /// Torrent storage move failed.
    StorageMoveFailed {
        /// Lowercase hex info-hash.
        hash: String,
        /// Failure detail.
        message: String,
    },
    /// A per-torrent error that should surface in the torrent's snapshot.
    TorrentError {
        /// Lowercase hex info-hash.
        hash: String,
        /// Human-readable message.
        message: String,
        /// Subsystem that produced the error.
        source: ErrorSource,
    },
    /// Session settings changed.
    SettingsChanged {
        /// Short description of what changed.
        description: String,
    },
    /// A blocklist was loaded and applied.
    BlocklistLoaded {
        /// Number of ranges applied.
        entries: usize,
    },
    /// A watch-directory file was processed.
    WatchFileProcessed {
        /// Path of the original file.
        path: String,
        /// Whether the torrent was accepted.
        accepted: bool,
    },
    /// The set of degraded components changed.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for log filtering and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentAdded { .. } => "torrent_added",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::TorrentFinished { .. } => "torrent_finished",
            Self::MetadataPersisted { .. } => "metadata_persisted",
            Self::ResumeDataSaved { .. } => "resume_data_saved",
            Self::ResumeDataFailed { .. } => "resume_data_failed",
            Self::ListenSucceeded { .. } => "listen_succeeded",
            Self::ListenFailed { .. } => "listen_failed",
            Self::PortmapFailed { .. } => "portmap_failed",
            Self::StorageMoved { .. } => "storage_moved",
            Self::StorageMoveFailed { .. } => "storage_move_failed",
            Self::TorrentError { .. } => "torrent_error",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::BlocklistLoaded { .. } => "blocklist_loaded",
            Self::WatchFileProcessed { .. } => "watch_file_processed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialise_with_type_tag() {
        let event = Event::TorrentError {
            hash: "ab".repeat(20),
            message: "disk full".into(),
            source: ErrorSource::File,
        };
        let json = serde_json::to_value(&event).expect("serialise event");
        assert_eq!(json["type"], "torrent_error");
        assert_eq!(json["source"], "file");
        assert_eq!(event.kind(), "torrent_error");
    }
}

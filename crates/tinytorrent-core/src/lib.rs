#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Torrent domain model and the seams shared by the engine crates.
//!
//! Layout: `model.rs` (identities and snapshot views), `session.rs` (`SessionPort` and
//! alerts), `stub.rs` (in-memory session), `metainfo.rs` (magnet and `.torrent` parsing),
//! `tasks.rs` (`AsyncTaskService`), `error.rs`.

pub mod error;
pub mod metainfo;
pub mod model;
pub mod session;
pub mod stub;
pub mod tasks;

pub use error::{TorrentError, TorrentResult};
pub use metainfo::{MagnetLink, Metainfo, MetainfoFile, parse_magnet, parse_metainfo};
pub use model::{
    AddTorrentStatus, HistoryBucket, InfoHash, PeerInfo, QueueMove, RpcId, SessionSnapshot,
    SessionTotals, TorrentAddRequest, TorrentBandwidth, TorrentDetail, TorrentFileInfo,
    TorrentSeedLimit, TorrentSnapshot, TorrentSource, TorrentState, TrackerEntry,
};
pub use session::{
    AddTorrentParams, Alert, FileStatus, IpRange, MoveMode, PeerStatus, SessionPort,
    TorrentInternals, TorrentLimits, TorrentStatus,
};
pub use stub::{StubController, StubSession};
pub use tasks::AsyncTaskService;

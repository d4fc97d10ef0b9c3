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

//! Engine orchestration for the TinyTorrent daemon.
//!
//! A single tokio task owns the session. Callers hold an [`EngineHandle`], queue commands onto
//! the engine task, and read lock-free [`SessionSnapshot`](tinytorrent_core::SessionSnapshot)s
//! republished every tick.
//!
//! Layout: `handle.rs` (public handle and startup), `service.rs` (tick loop and shutdown),
//! `manager.rs` (ids, alerts, snapshots), `commands.rs`, `alerts.rs`, `automation.rs` (watch
//! directory and completion moves), `limits.rs`, `history.rs`, `resume.rs`, `blocklist.rs`,
//! `queue.rs`, `snapshot.rs`, `error.rs`.

mod alerts;
mod automation;
pub mod blocklist;
pub mod commands;
pub mod error;
pub mod handle;
pub mod history;
pub mod limits;
pub mod manager;
pub mod queue;
pub mod resume;
pub mod service;
pub mod snapshot;

pub use blocklist::{Blocklist, BlocklistStatus, load_blocklist, parse_blocklist};
pub use commands::{PeerLimits, SpeedLimits};
pub use error::{EngineError, EngineResult};
pub use handle::{EngineHandle, EngineSetup};
pub use history::{HistoryReader, HistoryStore};
pub use manager::{AlertHandler, SnapshotHooks, TorrentManager};
pub use service::{EngineOptions, EngineTask, SessionService};

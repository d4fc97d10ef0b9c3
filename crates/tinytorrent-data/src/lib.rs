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

//! Persistence layer for TinyTorrent: torrent records, settings, statistics, and speed history.

pub mod error;
pub mod persistence;

pub use error::{DataError, DataResult};
pub use persistence::{
    PersistedTorrent, PersistenceManager, STAT_DOWNLOADED_BYTES, STAT_SECONDS_ACTIVE,
    STAT_SESSION_COUNT, STAT_UPLOADED_BYTES,
};

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

//! Filesystem automation for the TinyTorrent engine.
//!
//! Layout: `watch.rs` (watch-directory scanning and debounce), `completion.rs` (relocation
//! targets), `sidecar.rs` (metadata and DHT state files), `error.rs`.

pub mod completion;
pub mod error;
pub mod sidecar;
pub mod watch;

pub use completion::{MAX_COMPLETION_ATTEMPTS, completion_destination, resolve_unique_target};
pub use error::{FsOpsError, FsOpsResult};
pub use sidecar::{
    DHT_STATE_FILE, METADATA_DIR, dht_state_path, metadata_path, read_optional, write_atomic,
};
pub use watch::{
    MAX_WATCH_FILE_SIZE, WATCH_EXTENSION, WATCH_STABILITY_THRESHOLD, WatchEntry,
    WatchFingerprints, WatchOutcome, mark_watch_file, read_watch_file, scan_watch_dir,
};

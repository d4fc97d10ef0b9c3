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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Binary entrypoint that boots the TinyTorrent engine and blocks until shutdown.

use tinytorrent_app::{AppResult, run_app};

/// Bootstraps the daemon and waits for a shutdown signal.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}

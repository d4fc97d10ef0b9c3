//! Watch-directory ingestion and completion relocation.
//!
//! Both flows split the same way: filesystem work runs on the io worker and the results come back
//! to the engine task as queued tasks, so session state is only ever touched by the engine task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::Context;
use tinytorrent_core::{InfoHash, TorrentSource, TorrentState, parse_metainfo};
use tinytorrent_events::{ErrorSource, Event};
use tinytorrent_fsops::{
    WatchEntry, WatchFingerprints, WatchOutcome, completion_destination, mark_watch_file,
    read_watch_file, scan_watch_dir,
};
use tracing::{debug, info, warn};

use crate::commands::PreparedAdd;
use crate::service::{SessionService, blocking};

impl SessionService {
    /// Start a watch-directory scan unless one is already running.
    pub(crate) fn scan_watch_dir(&mut self) {
        let (enabled, dir) = self
            .state
            .shared
            .with_settings(|settings| (settings.watch_dir_enabled, settings.watch_dir.clone()));
        if !enabled || dir.as_os_str().is_empty() {
            if !self.state.watch.is_empty() {
                self.state.watch = WatchFingerprints::new();
            }
            return;
        }
        if self.state.watch_busy.swap(true, Ordering::AcqRel) {
            return;
        }

        let busy = Arc::clone(&self.state.watch_busy);
        let queue = Arc::clone(self.manager.queue());
        let accepted = self.state.shared.io.submit(async move {
            let scan_dir = dir.clone();
            let scanned = blocking(move || scan_watch_dir(&scan_dir))
                .await
                .and_then(|result| result.map_err(anyhow::Error::from));
            let pushed = queue.push(Box::new(move |service: &mut SessionService| {
                service.ingest_watch_scan(&dir, scanned);
                Ok(())
            }));
            if let Err(err) = pushed {
                busy.store(false, Ordering::Release);
                debug!(error = %err, "watch scan result dropped");
            }
        });
        if !accepted {
            self.state.watch_busy.store(false, Ordering::Release);
        }
    }

    fn ingest_watch_scan(&mut self, dir: &Path, scanned: anyhow::Result<Vec<WatchEntry>>) {
        self.state.watch_busy.store(false, Ordering::Release);
        let entries = match scanned {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    dir = %dir.display(),
                    error = %format!("{err:#}"),
                    "watch directory scan failed"
                );
                return;
            }
        };
        let stable = self.state.watch.observe(&entries, Instant::now());
        for path in stable {
            self.state.watch.forget(&path);
            self.ingest_watch_file(path);
        }
    }

    /// Read, validate and enqueue one stable watch file, then rename it by outcome.
    fn ingest_watch_file(&self, path: PathBuf) {
        let queue = Arc::clone(self.manager.queue());
        let events = self.state.shared.events.clone();
        self.state.shared.io.submit(async move {
            let read_path = path.clone();
            let parsed = blocking(move || read_watch_file(&read_path))
                .await
                .and_then(|result| result.map_err(anyhow::Error::from))
                .and_then(|bytes| {
                    let meta = parse_metainfo(&bytes)?;
                    Ok((bytes, meta))
                });

            let outcome = match parsed {
                Ok((bytes, meta)) => {
                    let add = PreparedAdd {
                        hash: meta.hash,
                        name: Some(meta.name),
                        source: TorrentSource::Metainfo { bytes },
                        download_path: PathBuf::new(),
                        paused: false,
                    };
                    match queue.push(Box::new(move |service: &mut SessionService| {
                        service.add_validated(add)
                    })) {
                        Ok(()) => WatchOutcome::Added,
                        Err(err) => {
                            debug!(
                                path = %path.display(),
                                error = %err,
                                "watch file left for a later scan"
                            );
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %format!("{err:#}"),
                        "watch file rejected"
                    );
                    WatchOutcome::Invalid
                }
            };

            let mark_path = path.clone();
            match blocking(move || mark_watch_file(&mark_path, outcome)).await {
                Ok(Ok(renamed)) => debug!(path = %renamed.display(), "watch file marked"),
                Ok(Err(err)) => {
                    warn!(path = %path.display(), error = %err, "watch file rename failed");
                }
                Err(err) => warn!(error = %err, "watch file rename aborted"),
            }
            let accepted = outcome == WatchOutcome::Added;
            info!(path = %path.display(), accepted, "watch file processed");
            events.publish(Event::WatchFileProcessed {
                path: path.display().to_string(),
                accepted,
            });
        });
    }

    /// Relocate seeding torrents still parked in the incomplete directory.
    ///
    /// Picks up torrents whose earlier move failed and torrents restored already complete.
    pub(crate) fn relocate_stranded(&mut self) {
        let incomplete = self.state.shared.with_settings(|settings| {
            (settings.incomplete_dir_enabled && !settings.incomplete_dir.as_os_str().is_empty())
                .then(|| settings.incomplete_dir.clone())
        });
        let Some(incomplete) = incomplete else {
            return;
        };
        if self.state.shared.shutdown_requested() {
            return;
        }
        let session = self.manager.session();
        let stranded: Vec<InfoHash> = session
            .handles()
            .into_iter()
            .filter(|hash| !self.state.pending_moves.contains_key(hash))
            .filter(|hash| {
                session.status(hash).is_some_and(|status| {
                    status.state == TorrentState::Seeding && status.save_path == incomplete
                })
            })
            .collect();
        for hash in stranded {
            if let Err(err) = self.relocate_completed(hash) {
                debug!(hash = %hash, error = %format!("{err:#}"), "completion move skipped");
            }
        }
    }

    /// Move a fully seeding torrent out of the incomplete directory.
    pub(crate) fn relocate_completed(&mut self, hash: InfoHash) -> anyhow::Result<()> {
        let settings = self.state.shared.settings();
        if !settings.incomplete_dir_enabled || settings.incomplete_dir.as_os_str().is_empty() {
            return Ok(());
        }
        if self.state.pending_moves.contains_key(&hash) {
            return Ok(());
        }
        let status = self
            .manager
            .session()
            .status(&hash)
            .with_context(|| format!("finished torrent {hash} is no longer in the session"))?;
        if status.state != TorrentState::Seeding || status.save_path != settings.incomplete_dir {
            return Ok(());
        }
        let base = self
            .state
            .final_paths
            .get(&hash)
            .cloned()
            .unwrap_or_else(|| settings.download_path.clone());
        if base == status.save_path {
            return Ok(());
        }

        let current = status.save_path.join(&status.name);
        let name = status.name;
        let queue = Arc::clone(self.manager.queue());
        self.state.pending_moves.insert(hash, base.clone());
        let accepted = self.state.shared.io.submit(async move {
            let resolved = blocking(move || {
                completion_destination(&base, &current, &name, &hash.to_hex())
            })
            .await
            .and_then(|result| result.map_err(anyhow::Error::from));
            let pushed = queue.push(Box::new(move |service: &mut SessionService| {
                service.finish_relocation(hash, resolved)
            }));
            if let Err(err) = pushed {
                debug!(hash = %hash, error = %err, "completion move dropped");
            }
        });
        if !accepted {
            self.state.pending_moves.remove(&hash);
        }
        Ok(())
    }

    fn finish_relocation(
        &mut self,
        hash: InfoHash,
        resolved: anyhow::Result<PathBuf>,
    ) -> anyhow::Result<()> {
        self.state.pending_moves.remove(&hash);
        let destination = match resolved {
            Ok(destination) => destination,
            Err(err) => {
                let message = format!("completion move failed: {err:#}");
                self.state.record_error(
                    &mut self.manager,
                    hash,
                    message,
                    ErrorSource::Storage,
                );
                return Ok(());
            }
        };
        if self.manager.session().status(&hash).is_none() {
            return Ok(());
        }
        info!(hash = %hash, destination = %destination.display(), "relocating completed torrent");
        self.begin_move(hash, &destination, true)
    }
}

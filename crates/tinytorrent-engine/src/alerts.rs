//! Routing of session alerts into engine state, persistence and events.

use std::time::Instant;

use anyhow::Context;
use tinytorrent_core::{Alert, InfoHash};
use tinytorrent_events::{ErrorSource, Event};
use tinytorrent_fsops::{metadata_path, write_atomic};
use tracing::{debug, info, warn};

use crate::manager::{AlertHandler, TorrentManager};
use crate::service::{ServiceState, blocking};

impl AlertHandler for ServiceState {
    #[allow(clippy::too_many_lines)]
    fn on_alert(&mut self, manager: &mut TorrentManager, alert: Alert) -> anyhow::Result<()> {
        self.shared.metrics.inc_alert(alert.kind());
        match alert {
            Alert::TorrentAdded { hash } => {
                let id = manager.assign_rpc_id(hash);
                manager.mark_dirty(id);
                let name = manager
                    .session()
                    .status(&hash)
                    .map(|status| status.name)
                    .unwrap_or_default();
                info!(torrent_id = id, hash = %hash, name = %name, "torrent added");
                self.publish(Event::TorrentAdded {
                    hash: hash.to_hex(),
                    name,
                });
            }
            Alert::AddFailed { hash, message } => {
                warn!(
                    hash = ?hash.map(|hash| hash.to_hex()),
                    message = %message,
                    "torrent add failed"
                );
                if let Some(hash) = hash {
                    if manager.session().status(&hash).is_none() {
                        self.shared.persistence.remove_torrent(&hash);
                        self.labels.remove(&hash);
                        self.final_paths.remove(&hash);
                    }
                    self.publish(Event::TorrentError {
                        hash: hash.to_hex(),
                        message,
                        source: ErrorSource::Add,
                    });
                }
            }
            Alert::TorrentRemoved { hash } => {
                info!(hash = %hash, "torrent removed");
                self.publish(Event::TorrentRemoved { hash: hash.to_hex() });
            }
            Alert::TorrentFinished { hash } => {
                manager.mark_hash_dirty(&hash);
                info!(hash = %hash, "torrent finished");
                self.publish(Event::TorrentFinished { hash: hash.to_hex() });
            }
            Alert::StateUpdate { hashes } => {
                for hash in &hashes {
                    manager.mark_hash_dirty(hash);
                }
            }
            Alert::StateChanged { hash, state } => {
                debug!(hash = %hash, state = state.as_str(), "torrent state changed");
                manager.mark_hash_dirty(&hash);
            }
            Alert::TorrentPaused { hash } | Alert::TorrentResumed { hash } => {
                manager.mark_hash_dirty(&hash);
            }
            Alert::MetadataReceived { hash } => {
                manager.mark_hash_dirty(&hash);
                self.persist_metadata(manager, hash)?;
            }
            Alert::SaveResumeData { hash, data } => {
                let bytes = u64::try_from(data.len()).unwrap_or(u64::MAX);
                self.shared.persistence.update_resume_data(&hash, data);
                self.resume.confirm(&hash, Instant::now());
                debug!(hash = %hash, bytes, "resume data saved");
                self.publish(Event::ResumeDataSaved {
                    hash: hash.to_hex(),
                    bytes,
                });
            }
            Alert::SaveResumeDataFailed { hash, message } => {
                self.resume.confirm(&hash, Instant::now());
                debug!(hash = %hash, message = %message, "resume data unavailable");
                self.publish(Event::ResumeDataFailed {
                    hash: hash.to_hex(),
                    message,
                });
            }
            Alert::FastresumeRejected { hash, message } => {
                self.record_error(
                    manager,
                    hash,
                    format!("resume data rejected: {message}"),
                    ErrorSource::Fastresume,
                );
            }
            Alert::ListenSucceeded {
                address,
                port,
                is_ipv6,
            } => {
                let endpoint = if is_ipv6 {
                    format!("[{address}]:{port}")
                } else {
                    format!("{address}:{port}")
                };
                info!(endpoint = %endpoint, "listening for peers");
                self.shared.update_listen(|listen| {
                    listen.endpoint = Some(endpoint);
                    listen.error = None;
                });
                self.mark_recovered("session");
                self.publish(Event::ListenSucceeded {
                    interface: address,
                    port,
                    is_ipv6,
                });
            }
            Alert::ListenFailed {
                address,
                port,
                is_ipv6,
                message,
            } => {
                self.shared
                    .update_listen(|listen| listen.error = Some(message.clone()));
                self.mark_degraded("session", Some(&message));
                self.publish(Event::ListenFailed {
                    interface: address,
                    port,
                    is_ipv6,
                    message,
                });
            }
            Alert::FileError {
                hash,
                file,
                message,
            } => {
                self.record_error(manager, hash, format!("{file}: {message}"), ErrorSource::File);
            }
            Alert::TrackerError { hash, url, message } => {
                self.record_error(manager, hash, format!("{url}: {message}"), ErrorSource::Tracker);
            }
            Alert::PortmapError { message } => {
                warn!(message = %message, "port mapping failed");
                self.publish(Event::PortmapFailed { message });
            }
            Alert::StorageMoved { hash, path } => {
                self.pending_moves.remove(&hash);
                self.final_paths.remove(&hash);
                self.clear_error(manager, &hash);
                self.shared.persistence.update_save_path(&hash, &path);
                manager.mark_hash_dirty(&hash);
                info!(hash = %hash, path = %path.display(), "storage moved");
                self.publish(Event::StorageMoved {
                    hash: hash.to_hex(),
                    path: path.display().to_string(),
                });
            }
            Alert::StorageMoveFailed { hash, message } => {
                self.pending_moves.remove(&hash);
                self.record_error(
                    manager,
                    hash,
                    format!("storage move failed: {message}"),
                    ErrorSource::Storage,
                );
                self.publish(Event::StorageMoveFailed {
                    hash: hash.to_hex(),
                    message,
                });
            }
        }
        Ok(())
    }
}

impl ServiceState {
    /// Write freshly received metadata to its sidecar on the io worker.
    fn persist_metadata(&self, manager: &TorrentManager, hash: InfoHash) -> anyhow::Result<()> {
        let bytes = manager
            .session()
            .torrent_file(&hash)
            .with_context(|| format!("metadata for {hash} not available"))?;
        let state_dir = self
            .shared
            .with_settings(|settings| settings.state_path.clone());
        if state_dir.as_os_str().is_empty() {
            debug!(hash = %hash, "no state directory; metadata kept in memory");
            return Ok(());
        }

        let path = metadata_path(&state_dir, &hash.to_hex());
        let persistence = self.shared.persistence.clone();
        let events = self.shared.events.clone();
        let accepted = self.shared.io.submit(async move {
            let target = path.clone();
            let written = blocking(move || write_atomic(&target, &bytes))
                .await
                .and_then(|result| result.map_err(anyhow::Error::from));
            match written {
                Ok(()) => {
                    persistence.update_metadata_path(&hash, &path);
                    debug!(hash = %hash, path = %path.display(), "metadata persisted");
                    events.publish(Event::MetadataPersisted {
                        hash: hash.to_hex(),
                        path: path.display().to_string(),
                    });
                }
                Err(err) => {
                    warn!(hash = %hash, error = %err, "metadata write failed");
                    events.publish(Event::TorrentError {
                        hash: hash.to_hex(),
                        message: format!("metadata write failed: {err}"),
                        source: ErrorSource::Metadata,
                    });
                }
            }
        });
        if !accepted {
            anyhow::bail!("io worker stopped before metadata for {hash} was written");
        }
        Ok(())
    }
}

//! Watch-directory ingestion.
//!
//! # Design
//! - A scan lists `.torrent` files directly inside the watch directory, skipping oversized ones.
//! - A file is stable once its `(size, mtime)` fingerprint has been unchanged for
//!   [`WATCH_STABILITY_THRESHOLD`]; the first sighting only records the fingerprint.
//! - Processed files are renamed with `.added` or `.invalid` so later scans ignore them.
//! - Fingerprints of files that vanish between scans are dropped.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};

/// Largest file the watcher will read.
pub const MAX_WATCH_FILE_SIZE: u64 = 64 * 1024 * 1024;
/// Quiet period before a file is considered fully written.
pub const WATCH_STABILITY_THRESHOLD: Duration = Duration::from_secs(3);
/// Extension of files picked up by the watcher.
pub const WATCH_EXTENSION: &str = "torrent";

/// One candidate file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    /// File path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<SystemTime>,
}

/// Outcome recorded on a processed watch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The torrent was queued.
    Added,
    /// The file could not be read or parsed.
    Invalid,
}

impl WatchOutcome {
    /// Suffix appended to the processed file.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Added => ".added",
            Self::Invalid => ".invalid",
        }
    }
}

/// List candidate files in `dir`, creating the directory when missing.
///
/// # Errors
///
/// Returns an error when the directory cannot be created or listed.
pub fn scan_watch_dir(dir: &Path) -> FsOpsResult<Vec<WatchEntry>> {
    fs::create_dir_all(dir).map_err(|source| FsOpsError::io("create watch dir", dir, source))?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| FsOpsError::Walkdir {
            operation: "scan watch dir",
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(WATCH_EXTENSION) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "watch file vanished during scan");
                continue;
            }
        };
        if metadata.len() > MAX_WATCH_FILE_SIZE {
            info!(path = %path.display(), size = metadata.len(), "skipping oversized watch file");
            continue;
        }
        entries.push(WatchEntry {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[derive(Debug, Clone, Copy)]
struct Fingerprint {
    size: u64,
    modified: Option<SystemTime>,
    last_change: Instant,
}

/// `(size, mtime)` history of files seen in the watch directory.
#[derive(Debug, Default)]
pub struct WatchFingerprints {
    files: HashMap<PathBuf, Fingerprint>,
}

impl WatchFingerprints {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scan and return the files that are stable at `now`.
    ///
    /// Files missing from `entries` are forgotten.
    pub fn observe(&mut self, entries: &[WatchEntry], now: Instant) -> Vec<PathBuf> {
        let seen: HashSet<&Path> = entries.iter().map(|entry| entry.path.as_path()).collect();
        self.files.retain(|path, _| seen.contains(path.as_path()));

        let mut stable = Vec::new();
        for entry in entries {
            let Some(known) = self.files.get_mut(&entry.path) else {
                self.files.insert(
                    entry.path.clone(),
                    Fingerprint {
                        size: entry.size,
                        modified: entry.modified,
                        last_change: now,
                    },
                );
                continue;
            };
            if known.size != entry.size || known.modified != entry.modified {
                known.size = entry.size;
                known.modified = entry.modified;
                known.last_change = now;
                continue;
            }
            if now.saturating_duration_since(known.last_change) >= WATCH_STABILITY_THRESHOLD {
                stable.push(entry.path.clone());
            }
        }
        stable
    }

    /// Drop a file from the table.
    pub fn forget(&mut self, path: &Path) {
        self.files.remove(path);
    }

    /// Whether `path` is being tracked.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no file is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Read a stable watch file.
///
/// # Errors
///
/// Returns an error when the file cannot be read or is empty.
pub fn read_watch_file(path: &Path) -> FsOpsResult<Vec<u8>> {
    let bytes = fs::read(path).map_err(|source| FsOpsError::io("read watch file", path, source))?;
    if bytes.is_empty() {
        return Err(FsOpsError::InvalidInput {
            field: "watch_file",
            reason: "file is empty",
            value: Some(path.display().to_string()),
        });
    }
    Ok(bytes)
}

/// Rename a processed watch file with the outcome suffix, replacing any previous marker.
///
/// # Errors
///
/// Returns an error when the rename fails.
pub fn mark_watch_file(path: &Path, outcome: WatchOutcome) -> FsOpsResult<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(outcome.suffix());
    let target = PathBuf::from(target);
    if let Err(err) = fs::remove_file(&target)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %target.display(), error = %err, "failed to clear previous watch marker");
    }
    fs::rename(path, &target).map_err(|source| FsOpsError::io("mark watch file", path, source))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, size: u64) -> WatchEntry {
        WatchEntry {
            path: PathBuf::from(path),
            size,
            modified: None,
        }
    }

    #[test]
    fn file_is_stable_only_after_quiet_period() {
        let mut table = WatchFingerprints::new();
        let start = Instant::now();
        assert!(table.observe(&[entry("/w/a.torrent", 10)], start).is_empty());

        // Second chunk lands before the threshold and restarts the clock.
        let grown = start + Duration::from_secs(2);
        assert!(table.observe(&[entry("/w/a.torrent", 20)], grown).is_empty());
        assert!(
            table
                .observe(&[entry("/w/a.torrent", 20)], grown + Duration::from_secs(2))
                .is_empty()
        );
        let ready = table.observe(&[entry("/w/a.torrent", 20)], grown + WATCH_STABILITY_THRESHOLD);
        assert_eq!(ready, vec![PathBuf::from("/w/a.torrent")]);
    }

    #[test]
    fn vanished_files_are_forgotten() {
        let mut table = WatchFingerprints::new();
        let start = Instant::now();
        table.observe(&[entry("/w/a.torrent", 10)], start);
        assert!(table.contains(Path::new("/w/a.torrent")));

        let later = start + Duration::from_secs(5);
        assert!(table.observe(&[], later).is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn scan_filters_extension_and_marks_outcomes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("one.torrent"), b"d4:infod4:name1:aee")?;
        fs::write(dir.path().join("notes.txt"), b"ignored")?;
        fs::write(dir.path().join("old.torrent.added"), b"ignored")?;

        let entries = scan_watch_dir(dir.path())?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, dir.path().join("one.torrent"));

        let marked = mark_watch_file(&entries[0].path, WatchOutcome::Added)?;
        assert_eq!(marked, dir.path().join("one.torrent.added"));
        assert!(scan_watch_dir(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn scan_creates_missing_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let watch = dir.path().join("nested").join("watch");
        assert!(scan_watch_dir(&watch)?.is_empty());
        assert!(watch.is_dir());
        Ok(())
    }

    #[test]
    fn empty_watch_file_is_invalid() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("empty.torrent");
        fs::write(&path, b"")?;
        assert!(matches!(
            read_watch_file(&path),
            Err(FsOpsError::InvalidInput { .. })
        ));
        Ok(())
    }
}

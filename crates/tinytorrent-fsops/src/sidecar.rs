//! Sidecar files kept next to the state database.
//!
//! Writes go to a temporary sibling, are synced, then renamed over the target so a crash never
//! leaves a truncated file behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{FsOpsError, FsOpsResult};

/// Directory under the state path holding per-torrent metadata.
pub const METADATA_DIR: &str = "metadata";
/// File under the state path holding the DHT routing state.
pub const DHT_STATE_FILE: &str = "dht_state.dat";

/// Location of the metadata sidecar for `hash`.
#[must_use]
pub fn metadata_path(state_dir: &Path, hash: &str) -> PathBuf {
    state_dir.join(METADATA_DIR).join(format!("{hash}.torrent"))
}

/// Location of the DHT state file.
#[must_use]
pub fn dht_state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DHT_STATE_FILE)
}

/// Atomically replace `path` with `bytes`, creating parent directories.
///
/// # Errors
///
/// Returns an error when any step of the write fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> FsOpsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| FsOpsError::io("create sidecar dir", parent, source))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file =
        File::create(&tmp).map_err(|source| FsOpsError::io("create sidecar", &tmp, source))?;
    file.write_all(bytes)
        .map_err(|source| FsOpsError::io("write sidecar", &tmp, source))?;
    file.sync_all()
        .map_err(|source| FsOpsError::io("sync sidecar", &tmp, source))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|source| FsOpsError::io("rename sidecar", path, source))
}

/// Read a sidecar file, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read.
pub fn read_optional(path: &Path) -> FsOpsResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(FsOpsError::io("read sidecar", path, source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_content() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = metadata_path(dir.path(), "abcd");
        write_atomic(&path, b"first")?;
        write_atomic(&path, b"second")?;
        assert_eq!(read_optional(&path)?.as_deref(), Some(b"second".as_slice()));
        assert!(!path.with_extension("torrent.tmp").exists());
        Ok(())
    }

    #[test]
    fn missing_sidecar_reads_as_none() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        assert!(read_optional(&dht_state_path(dir.path()))?.is_none());
        Ok(())
    }
}

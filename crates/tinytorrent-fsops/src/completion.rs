//! Destination resolution for moving completed torrents out of the staging directory.

use std::path::{Path, PathBuf};

use crate::error::{FsOpsError, FsOpsResult};

/// Collision suffixes tried before giving up.
pub const MAX_COMPLETION_ATTEMPTS: u32 = 1024;

fn exists(path: &Path) -> FsOpsResult<bool> {
    path.try_exists()
        .map_err(|source| FsOpsError::io("inspect completion target", path, source))
}

/// Destination for a completed torrent.
///
/// When `base` is an existing directory the torrent's name (or hash when unnamed) is appended;
/// collisions are then resolved with [`resolve_unique_target`].
///
/// # Errors
///
/// Returns an error when `base` is empty, cannot be inspected, or every candidate is taken.
pub fn completion_destination(
    base: &Path,
    current: &Path,
    name: &str,
    hash: &str,
) -> FsOpsResult<PathBuf> {
    if base.as_os_str().is_empty() {
        return Err(FsOpsError::InvalidInput {
            field: "download_path",
            reason: "completion base is empty",
            value: None,
        });
    }
    let mut candidate = base.to_path_buf();
    if exists(base)? && base.is_dir() {
        candidate.push(if name.is_empty() { hash } else { name });
    }
    resolve_unique_target(&candidate, current)
}

/// Return `target`, or the first free `"stem (n)ext"` sibling for `n` in
/// `1..=MAX_COMPLETION_ATTEMPTS`.
///
/// A target equal to `current` is returned unchanged.
///
/// # Errors
///
/// Returns an error when a candidate cannot be inspected or every candidate is taken.
pub fn resolve_unique_target(target: &Path, current: &Path) -> FsOpsResult<PathBuf> {
    if target == current || !exists(target)? {
        return Ok(target.to_path_buf());
    }

    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    let stem = target
        .file_stem()
        .or_else(|| target.file_name())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    for index in 1..=MAX_COMPLETION_ATTEMPTS {
        let candidate = parent.join(format!("{stem} ({index}){extension}"));
        if !exists(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(FsOpsError::DestinationExhausted {
        path: target.to_path_buf(),
        attempts: MAX_COMPLETION_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn free_target_is_used_as_is() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = completion_destination(dir.path(), Path::new("/partial"), "Movie", "ab")?;
        assert_eq!(target, dir.path().join("Movie"));
        Ok(())
    }

    #[test]
    fn collisions_get_numbered_suffixes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("Movie"))?;
        let first = completion_destination(dir.path(), Path::new("/partial"), "Movie", "ab")?;
        assert_eq!(first, dir.path().join("Movie (1)"));

        fs::create_dir(&first)?;
        let second = completion_destination(dir.path(), Path::new("/partial"), "Movie", "ab")?;
        assert_eq!(second, dir.path().join("Movie (2)"));
        Ok(())
    }

    #[test]
    fn extension_is_kept_after_suffix() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("disc.iso"), b"x")?;
        let target = resolve_unique_target(&dir.path().join("disc.iso"), Path::new("/partial"))?;
        assert_eq!(target, dir.path().join("disc (1).iso"));
        Ok(())
    }

    #[test]
    fn unnamed_torrent_uses_hash() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = completion_destination(dir.path(), Path::new("/partial"), "", "abcd")?;
        assert_eq!(target, dir.path().join("abcd"));
        Ok(())
    }

    #[test]
    fn exhausted_candidates_fail_cleanly() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("Full"))?;
        for index in 1..=MAX_COMPLETION_ATTEMPTS {
            fs::create_dir(dir.path().join(format!("Full ({index})")))?;
        }
        assert!(matches!(
            completion_destination(dir.path(), Path::new("/partial"), "Full", "ab"),
            Err(FsOpsError::DestinationExhausted { attempts, .. })
                if attempts == MAX_COMPLETION_ATTEMPTS
        ));
        Ok(())
    }

    #[test]
    fn empty_base_is_rejected() {
        assert!(completion_destination(Path::new(""), Path::new("/p"), "x", "ab").is_err());
    }
}

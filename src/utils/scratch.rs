//! RAII guards for scratch space.
//!
//! Extracted packages, unpacked Debian payloads and transient entitlement documents are
//! removed when their guard is dropped, on success, on error and on unwinding.

use crate::error::{ErrorExt, Result};
use std::path::{Path, PathBuf};
use tempfile::{TempDir, TempPath};

const SCRATCH_PREFIX: &str = "kodegen-inject-";

/// Scratch directory removed on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under the system temp dir.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .fs_context("creating scratch directory", std::env::temp_dir())?;
        let path = dir.path().to_path_buf();
        log::debug!("Created scratch directory {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        // Best-effort cleanup; drop must never panic.
        if let Some(dir) = self.dir.take()
            && let Err(e) = dir.close()
        {
            log::warn!(
                "Failed to remove scratch directory {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Reserve an empty transient file, deleted when the returned path is dropped.
pub fn transient_file(suffix: &str) -> Result<TempPath> {
    let file = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .suffix(suffix)
        .tempfile()
        .fs_context("creating transient file", std::env::temp_dir())?;
    Ok(file.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let scratch = ScratchDir::new().unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(path.join("payload"), b"x").unwrap();
        assert!(path.exists());

        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_transient_file_removed_on_drop() {
        let file = transient_file(".plist").unwrap();
        let path = file.to_path_buf();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".plist"));

        drop(file);
        assert!(!path.exists());
    }
}

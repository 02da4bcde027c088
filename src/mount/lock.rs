//! Advisory lock guarding a staging root against a second mount space.
//!
//! The lock file sits next to the staging root rather than inside it, since
//! `init_staging` wipes the root.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Another process (or mount space) already holds the staging root.
#[derive(Debug, thiserror::Error)]
#[error("Staging directory is locked by another mount space: {0}")]
pub struct StagingLocked(pub PathBuf);

/// Exclusive `flock` on `<staging_root>.lock`, released on drop.
#[derive(Debug)]
pub struct StagingLock {
    file: File,
    path: PathBuf,
}

impl StagingLock {
    pub fn acquire(staging_root: &Path) -> Result<Self> {
        let path = lock_path(staging_root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // The holder unlinks the file on release, so a file we opened may
        // already be detached from the path by the time we lock it.
        loop {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("Failed to open lock file {}", path.display()))?;

            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(StagingLocked(staging_root.to_path_buf()).into());
                }
                return Err(err).with_context(|| format!("Failed to lock {}", path.display()));
            }

            if is_linked_at(&file, &path)? {
                tracing::debug!(lock = %path.display(), "staging:lock acquired");
                return Ok(Self { file, path });
            }
            tracing::debug!(lock = %path.display(), "staging:lock file replaced, retrying");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingLock {
    fn drop(&mut self) {
        // Unlink while still locked; `acquire` retries on a detached file.
        let _ = std::fs::remove_file(&self.path);
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::debug!(lock = %self.path.display(), "staging:lock released");
    }
}

/// Whether `path` still names the inode `file` has open.
fn is_linked_at(file: &File, path: &Path) -> Result<bool> {
    let open = file.metadata().context("Failed to stat open lock file")?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(open.dev() == current.dev() && open.ino() == current.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    }
}

fn lock_path(staging_root: &Path) -> PathBuf {
    let mut name = staging_root.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

//! Private staging tree that host sources are copied into before mounting.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fs_extra::dir as fs_dir;
use fs_extra::file as fs_file;
use tracing::{debug, info, warn};

use super::lock::StagingLock;
use super::path_set::PathSet;

/// Parent directory for staging roots unless configured otherwise.
pub const TMP_ROOT: &str = "/tmp";

/// Copying a source into the staging root failed.
///
/// Sources copied before the failure stay staged.
#[derive(Debug, thiserror::Error)]
#[error("Failed to stage '{}' into '{}': {reason}", .source_path.display(), .staging.display())]
pub struct StagingCopyFailed {
    pub source_path: PathBuf,
    pub staging: PathBuf,
    pub reason: String,
}

pub struct MountSpace {
    name: String,
    staging_root: PathBuf,
    mounted: PathSet,
    lock: Option<StagingLock>,
}

impl MountSpace {
    /// Create a mount space rooted under [`TMP_ROOT`].
    pub fn new(name: Option<&str>, unique: bool) -> Self {
        Self::with_parent(Path::new(TMP_ROOT), name, unique)
    }

    /// Create a mount space rooted under `parent`.
    ///
    /// With `unique`, the name gets a `_<tag>` suffix so concurrent runs of
    /// the same image do not share a staging root. Nothing touches the disk
    /// until [`MountSpace::init_staging`].
    pub fn with_parent(parent: &Path, name: Option<&str>, unique: bool) -> Self {
        let base = name.filter(|n| !n.is_empty()).unwrap_or("tmp");
        let name = if unique {
            format!("{}_{}", base, unique_tag())
        } else {
            base.to_string()
        };
        let staging_root = parent.join(&name);
        info!(staging_root = %staging_root.display(), "staging:root set");

        Self {
            name,
            staging_root,
            mounted: PathSet::new(),
            lock: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Sources currently exposed through the staging root.
    pub fn mounted(&self) -> &PathSet {
        &self.mounted
    }

    /// Create an empty staging root, clearing whatever a stale run left there.
    pub fn init_staging(&self) -> Result<()> {
        if self.staging_root.exists() {
            info!(
                staging_root = %self.staging_root.display(),
                "staging:conflicting directory found, cleaning up"
            );
            std::fs::remove_dir_all(&self.staging_root).with_context(|| {
                format!(
                    "Failed to clear stale staging directory {}",
                    self.staging_root.display()
                )
            })?;
        }
        std::fs::create_dir_all(&self.staging_root).with_context(|| {
            format!(
                "Failed to create staging directory {}",
                self.staging_root.display()
            )
        })?;
        info!(staging_root = %self.staging_root.display(), "staging:init");
        Ok(())
    }

    /// Copy `source` into the staging root and record it.
    ///
    /// Returns the staged copy's path. When `source` covers a path staged
    /// earlier, that earlier copy stays on disk but is no longer listed in
    /// [`MountSpace::mounted`].
    pub fn add(&mut self, source: impl AsRef<Path>) -> Result<PathBuf> {
        let source = source.as_ref();
        let resolved = std::fs::canonicalize(source).map_err(|e| StagingCopyFailed {
            source_path: source.to_path_buf(),
            staging: self.staging_root.clone(),
            reason: e.to_string(),
        })?;
        // Named after the path as given, so a symlinked source keeps the
        // link's name rather than its target's.
        let given = std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf());
        let file_name = given
            .file_name()
            .or_else(|| resolved.file_name())
            .ok_or_else(|| StagingCopyFailed {
                source_path: source.to_path_buf(),
                staging: self.staging_root.clone(),
                reason: "source has no final path component".to_string(),
            })?;
        let staging = self.staging_root.join(file_name);

        copy_source(&resolved, &staging)?;

        self.mounted.add(&resolved, &staging);
        info!(
            source = %source.display(),
            staging = %staging.display(),
            "staging:add"
        );
        Ok(staging)
    }

    /// Delete the staging root. Safe to call repeatedly.
    pub fn remove_staging(&self) -> Result<()> {
        if self.staging_root.exists() {
            info!(staging_root = %self.staging_root.display(), "staging:remove");
            std::fs::remove_dir_all(&self.staging_root).with_context(|| {
                format!(
                    "Failed to remove staging directory {}",
                    self.staging_root.display()
                )
            })?;
        } else {
            debug!(staging_root = %self.staging_root.display(), "staging:not found, skip");
        }
        Ok(())
    }

    /// Take the advisory lock on this staging root. Held until
    /// [`MountSpace::unlock`] or drop.
    pub fn lock(&mut self) -> Result<()> {
        if self.lock.is_none() {
            self.lock = Some(StagingLock::acquire(&self.staging_root)?);
        }
        Ok(())
    }

    pub fn unlock(&mut self) {
        self.lock = None;
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

impl Drop for MountSpace {
    fn drop(&mut self) {
        if let Err(e) = self.remove_staging() {
            warn!(error = %e, "staging:cleanup on drop failed");
        }
    }
}

fn copy_source(source: &Path, staging: &Path) -> Result<()> {
    let failed = |reason: String| StagingCopyFailed {
        source_path: source.to_path_buf(),
        staging: staging.to_path_buf(),
        reason,
    };

    if staging.exists() {
        return Err(failed("staging destination already exists".to_string()).into());
    }

    if source.is_dir() {
        std::fs::create_dir_all(staging).map_err(|e| failed(e.to_string()))?;
        let mut options = fs_dir::CopyOptions::new();
        options.content_only = true;
        fs_dir::copy(source, staging, &options).map_err(|e| failed(e.to_string()))?;
    } else {
        let options = fs_file::CopyOptions::new();
        fs_file::copy(source, staging, &options).map_err(|e| failed(e.to_string()))?;
    }
    Ok(())
}

/// Eight hex characters derived from the current time and process id.
fn unique_tag() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = DefaultHasher::new();
    nanos.hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    format!("{:016x}", hasher.finish())[..8].to_string()
}

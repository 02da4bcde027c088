//! Deduplicated (source, staging) pairs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A set of staged sources keyed by host path.
///
/// Any source that lives underneath another source in the set is dropped:
/// mounting the ancestor already exposes it.
#[derive(Debug, Default, Clone)]
pub struct PathSet {
    entries: BTreeMap<PathBuf, PathBuf>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or overwrite) the staging destination for `source`, then
    /// drop every entry covered by an ancestor.
    pub fn add(&mut self, source: impl Into<PathBuf>, staging: impl Into<PathBuf>) {
        self.entries.insert(source.into(), staging.into());
        self.normalize();
    }

    pub fn get(&self, source: &Path) -> Option<&Path> {
        self.entries.get(source).map(PathBuf::as_path)
    }

    pub fn contains_source(&self, source: &Path) -> bool {
        self.entries.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(source, staging)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries
            .iter()
            .map(|(source, staging)| (source.as_path(), staging.as_path()))
    }

    fn normalize(&mut self) {
        // `Path` orders component by component, so every descendant of a
        // path sorts in one contiguous run right after it. Plain string
        // order would put `/a/b-x` between `/a/b` and `/a/b/c`.
        let mut sources: Vec<(PathBuf, PathBuf)> = self
            .entries
            .keys()
            .map(|source| (resolve(source), source.clone()))
            .collect();
        sources.sort();

        let mut kept: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(sources.len());
        for (resolved, source) in sources {
            let covered = kept
                .last()
                .is_some_and(|(ancestor, _)| resolved.starts_with(ancestor));
            if !covered {
                kept.push((resolved, source));
            }
        }

        let mut entries = std::mem::take(&mut self.entries);
        self.entries = kept
            .into_iter()
            .filter_map(|(_, source)| entries.remove_entry(&source))
            .collect();
    }
}

/// Symlink-free absolute form of `path`, falling back to the path itself
/// when it does not exist on this host.
fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

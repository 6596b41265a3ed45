//! Per-handle memoization of derived queries.
//!
//! Every lookup is made against the repository's current [`Generation`], a
//! fingerprint of the few metadata files a backend rewrites whenever history
//! or references move. When the fingerprint differs from the last one seen,
//! the whole cache is dropped; there is no partial invalidation.

use std::{
    any::Any,
    fs,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::SystemTime,
};

use quick_cache::sync::Cache;

use crate::error::VcsError;
use crate::types::CacheStats;

/// Files at most this large are fingerprinted by content, larger ones by
/// length and modification time.
const CONTENT_STAMP_LIMIT: u64 = 4096;

/// State of a single metadata file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stamp {
    Missing,
    Content(Vec<u8>),
    Meta { len: u64, modified: Option<SystemTime> },
}

impl Stamp {
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Stamp::Missing),
            Err(e) => return Err(e),
        };
        if meta.len() <= CONTENT_STAMP_LIMIT {
            match fs::read(path) {
                Ok(bytes) => Ok(Stamp::Content(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Stamp::Missing),
                Err(e) => Err(e),
            }
        } else {
            Ok(Stamp::Meta {
                len: meta.len(),
                modified: meta.modified().ok(),
            })
        }
    }
}

/// Fingerprint of a repository's mutable metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Generation(Vec<(PathBuf, Stamp)>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single file (missing files are recorded as such)
    pub fn file(mut self, path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let stamp = Stamp::of(path)?;
        self.0.push((path.to_path_buf(), stamp));
        Ok(self)
    }

    /// Add every file below `root`, in a stable order
    pub fn tree(mut self, root: impl AsRef<Path>) -> io::Result<Self> {
        let mut files = Vec::new();
        collect_files(root.as_ref(), &mut files)?;
        files.sort();
        for path in files {
            let stamp = Stamp::of(&path)?;
            self.0.push((path, stamp));
        }
        Ok(self)
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    repo: PathBuf,
    op: &'static str,
    args: String,
}

#[derive(Clone)]
struct Slot {
    epoch: u64,
    value: Arc<dyn Any + Send + Sync>,
}

#[derive(Debug, Default)]
struct Observed {
    generation: Option<Generation>,
    epoch: u64,
}

/// Bounded LRU cache scoped to one repository handle
pub struct RepoCache {
    repo: PathBuf,
    entries: Cache<CacheKey, Slot>,
    observed: Mutex<Observed>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl std::fmt::Debug for RepoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoCache")
            .field("repo", &self.repo)
            .field("len", &self.entries.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RepoCache {
    pub fn new(repo: &Path, capacity: usize) -> Self {
        Self {
            repo: repo.to_path_buf(),
            entries: Cache::new(capacity.max(1)),
            observed: Mutex::new(Observed::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Record the current generation and return its epoch. A generation
    /// different from the previous one clears every entry.
    fn observe(&self, generation: Generation) -> u64 {
        let mut observed = self
            .observed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &observed.generation {
            Some(previous) if *previous == generation => {}
            Some(_) => {
                observed.epoch += 1;
                observed.generation = Some(generation);
                self.entries.clear();
                self.invalidations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(repo = %self.repo.display(), epoch = observed.epoch, "Repository generation changed, cache cleared");
            }
            None => observed.generation = Some(generation),
        }
        observed.epoch
    }

    /// Serve `op(args)` from the cache, or compute and store it.
    ///
    /// Entries stored under an older epoch are never returned, so a value
    /// computed concurrently with a generation bump cannot leak into the
    /// new generation.
    pub fn get_or_compute<T, F>(
        &self,
        generation: Generation,
        op: &'static str,
        args: &str,
        compute: F,
    ) -> Result<T, VcsError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, VcsError>,
    {
        let epoch = self.observe(generation);
        let key = CacheKey {
            repo: self.repo.clone(),
            op,
            args: args.to_string(),
        };

        if let Some(slot) = self.entries.get(&key) {
            if slot.epoch == epoch {
                if let Some(value) = slot.value.downcast_ref::<T>() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(op, args, "Cache hit");
                    return Ok(value.clone());
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(op, args, "Cache miss");
        let value = compute()?;
        self.entries.insert(
            key,
            Slot {
                epoch,
                value: Arc::new(value.clone()),
            },
        );
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn refs_generation(root: &Path) -> Generation {
        Generation::new()
            .file(root.join("HEAD"))
            .unwrap()
            .tree(root.join("refs"))
            .unwrap()
    }

    #[test]
    fn test_generation_tracks_ref_files() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("refs/heads")).unwrap();
        fs::write(root.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(root.path().join("refs/heads/main"), "a\n").unwrap();

        let before = refs_generation(root.path());
        assert_eq!(before, refs_generation(root.path()));

        fs::write(root.path().join("refs/heads/main"), "b\n").unwrap();
        assert_ne!(before, refs_generation(root.path()));
    }

    #[test]
    fn test_generation_sees_new_and_missing_files() {
        let root = TempDir::new().unwrap();
        let empty = Generation::new().file(root.path().join("current")).unwrap();
        fs::write(root.path().join("current"), "0\n").unwrap();
        let written = Generation::new().file(root.path().join("current")).unwrap();
        assert_ne!(empty, written);
    }

    #[test]
    fn test_hit_and_invalidation() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("refs/heads")).unwrap();
        fs::write(root.path().join("refs/heads/main"), "a\n").unwrap();
        let cache = RepoCache::new(root.path(), 16);
        let calls = AtomicU64::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, VcsError>(vec!["main".to_string()])
        };

        let first = cache
            .get_or_compute(refs_generation(root.path()), "branches", "", compute)
            .unwrap();
        let second = cache
            .get_or_compute(refs_generation(root.path()), "branches", "", compute)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                invalidations: 0
            }
        );

        fs::write(root.path().join("refs/heads/topic"), "b\n").unwrap();
        cache
            .get_or_compute(refs_generation(root.path()), "branches", "", compute)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_distinct_args_are_distinct_entries() {
        let root = TempDir::new().unwrap();
        let cache = RepoCache::new(root.path(), 16);
        let a: u32 = cache
            .get_or_compute(Generation::new(), "cat", "1:a", || Ok(1))
            .unwrap();
        let b: u32 = cache
            .get_or_compute(Generation::new(), "cat", "1:b", || Ok(2))
            .unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let root = TempDir::new().unwrap();
        let cache = RepoCache::new(root.path(), 4);
        let failed: Result<u32, _> = cache.get_or_compute(Generation::new(), "op", "", || {
            Err(VcsError::UnknownRevision("x".into()))
        });
        assert!(failed.is_err());
        let ok: u32 = cache
            .get_or_compute(Generation::new(), "op", "", || Ok(5))
            .unwrap();
        assert_eq!(ok, 5);
    }
}

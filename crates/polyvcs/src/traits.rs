use crate::backend::RepoContext;
use crate::cache::Generation;
use crate::error::VcsError;
use crate::history::Log;
use crate::tree;
use crate::types::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Core repository identity and lifecycle
///
/// Handles are immutable after construction and safe to share between
/// threads; every query either re-derives its answer from the native tool
/// or serves it from the handle's cache.
pub trait VcsRepository: Send + Sync {
    /// Initialize a new repository at `path`
    fn create(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError>
    where
        Self: Sized;

    /// Open an existing repository
    fn open(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError>
    where
        Self: Sized;

    /// Copy `source` into a new repository at `dest`
    fn clone_from(
        source: &Path,
        dest: &Path,
        working_copy: bool,
        ctx: RepoContext,
    ) -> Result<Self, VcsError>
    where
        Self: Sized;

    /// Root path of the repository or working copy
    fn path(&self) -> &Path;

    fn kind(&self) -> BackendKind;

    fn is_working_copy(&self) -> bool;

    /// A scratch directory inside the repository metadata, created on demand
    fn private_path(&self) -> Result<PathBuf, VcsError>;

    /// Fingerprint of the metadata that changes whenever history, references
    /// or the checked-out revision move
    fn generation(&self) -> Result<Generation, VcsError>;

    fn cache_stats(&self) -> CacheStats;
}

/// Reference enumeration and revision resolution
pub trait VcsRefs: VcsRepository {
    fn branches(&self) -> Result<BTreeMap<String, Revision>, VcsError>;

    fn tags(&self) -> Result<BTreeMap<String, Revision>, VcsError>;

    /// Union of branch tips (see the backend for its exact notion of a head)
    fn heads(&self) -> Result<BTreeMap<String, Revision>, VcsError>;

    /// Resolve a spec to its durable form
    fn canonical_rev(&self, rev: &RevSpec) -> Result<Revision, VcsError>;

    /// Whether the repository has no commits at all
    fn is_empty(&self) -> Result<bool, VcsError>;

    /// Current revision a head, branch or tag name points to
    fn tip(&self, name: &str) -> Result<Revision, VcsError> {
        for refs in [self.heads()?, self.branches()?, self.tags()?] {
            if let Some(rev) = refs.get(name) {
                return Ok(rev.clone());
            }
        }
        Err(VcsError::unknown_revision(name))
    }

    /// Whether `rev` resolves in this repository
    fn contains(&self, rev: &RevSpec) -> Result<bool, VcsError> {
        match self.canonical_rev(rev) {
            Ok(_) => Ok(true),
            Err(VcsError::UnknownRevision(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// History traversal and per-revision change summaries
pub trait VcsHistory: VcsRefs {
    /// Lazily ordered history; see [`LogOptions`]
    fn log(&self, options: &LogOptions) -> Result<Log<'_>, VcsError>;

    /// A single commit's metadata
    fn log_entry(&self, rev: &RevSpec) -> Result<LogEntry, VcsError>;

    /// Nearest common ancestor, or `None` when the histories are unrelated
    fn ancestor(&self, a: &RevSpec, b: &RevSpec) -> Result<Option<Revision>, VcsError>;

    /// Changes introduced by `rev` relative to its primary parent
    fn changes(&self, rev: &RevSpec) -> Result<BTreeMap<String, FileChange>, VcsError>;

    /// Unified diff from `from` to `to`, applicable with `patch -p1`,
    /// optionally limited to `path`
    fn diff(&self, _from: &RevSpec, _to: &RevSpec, _path: Option<&str>) -> Result<Vec<u8>, VcsError> {
        Err(VcsError::unsupported(self.kind(), "diff"))
    }

    /// Unified diff of `rev` against its primary parent
    fn patch(&self, _rev: &RevSpec) -> Result<Vec<u8>, VcsError> {
        Err(VcsError::unsupported(self.kind(), "patch"))
    }
}

/// Tree and file inspection
pub trait VcsTree: VcsRepository {
    /// List `path` at `rev`
    ///
    /// Without [`LsOptions::directory`] the path must be a directory and its
    /// children are returned. A trailing slash on `path` requires a directory
    /// even with [`LsOptions::directory`].
    fn ls(&self, rev: &RevSpec, path: &str, options: &LsOptions)
        -> Result<Vec<TreeEntry>, VcsError>;

    /// Raw file content
    fn cat(&self, rev: &RevSpec, path: &str) -> Result<Vec<u8>, VcsError>;

    /// Target of a symbolic link
    fn readlink(&self, rev: &RevSpec, path: &str) -> Result<String, VcsError>;

    /// Materialize the tree at `rev` into `dest`, which must not exist
    fn export(&self, rev: &RevSpec, dest: &Path) -> Result<(), VcsError>;

    /// Per-line origin of a file
    fn blame(&self, _rev: &RevSpec, _path: &str) -> Result<Vec<BlameLine>, VcsError> {
        Err(VcsError::unsupported(self.kind(), "blame"))
    }

    /// Versioned property names of `path`, or of the revision itself when
    /// `path` is `None`
    fn proplist(&self, _rev: &RevSpec, _path: Option<&str>) -> Result<Vec<String>, VcsError> {
        Err(VcsError::unsupported(self.kind(), "proplist"))
    }

    /// Value of one property; `None` when it is not set
    fn propget(
        &self,
        _prop: &str,
        _rev: &RevSpec,
        _path: Option<&str>,
    ) -> Result<Option<String>, VcsError> {
        Err(VcsError::unsupported(self.kind(), "propget"))
    }

    /// Compare the subtrees at `path` of two revisions.
    ///
    /// A path whose kind differs is reported as a removal of the old kind
    /// and an addition of the new one.
    fn diff_summary(
        &self,
        from: &RevSpec,
        to: &RevSpec,
        path: &str,
    ) -> Result<Vec<TreeChange>, VcsError> {
        let listing = LsOptions::recursive_with_dirs();
        let old = self.ls(from, path, &listing)?;
        let new = self.ls(to, path, &listing)?;
        tree::compare(&old, &new, |a, b| match a.kind {
            EntryKind::Symlink => Ok(self.readlink(from, &a.path)? == self.readlink(to, &b.path)?),
            _ => Ok(self.cat(from, &a.path)? == self.cat(to, &b.path)?),
        })
    }
}

/// Combined trait representing a full repository backend
///
/// This is the type callers interact with; the dispatcher hands out
/// `Box<dyn VcsBackend>` regardless of the native system.
pub trait VcsBackend: VcsRepository + VcsRefs + VcsHistory + VcsTree {
    /// Get a human-readable description of this backend
    fn description(&self) -> String {
        let flavour = if self.is_working_copy() {
            "working copy"
        } else {
            "repository"
        };
        format!("{} {} at {}", self.kind(), flavour, self.path().display())
    }
}

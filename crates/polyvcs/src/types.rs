use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VcsError;

/// Which native version control system backs a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Git,
    Hg,
    Svn,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Git, BackendKind::Hg, BackendKind::Svn];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Git => "git",
            BackendKind::Hg => "hg",
            BackendKind::Svn => "svn",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = VcsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "git" => Ok(BackendKind::Git),
            "hg" | "mercurial" => Ok(BackendKind::Hg),
            "svn" | "subversion" => Ok(BackendKind::Svn),
            other => Err(VcsError::UnrecognizedRepositoryType(other.to_string())),
        }
    }
}

/// A durable, backend-native revision identifier.
///
/// Once a backend hands out a `Revision` it keeps denoting the same content
/// for the lifetime of the repository. The `Ord` impl is a total order over
/// identifiers used for deterministic tie-breaking; it says nothing about
/// ancestry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Revision {
    /// Content hash (git commit id, hg changeset node)
    Hash(String),
    /// Global revision number (svn)
    Number(u64),
    /// A path within a revision-numbered tree (svn branches)
    PathAt { path: String, number: u64 },
}

impl Revision {
    pub fn hash(id: impl Into<String>) -> Self {
        Revision::Hash(id.into())
    }

    pub fn path_at(path: impl Into<String>, number: u64) -> Self {
        Revision::PathAt {
            path: path.into(),
            number,
        }
    }

    /// Revision number for number-based identifiers
    pub fn number(&self) -> Option<u64> {
        match self {
            Revision::Hash(_) => None,
            Revision::Number(n) | Revision::PathAt { number: n, .. } => Some(*n),
        }
    }

    pub fn as_hash(&self) -> Option<&str> {
        match self {
            Revision::Hash(h) => Some(h),
            _ => None,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Hash(h) => f.write_str(h),
            Revision::Number(n) => write!(f, "{n}"),
            Revision::PathAt { path, number } => write!(f, "{path}:{number}"),
        }
    }
}

/// What a caller asks for wherever a revision argument is accepted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevSpec {
    /// The checked-out state of a working copy
    Current,
    /// Branch, tag or native identifier string
    Named(String),
    /// An already-resolved revision
    Exact(Revision),
}

impl RevSpec {
    pub fn named(name: impl Into<String>) -> Self {
        RevSpec::Named(name.into())
    }

    /// Whether this spec denotes a durable revision rather than a mutable
    /// reference or the working copy.
    pub fn is_absolute(&self) -> bool {
        match self {
            RevSpec::Current => false,
            RevSpec::Exact(_) => true,
            RevSpec::Named(s) => looks_absolute(s),
        }
    }
}

fn looks_absolute(s: &str) -> bool {
    let is_full_hash = s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit());
    let number_part = s.rsplit_once(':').map_or(s, |(_, n)| n);
    let is_number = !number_part.is_empty() && number_part.bytes().all(|b| b.is_ascii_digit());
    is_full_hash || is_number
}

impl fmt::Display for RevSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevSpec::Current => f.write_str("<current>"),
            RevSpec::Named(s) => f.write_str(s),
            RevSpec::Exact(r) => write!(f, "{r}"),
        }
    }
}

impl From<&str> for RevSpec {
    fn from(s: &str) -> Self {
        RevSpec::Named(s.to_string())
    }
}

impl From<String> for RevSpec {
    fn from(s: String) -> Self {
        RevSpec::Named(s)
    }
}

impl From<Revision> for RevSpec {
    fn from(r: Revision) -> Self {
        RevSpec::Exact(r)
    }
}

impl From<&Revision> for RevSpec {
    fn from(r: &Revision) -> Self {
        RevSpec::Exact(r.clone())
    }
}

impl From<u64> for RevSpec {
    fn from(n: u64) -> Self {
        RevSpec::Exact(Revision::Number(n))
    }
}

/// One commit as reported by `log`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub revision: Revision,
    pub parents: Vec<Revision>,
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
    /// Branch and tag names pointing at this revision when the log was taken
    pub refs: Vec<String>,
}

impl LogEntry {
    /// First line of the message
    pub fn subject(&self) -> &str {
        self.message.split('\n').next().unwrap_or("")
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Kind of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Submodule,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
            EntryKind::Submodule => "submodule",
        };
        f.write_str(s)
    }
}

/// Where an entry's content was copied or renamed from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopySource {
    pub path: String,
    pub revision: Option<Revision>,
}

/// A normalized tree entry.
///
/// Optional attributes are filled only when requested through
/// [`LsReport`] or when the native listing provides them for free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Full repository path, without a leading slash
    pub path: String,
    /// Path relative to the listed directory; empty when listing an entry itself
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub executable: Option<bool>,
    pub target: Option<String>,
    /// Native content identifier (blob hash, file node)
    pub object_id: Option<String>,
    /// Last revision that touched this entry
    pub commit: Option<Revision>,
    pub copied_from: Option<CopySource>,
    /// Set when the same name is both a directory and a non-directory
    pub mismatched: bool,
}

impl TreeEntry {
    pub fn new(path: impl Into<String>, name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            kind,
            size: None,
            executable: None,
            target: None,
            object_id: None,
            commit: None,
            copied_from: None,
            mismatched: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Extra per-entry attributes `ls` should compute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LsReport {
    pub size: bool,
    pub target: bool,
    pub executable: bool,
    pub commit: bool,
    pub copies: bool,
}

impl LsReport {
    pub fn all() -> Self {
        Self {
            size: true,
            target: true,
            executable: true,
            commit: true,
            copies: true,
        }
    }
}

/// Options for `ls`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LsOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// With `recursive`, also report the directories themselves
    pub recursive_dirs: bool,
    /// Report the entry at `path` itself instead of its children
    pub directory: bool,
    pub report: LsReport,
}

impl LsOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    pub fn recursive_with_dirs() -> Self {
        Self {
            recursive: true,
            recursive_dirs: true,
            ..Self::default()
        }
    }

    pub fn entry() -> Self {
        Self {
            directory: true,
            ..Self::default()
        }
    }

    pub fn with_report(mut self, report: LsReport) -> Self {
        self.report = report;
        self
    }
}

/// Options for `log`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogOptions {
    /// Starting revisions; empty means the backend's default start set
    pub starts: Vec<RevSpec>,
    /// Revisions whose ancestry is excluded
    pub stops: Vec<RevSpec>,
    /// Only commits touching this path's subtree
    pub path: Option<String>,
    /// Truncate after ordering
    pub limit: Option<usize>,
    pub first_parent: bool,
    /// `Some(true)` only merges, `Some(false)` no merges
    pub merges: Option<bool>,
}

impl LogOptions {
    /// History of `rev` and its ancestors
    pub fn from_rev(rev: impl Into<RevSpec>) -> Self {
        Self {
            starts: vec![rev.into()],
            ..Self::default()
        }
    }

    /// Commits reachable from `to` but not from `from`
    pub fn range(from: impl Into<RevSpec>, to: impl Into<RevSpec>) -> Self {
        Self {
            starts: vec![to.into()],
            stops: vec![from.into()],
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn first_parent(mut self) -> Self {
        self.first_parent = true;
        self
    }
}

/// Type of change to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Removed,
}

/// A single path's change within one revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub status: ChangeStatus,
    pub kind: EntryKind,
    pub copied_from: Option<CopySource>,
}

impl FileChange {
    pub fn new(status: ChangeStatus, kind: EntryKind) -> Self {
        Self {
            status,
            kind,
            copied_from: None,
        }
    }
}

/// A path's change between two arbitrary trees.
///
/// A path whose kind differs between the trees yields two records: a
/// removal of the old kind and an addition of the new one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeChange {
    pub path: String,
    pub status: ChangeStatus,
    pub kind: EntryKind,
}

/// One line of `blame` output and the commit that last changed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameLine {
    pub revision: Revision,
    pub author: String,
    pub date: DateTime<Utc>,
    /// Line content without its terminating newline
    pub line: String,
}

/// Cache counters of a repository handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of times a generation change cleared the cache
    pub invalidations: u64,
}

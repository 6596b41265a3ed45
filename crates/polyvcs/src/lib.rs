//! Repository abstraction layer
//!
//! One read-mostly interface over git, Mercurial and Subversion
//! repositories. Branches, tags and heads, history, trees and file contents
//! look the same whichever native system stores them; each backend shells
//! out to the native tools through an injectable [`CommandRunner`].
//!
//! # Example
//!
//! ```no_run
//! use polyvcs::{LogOptions, LsOptions, RevSpec};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = polyvcs::open(Path::new("/path/to/repo"), None, None)?;
//! for (name, rev) in repo.branches()? {
//!     println!("{name} -> {rev}");
//! }
//! for entry in repo.log(&LogOptions::default().with_limit(10))? {
//!     let entry = entry?;
//!     println!("{} {}", entry.revision, entry.subject());
//! }
//! let root = repo.ls(&RevSpec::named("main"), "/", &LsOptions::default())?;
//! println!("{} entries at the root", root.len());
//! # Ok(())
//! # }
//! ```

mod backend;
mod cache;
mod command;
mod config;
mod encoding;
mod error;
mod factory;
mod history;
mod pool;
mod probe;
mod traits;
pub mod tree;
mod types;

use std::path::Path;

pub use backend::RepoContext;
pub use cache::Generation;
pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use config::{Tool, ToolPaths, VcsConfig};
pub use encoding::TextEncoding;
pub use error::VcsError;
pub use factory::VcsFactory;
pub use history::Log;
pub use pool::{AsyncRepository, WorkerPool};
pub use probe::{ProbeRule, PROBE_RULES};
pub use traits::{VcsBackend, VcsHistory, VcsRefs, VcsRepository, VcsTree};
pub use types::{
    BackendKind, BlameLine, CacheStats, ChangeStatus, CopySource, EntryKind, FileChange, LogEntry,
    LogOptions, LsOptions, LsReport, RevSpec, Revision, TreeChange, TreeEntry,
};

#[cfg(feature = "git")]
pub use backend::git::GitRepository;
#[cfg(feature = "hg")]
pub use backend::hg::HgRepository;
#[cfg(feature = "svn")]
pub use backend::svn::SvnRepository;

/// Guess the backend and working-copy flag of `path` without running any
/// native tool
pub fn probe(path: &Path) -> Result<(BackendKind, Option<bool>), VcsError> {
    probe::probe(path)
}

/// Open `path` with the default configuration; whatever is `None` is
/// probed
pub fn open(
    path: &Path,
    kind: Option<BackendKind>,
    working_copy: Option<bool>,
) -> Result<Box<dyn VcsBackend>, VcsError> {
    VcsFactory::default().open_as(path, kind, working_copy)
}

/// Create a new repository with the default configuration
pub fn create(
    path: &Path,
    kind: BackendKind,
    working_copy: Option<bool>,
) -> Result<Box<dyn VcsBackend>, VcsError> {
    VcsFactory::default().create(path, kind, working_copy)
}

/// Clone `source` into `dest` with the default configuration
pub fn clone(
    source: &Path,
    dest: &Path,
    kind: Option<BackendKind>,
    working_copy: Option<bool>,
) -> Result<Box<dyn VcsBackend>, VcsError> {
    VcsFactory::default().clone(source, dest, kind, working_copy)
}

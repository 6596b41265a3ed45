mod context;

#[cfg(feature = "git")]
pub mod git;
#[cfg(feature = "hg")]
pub mod hg;
#[cfg(feature = "svn")]
pub mod svn;

pub use context::RepoContext;
pub(crate) use context::RepoCore;

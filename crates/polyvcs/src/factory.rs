use std::path::Path;
use std::sync::Arc;

use crate::backend::RepoContext;
use crate::command::{CommandRunner, SystemRunner};
use crate::config::VcsConfig;
use crate::error::VcsError;
use crate::probe;
use crate::traits::VcsBackend;
use crate::types::BackendKind;

/// What the dispatcher was asked to do with the chosen backend
#[derive(Debug, Clone, Copy)]
enum Action<'a> {
    Open { path: &'a Path },
    Create { path: &'a Path },
    Clone { source: &'a Path, dest: &'a Path },
}

/// Factory for repository handles
///
/// Picks the backend from the probe (or the configured override), checks
/// that it was compiled in, and hands every handle the same runner and
/// configuration.
#[derive(Debug, Clone)]
pub struct VcsFactory {
    config: VcsConfig,
    runner: Arc<dyn CommandRunner>,
}

impl Default for VcsFactory {
    fn default() -> Self {
        Self::new(VcsConfig::default())
    }
}

impl VcsFactory {
    pub fn new(config: VcsConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    /// Use `runner` instead of spawning processes directly
    pub fn with_runner(config: VcsConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &VcsConfig {
        &self.config
    }

    fn context(&self) -> RepoContext {
        RepoContext::new(self.runner.clone(), self.config.clone())
    }

    /// Guess the backend and working-copy flag of `path`
    pub fn probe(&self, path: &Path) -> Result<(BackendKind, Option<bool>), VcsError> {
        probe::probe(path)
    }

    /// Open an existing repository or working copy
    pub fn open(&self, path: &Path) -> Result<Box<dyn VcsBackend>, VcsError> {
        self.open_as(path, self.config.kind, self.config.working_copy)
    }

    /// Open with explicit backend and working-copy choices; whatever is
    /// `None` is probed
    pub fn open_as(
        &self,
        path: &Path,
        kind: Option<BackendKind>,
        working_copy: Option<bool>,
    ) -> Result<Box<dyn VcsBackend>, VcsError> {
        if !path.is_dir() {
            return Err(VcsError::InvalidPath(path.to_path_buf()));
        }
        let (kind, working_copy) =
            probe::resolve_guess(path, kind, working_copy, self.config.assume_working_copy)?;
        tracing::debug!(path = %path.display(), %kind, working_copy, "Opening repository");
        self.dispatch(kind, working_copy, Action::Open { path })
    }

    /// Initialize a new repository; not a working copy unless configured
    pub fn create(
        &self,
        path: &Path,
        kind: BackendKind,
        working_copy: Option<bool>,
    ) -> Result<Box<dyn VcsBackend>, VcsError> {
        let working_copy = working_copy.or(self.config.working_copy).unwrap_or(false);
        tracing::debug!(path = %path.display(), %kind, working_copy, "Creating repository");
        self.dispatch(kind, working_copy, Action::Create { path })
    }

    /// Copy `source` to `dest` with the native tool of `source`'s backend.
    /// The backend is probed from `source` unless given.
    pub fn clone(
        &self,
        source: &Path,
        dest: &Path,
        kind: Option<BackendKind>,
        working_copy: Option<bool>,
    ) -> Result<Box<dyn VcsBackend>, VcsError> {
        if !source.is_dir() {
            return Err(VcsError::InvalidPath(source.to_path_buf()));
        }
        if dest.exists() {
            return Err(VcsError::InvalidPath(dest.to_path_buf()));
        }
        let (kind, _) = probe::resolve_guess(
            source,
            kind.or(self.config.kind),
            Some(false),
            self.config.assume_working_copy,
        )?;
        let working_copy = working_copy.or(self.config.working_copy).unwrap_or(false);
        tracing::debug!(
            source = %source.display(),
            dest = %dest.display(),
            %kind,
            working_copy,
            "Cloning repository"
        );
        self.dispatch(kind, working_copy, Action::Clone { source, dest })
    }

    fn dispatch(
        &self,
        kind: BackendKind,
        working_copy: bool,
        action: Action<'_>,
    ) -> Result<Box<dyn VcsBackend>, VcsError> {
        if kind == BackendKind::Svn && working_copy {
            let path = match action {
                Action::Open { path } | Action::Create { path } => path,
                Action::Clone { dest, .. } => dest,
            };
            return Err(VcsError::UnrecognizedRepositoryType(format!(
                "svn working copy at {}",
                path.display()
            )));
        }

        match kind {
            #[cfg(feature = "git")]
            BackendKind::Git => construct::<crate::backend::git::GitRepository>(
                action,
                working_copy,
                self.context(),
            ),
            #[cfg(feature = "hg")]
            BackendKind::Hg => construct::<crate::backend::hg::HgRepository>(
                action,
                working_copy,
                self.context(),
            ),
            #[cfg(feature = "svn")]
            BackendKind::Svn => construct::<crate::backend::svn::SvnRepository>(
                action,
                working_copy,
                self.context(),
            ),
            #[cfg(not(feature = "git"))]
            BackendKind::Git => Err(VcsError::BackendDisabled(kind.to_string())),
            #[cfg(not(feature = "hg"))]
            BackendKind::Hg => Err(VcsError::BackendDisabled(kind.to_string())),
            #[cfg(not(feature = "svn"))]
            BackendKind::Svn => Err(VcsError::BackendDisabled(kind.to_string())),
        }
    }
}

#[cfg(any(feature = "git", feature = "hg", feature = "svn"))]
fn construct<R>(
    action: Action<'_>,
    working_copy: bool,
    ctx: RepoContext,
) -> Result<Box<dyn VcsBackend>, VcsError>
where
    R: VcsBackend + 'static,
{
    let repo = match action {
        Action::Open { path } => R::open(path, working_copy, ctx)?,
        Action::Create { path } => R::create(path, working_copy, ctx)?,
        Action::Clone { source, dest } => R::clone_from(source, dest, working_copy, ctx)?,
    };
    Ok(Box::new(repo))
}

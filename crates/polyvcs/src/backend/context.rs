//! State shared by every backend implementation.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::cache::{Generation, RepoCache};
use crate::command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
use crate::config::{Tool, VcsConfig};
use crate::error::VcsError;
use crate::types::CacheStats;

/// What a backend needs from its creator: a way to run native tools and
/// the configuration it was opened with
#[derive(Debug, Clone)]
pub struct RepoContext {
    runner: Arc<dyn CommandRunner>,
    config: Arc<VcsConfig>,
}

impl Default for RepoContext {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner), VcsConfig::default())
    }
}

impl RepoContext {
    pub fn new(runner: Arc<dyn CommandRunner>, config: VcsConfig) -> Self {
        Self {
            runner,
            config: Arc::new(config),
        }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn config(&self) -> &VcsConfig {
        &self.config
    }

    /// Invocation of `tool` with no working directory set
    pub(crate) fn command(&self, tool: Tool) -> Invocation {
        let inv = Invocation::new(self.config.tool(tool));
        match tool {
            Tool::Hg => inv.env("HGPLAIN", "1"),
            Tool::Svnlook | Tool::Svnadmin => inv.env("LC_MESSAGES", "C"),
            Tool::Git | Tool::Tar => inv,
        }
    }

    /// Run and require a zero exit
    pub(crate) fn run_checked(&self, invocation: &Invocation) -> Result<Vec<u8>, VcsError> {
        self.runner.run(invocation)?.check(invocation)
    }
}

/// Path, mode, tool access and cache of one open repository
#[derive(Debug)]
pub(crate) struct RepoCore {
    pub path: PathBuf,
    pub working_copy: bool,
    pub ctx: RepoContext,
    cache: RepoCache,
}

impl RepoCore {
    pub fn new(path: &Path, working_copy: bool, ctx: RepoContext) -> Self {
        let cache = RepoCache::new(path, ctx.config().cache_capacity);
        Self {
            path: path.to_path_buf(),
            working_copy,
            ctx,
            cache,
        }
    }

    /// Invocation of `tool` running inside the repository
    pub fn command(&self, tool: Tool) -> Invocation {
        self.ctx.command(tool).current_dir(&self.path)
    }

    /// Run without interpreting the exit code
    pub fn run(&self, invocation: &Invocation) -> Result<CommandOutput, VcsError> {
        self.ctx.runner.run(invocation)
    }

    pub fn output(&self, invocation: &Invocation) -> Result<Vec<u8>, VcsError> {
        self.ctx.run_checked(invocation)
    }

    /// Run and decode stdout with the configured encoding
    pub fn text(&self, invocation: &Invocation) -> Result<String, VcsError> {
        let bytes = self.output(invocation)?;
        Ok(self.decode(&bytes))
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        self.ctx.config().encoding.decode(bytes)
    }

    pub fn pipe(&self, producer: &Invocation, consumer: &Invocation) -> Result<(), VcsError> {
        self.ctx.runner.pipe(producer, consumer)
    }

    pub fn cached<T, F>(
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
        self.cache.get_or_compute(generation, op, args, compute)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// `<metadata_dir>/.private`, created if missing
    pub fn private_dir(&self, metadata_dir: &Path) -> Result<PathBuf, VcsError> {
        let dir = metadata_dir.join(".private");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

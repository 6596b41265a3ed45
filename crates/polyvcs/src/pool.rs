//! Bounded execution of repository operations from async code.
//!
//! Every backend operation blocks on native tool processes. [`WorkerPool`]
//! runs them on tokio's blocking threads and lets at most `size` of them run
//! at once; an operation runs its commands one after another, so the same
//! bound holds for native processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::VcsConfig;
use crate::error::VcsError;
use crate::traits::VcsBackend;
use crate::types::*;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn from_config(config: &VcsConfig) -> Self {
        Self::new(config.max_concurrent_commands)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running operation
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `op` on a blocking thread once a permit is free
    pub async fn run<T, F>(&self, op: F) -> Result<T, VcsError>
    where
        F: FnOnce() -> Result<T, VcsError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| VcsError::WorkerPool(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            op()
        })
        .await
        .map_err(|e| VcsError::WorkerPool(e.to_string()))?
    }
}

/// Async facade over a shared repository handle
#[derive(Clone)]
pub struct AsyncRepository {
    repo: Arc<dyn VcsBackend>,
    pool: WorkerPool,
}

impl std::fmt::Debug for AsyncRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRepository")
            .field("repo", &self.repo.description())
            .field("pool", &self.pool)
            .finish()
    }
}

impl AsyncRepository {
    pub fn new(repo: Box<dyn VcsBackend>, pool: WorkerPool) -> Self {
        Self {
            repo: Arc::from(repo),
            pool,
        }
    }

    pub fn repository(&self) -> &Arc<dyn VcsBackend> {
        &self.repo
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    async fn call<T, F>(&self, op: F) -> Result<T, VcsError>
    where
        F: FnOnce(&dyn VcsBackend) -> Result<T, VcsError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        self.pool.run(move || op(repo.as_ref())).await
    }

    pub async fn branches(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        self.call(|repo| repo.branches()).await
    }

    pub async fn tags(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        self.call(|repo| repo.tags()).await
    }

    pub async fn heads(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        self.call(|repo| repo.heads()).await
    }

    pub async fn canonical_rev(&self, rev: RevSpec) -> Result<Revision, VcsError> {
        self.call(move |repo| repo.canonical_rev(&rev)).await
    }

    /// The whole log, collected on the worker thread
    pub async fn log(&self, options: LogOptions) -> Result<Vec<LogEntry>, VcsError> {
        self.call(move |repo| repo.log(&options)?.collect::<Result<Vec<_>, _>>())
            .await
    }

    pub async fn log_entry(&self, rev: RevSpec) -> Result<LogEntry, VcsError> {
        self.call(move |repo| repo.log_entry(&rev)).await
    }

    pub async fn ancestor(&self, a: RevSpec, b: RevSpec) -> Result<Option<Revision>, VcsError> {
        self.call(move |repo| repo.ancestor(&a, &b)).await
    }

    pub async fn changes(
        &self,
        rev: RevSpec,
    ) -> Result<BTreeMap<String, FileChange>, VcsError> {
        self.call(move |repo| repo.changes(&rev)).await
    }

    pub async fn ls(
        &self,
        rev: RevSpec,
        path: String,
        options: LsOptions,
    ) -> Result<Vec<TreeEntry>, VcsError> {
        self.call(move |repo| repo.ls(&rev, &path, &options)).await
    }

    pub async fn cat(&self, rev: RevSpec, path: String) -> Result<Vec<u8>, VcsError> {
        self.call(move |repo| repo.cat(&rev, &path)).await
    }

    pub async fn readlink(&self, rev: RevSpec, path: String) -> Result<String, VcsError> {
        self.call(move |repo| repo.readlink(&rev, &path)).await
    }

    pub async fn export(&self, rev: RevSpec, dest: PathBuf) -> Result<(), VcsError> {
        self.call(move |repo| repo.export(&rev, &dest)).await
    }

    pub async fn diff_summary(
        &self,
        from: RevSpec,
        to: RevSpec,
        path: String,
    ) -> Result<Vec<TreeChange>, VcsError> {
        self.call(move |repo| repo.diff_summary(&from, &to, &path)).await
    }
}

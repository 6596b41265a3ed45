//! Shared fixtures for the integration tests.
//!
//! Every backend gets the same two-revision history:
//!
//! 1. `first`: `a` ("Pisgah"), `b -> a`, `c/d/e` (executable), `c/d/f -> e`
//! 2. `second`: `a` gains a line, `g` is added
//!
//! git fixtures are written with `git2`; hg and svn ones with the native
//! command line clients, and tests skip a backend whose tools are missing.

#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use git2::{
    IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature, Time, build::CheckoutBuilder,
};
use polyvcs::{
    BackendKind, CommandOutput, CommandRunner, Invocation, RevSpec, SystemRunner, VcsBackend,
    VcsConfig, VcsError, VcsFactory,
};
use tempfile::TempDir;
use utils::shell::is_executable_available;

pub const FIRST_A: &str = "Pisgah";
pub const SECOND_A: &str = "Pisgah\nNebo\n";
pub const USER: &str = "Test User <test@example.com>";

/// Backends whose native tools are installed
pub fn available() -> Vec<BackendKind> {
    BackendKind::ALL
        .into_iter()
        .filter(|kind| tools_available(*kind))
        .collect()
}

pub fn tools_available(kind: BackendKind) -> bool {
    let tools: &[&str] = match kind {
        BackendKind::Git => &["git", "tar"],
        BackendKind::Hg => &["hg"],
        BackendKind::Svn => &["svn", "svnadmin", "svnlook"],
    };
    tools.iter().all(|tool| is_executable_available(tool))
}

/// Run a test body once per available backend
#[macro_export]
macro_rules! test_with_backends {
    ($test_name:ident, $test_fn:expr) => {
        #[test]
        fn $test_name() {
            let backends = $crate::common::available();
            if backends.is_empty() {
                eprintln!("Skipping {}: no backend tools available", stringify!($test_name));
            }
            for backend in backends {
                println!("Running {} with backend: {}", stringify!($test_name), backend);
                $test_fn(backend);
            }
        }
    };
}

/// Counts native invocations and the peak number running at once
#[derive(Debug, Default)]
pub struct CountingRunner {
    inner: SystemRunner,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn track<T>(&self, f: impl FnOnce() -> T) -> T {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let out = f();
        self.running.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

impl CommandRunner for CountingRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, VcsError> {
        self.track(|| self.inner.run(invocation))
    }

    fn pipe(&self, producer: &Invocation, consumer: &Invocation) -> Result<(), VcsError> {
        self.track(|| self.inner.pipe(producer, consumer))
    }
}

/// A populated repository of one backend
pub struct VcsTestRepo {
    pub kind: BackendKind,
    pub root: TempDir,
    pub repo_path: PathBuf,
}

impl VcsTestRepo {
    pub fn init(kind: BackendKind) -> Self {
        let root = TempDir::new().expect("create temp dir");
        let repo_path = root.path().join("repo");
        match kind {
            BackendKind::Git => init_git(&repo_path),
            BackendKind::Hg => init_hg(&repo_path),
            BackendKind::Svn => init_svn(root.path(), &repo_path),
        }
        Self {
            kind,
            root,
            repo_path,
        }
    }

    pub fn open(&self) -> Box<dyn VcsBackend> {
        polyvcs::open(&self.repo_path, None, None).expect("open fixture")
    }

    pub fn open_with(&self, runner: Arc<dyn CommandRunner>) -> Box<dyn VcsBackend> {
        VcsFactory::with_runner(VcsConfig::default(), runner)
            .open(&self.repo_path)
            .expect("open fixture")
    }

    /// Name of the branch holding both revisions
    pub fn branch(&self) -> &'static str {
        match self.kind {
            BackendKind::Git => "main",
            BackendKind::Hg => "default",
            BackendKind::Svn => "trunk",
        }
    }

    pub fn branch_spec(&self) -> RevSpec {
        RevSpec::named(self.branch())
    }

    /// A path under the temp root that does not exist yet
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    /// Commit on top of the fixture branch after `edit` has changed a
    /// checkout of it. Added and deleted files are picked up.
    pub fn commit(&self, message: &str, time: i64, edit: impl FnOnce(&Path)) {
        match self.kind {
            BackendKind::Git => {
                let repo = Repository::open(&self.repo_path).unwrap();
                edit(&self.repo_path);
                let parent = repo.head().unwrap().target();
                git_commit(&repo, message, time, parent);
            }
            BackendKind::Hg => {
                edit(&self.repo_path);
                let date = format!("{time} 0");
                run(&self.repo_path, "hg", &["addremove", "--quiet"]);
                run(&self.repo_path, "hg", &["commit", "-u", USER, "-d", &date, "-m", message]);
            }
            BackendKind::Svn => {
                let wc = self.root.path().join("wc");
                run(&wc, "svn", &["update", "--quiet"]);
                edit(&wc);
                svn_addremove(&wc);
                run(&wc, "svn", &["commit", "--quiet", "-m", message]);
            }
        }
    }

    /// Start a line of history sharing nothing with the fixture branch and
    /// return its name
    pub fn unrelated_branch(&self) -> RevSpec {
        match self.kind {
            BackendKind::Git => {
                let repo = Repository::open(&self.repo_path).unwrap();
                let blob = repo.blob(b"other").unwrap();
                let mut builder = repo.treebuilder(None).unwrap();
                builder.insert("other", blob, 0o100644).unwrap();
                let tree = repo.find_tree(builder.write().unwrap()).unwrap();
                let sig = Signature::new("Test User", "test@example.com", &Time::new(3_000, 0)).unwrap();
                repo.commit(Some("refs/heads/other"), &sig, &sig, "other", &tree, &[])
                    .unwrap();
                RevSpec::named("other")
            }
            BackendKind::Hg => {
                let path = &self.repo_path;
                run(path, "hg", &["update", "--quiet", "null"]);
                write_file(path, "other", "other");
                run(path, "hg", &["branch", "--quiet", "other"]);
                run(path, "hg", &["add", "--quiet", "other"]);
                run(path, "hg", &["commit", "-u", USER, "-d", "3000 0", "-m", "other"]);
                run(path, "hg", &["update", "--quiet", "default"]);
                RevSpec::named("other")
            }
            BackendKind::Svn => {
                let url = format!("file://{}/branches/other", self.repo_path.to_str().unwrap());
                run(
                    self.root.path(),
                    "svn",
                    &["mkdir", "--parents", "--quiet", "-m", "other", &url],
                );
                RevSpec::named("branches/other")
            }
        }
    }

    /// Move a working copy to `revision`
    pub fn checkout(&self, revision: &str) {
        match self.kind {
            BackendKind::Git => {
                let repo = Repository::open(&self.repo_path).unwrap();
                repo.set_head_detached(Oid::from_str(revision).unwrap())
                    .unwrap();
                repo.checkout_head(Some(CheckoutBuilder::new().force()))
                    .unwrap();
            }
            BackendKind::Hg => run(&self.repo_path, "hg", &["update", "--quiet", "-r", revision]),
            BackendKind::Svn => panic!("svn fixtures are bare repositories"),
        }
    }
}

/// Write the `first` tree into `dir`
pub fn write_first_tree(dir: &Path) {
    write_file(dir, "a", FIRST_A);
    write_file(dir, "c/d/e", "#!/bin/sh\n");
    make_executable(&dir.join("c/d/e"));
    symlink("a", &dir.join("b"));
    symlink("e", &dir.join("c/d/f"));
}

/// Apply the `second` changes to `dir`
pub fn write_second_tree(dir: &Path) {
    write_file(dir, "a", SECOND_A);
    write_file(dir, "g", "g");
}

pub fn write_file(base: &Path, rel: &str, content: &str) {
    let path = base.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

#[cfg(unix)]
fn symlink(target: &str, link: &Path) {
    std::os::unix::fs::symlink(target, link).unwrap();
}

fn init_git(path: &Path) {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(path, &opts).unwrap();
    write_first_tree(path);
    let first = git_commit(&repo, "first", 1_000, None);
    write_second_tree(path);
    git_commit(&repo, "second", 2_000, Some(first));
}

fn git_commit(repo: &Repository, message: &str, time: i64, parent: Option<git2::Oid>) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::new("Test User", "test@example.com", &Time::new(time, 0)).unwrap();
    let parents: Vec<git2::Commit<'_>> = parent
        .map(|oid| repo.find_commit(oid).unwrap())
        .into_iter()
        .collect();
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

fn run(cwd: &Path, program: &str, args: &[&str]) {
    capture(cwd, program, args);
}

fn capture(cwd: &Path, program: &str, args: &[&str]) -> String {
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .env("HGPLAIN", "1")
        .output()
        .unwrap_or_else(|e| panic!("spawn {program}: {e}"));
    assert!(
        output.status.success(),
        "{program} {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Schedule deleted files for removal and new ones for addition
fn svn_addremove(wc: &Path) {
    for line in capture(wc, "svn", &["status"]).lines() {
        if let Some(path) = line.strip_prefix('!') {
            run(wc, "svn", &["rm", "--quiet", path.trim()]);
        }
    }
    run(wc, "svn", &["add", "--force", "--quiet", "."]);
}

fn init_hg(path: &Path) {
    fs::create_dir_all(path).unwrap();
    run(path, "hg", &["init", "--quiet"]);
    write_first_tree(path);
    run(path, "hg", &["add", "--quiet"]);
    run(path, "hg", &["commit", "-u", USER, "-d", "1000 0", "-m", "first"]);
    write_second_tree(path);
    run(path, "hg", &["add", "--quiet"]);
    run(path, "hg", &["commit", "-u", USER, "-d", "2000 0", "-m", "second"]);
}

fn init_svn(root: &Path, path: &Path) {
    let path_str = path.to_str().unwrap();
    run(root, "svnadmin", &["create", path_str]);
    let url = format!("file://{path_str}");

    let staging = root.join("staging");
    fs::create_dir_all(&staging).unwrap();
    write_first_tree(&staging);
    let trunk = format!("{url}/trunk");
    run(
        root,
        "svn",
        &["import", "--quiet", "-m", "first", staging.to_str().unwrap(), &trunk],
    );

    let wc = root.join("wc");
    run(root, "svn", &["checkout", "--quiet", &trunk, wc.to_str().unwrap()]);
    write_second_tree(&wc);
    run(&wc, "svn", &["add", "--quiet", "g"]);
    run(&wc, "svn", &["commit", "--quiet", "-m", "second"]);
}

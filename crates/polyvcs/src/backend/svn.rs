//! Subversion backend implementation
//!
//! Works directly on the repository (never a working copy) through
//! `svnlook` and `svnadmin`. Revisions are plain numbers for the whole tree
//! or `path:number` pairs when a branch directory such as `trunk` is
//! treated as the root of its own tree.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::backend::{RepoContext, RepoCore};
use crate::cache::Generation;
use crate::command::{CommandOutput, Invocation};
use crate::config::Tool;
use crate::error::VcsError;
use crate::history::{refs_by_revision, CommitGraph, CommitNode, EntrySource, Log, PathFilter};
use crate::traits::*;
use crate::tree;
use crate::types::*;

/// `[head][:][number]`, e.g. `trunk`, `trunk:12`, `12` or `HEAD`
static REV_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<head>\D[^:]*)?:?(?P<rev>\d+)?$").expect("revision name pattern is valid")
});

/// One `svn:mergeinfo` line: `/path:ranges`
static MERGEINFO_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<head>.+):(?P<ranges>[0-9*,\-]+)$").expect("mergeinfo pattern is valid")
});

const INFO_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// A resolved revision: a number and the directory serving as tree root
#[derive(Debug, Clone, PartialEq, Eq)]
struct Located {
    number: u64,
    root: String,
}

impl Located {
    fn whole(number: u64) -> Self {
        Self {
            number,
            root: String::new(),
        }
    }

    fn revision(&self) -> Revision {
        revision_at(&self.root, self.number)
    }

    /// Absolute repository path of `rel` below this root
    fn fspath(&self, rel: &str) -> String {
        format!("/{}", tree::join_path(&self.root, rel))
    }
}

/// Graph key of a revision: its number, whatever root it was seen under
fn number_key(revision: &Revision) -> Revision {
    revision.number().map_or_else(|| revision.clone(), Revision::Number)
}

fn revision_at(root: &str, number: u64) -> Revision {
    let root = root.trim_matches('/');
    if root.is_empty() {
        Revision::Number(number)
    } else {
        Revision::path_at(root, number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TreeLine {
    /// Repository path without leading or trailing slash
    path: String,
    is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HistoryLine {
    number: u64,
    path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChangedLine {
    status: char,
    path: String,
    is_dir: bool,
    copied_from: Option<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MergeRange {
    head: String,
    min: u64,
    max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Info {
    author: String,
    date: DateTime<Utc>,
    message: String,
}

type RefMaps = (BTreeMap<String, Revision>, BTreeMap<String, Revision>);

/// Subversion implementation of the repository backend
#[derive(Debug)]
pub struct SvnRepository {
    core: RepoCore,
}

impl SvnRepository {
    fn look(&self) -> Invocation {
        self.core.command(Tool::Svnlook)
    }

    /// Run `svnlook`, mapping its missing-path and missing-revision errors
    fn run_look(&self, inv: &Invocation, number: u64, fspath: &str) -> Result<Vec<u8>, VcsError> {
        let output = self.core.run(inv)?;
        self.checked_look(output, inv, number, fspath)
    }

    fn checked_look(
        &self,
        output: CommandOutput,
        inv: &Invocation,
        number: u64,
        fspath: &str,
    ) -> Result<Vec<u8>, VcsError> {
        if output.success() {
            return Ok(output.stdout);
        }
        let stderr = output.stderr_text();
        if stderr.contains("E160013") || stderr.contains("File not found") {
            return Err(VcsError::path_not_found(number, fspath.trim_start_matches('/')));
        }
        if stderr.contains("E160006") || stderr.contains("No such revision") {
            return Err(VcsError::unknown_revision(number));
        }
        output.check(inv)
    }

    fn look_text(&self, inv: &Invocation, number: u64, fspath: &str) -> Result<String, VcsError> {
        let bytes = self.run_look(inv, number, fspath)?;
        Ok(self.core.decode(&bytes))
    }

    fn youngest(&self) -> Result<u64, VcsError> {
        self.core.cached(self.generation()?, "youngest", "", || {
            let inv = self.look().args(["youngest", "."]);
            let text = self.core.text(&inv)?;
            text.trim()
                .parse()
                .map_err(|_| VcsError::parse(inv.command_line(), text.trim()))
        })
    }

    fn tree_lines(&self, number: u64, fspath: &str, recursive: bool) -> Result<Arc<Vec<TreeLine>>, VcsError> {
        let key = format!("{number} {fspath} {recursive}");
        self.core.cached(self.generation()?, "tree", &key, || {
            let mut inv = self
                .look()
                .args(["tree", "-r"])
                .arg(number.to_string())
                .arg("--full-paths");
            if !recursive {
                inv = inv.arg("--non-recursive");
            }
            let inv = inv.args([".", fspath]);
            let text = self.look_text(&inv, number, fspath)?;
            Ok(Arc::new(parse_tree(&text)))
        })
    }

    /// Revisions at or before `number` that changed `fspath`, newest first
    fn history(
        &self,
        number: u64,
        fspath: &str,
        limit: Option<usize>,
    ) -> Result<Arc<Vec<HistoryLine>>, VcsError> {
        let key = format!("{number} {fspath} {limit:?}");
        self.core.cached(self.generation()?, "history", &key, || {
            let mut inv = self
                .look()
                .args(["history", "-r"])
                .arg(number.to_string())
                .args([".", fspath]);
            if let Some(limit) = limit {
                inv = inv.arg("-l").arg(limit.to_string());
            }
            let text = self.look_text(&inv, number, fspath)?;
            parse_history(&text, &inv.command_line()).map(Arc::new)
        })
    }

    /// Like [`Self::history`], but a path that does not exist has no history
    fn history_or_empty(&self, number: u64, fspath: &str) -> Result<Arc<Vec<HistoryLine>>, VcsError> {
        match self.history(number, fspath, None) {
            Err(VcsError::PathNotFound { .. }) => Ok(Arc::default()),
            other => other,
        }
    }

    /// Property names of `fspath`, or revision properties when it is `None`
    fn prop_names(&self, number: u64, fspath: Option<&str>) -> Result<Arc<Vec<String>>, VcsError> {
        let target = fspath.unwrap_or("--revprop");
        self.core
            .cached(self.generation()?, "proplist", &format!("{number} {target}"), || {
                let inv = self
                    .look()
                    .args(["proplist", "-r"])
                    .arg(number.to_string())
                    .args([".", target]);
                let text = self.look_text(&inv, number, fspath.unwrap_or("/"))?;
                Ok(Arc::new(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect(),
                ))
            })
    }

    /// A property value; `None` when the property is not set
    fn prop_value(&self, number: u64, fspath: Option<&str>, prop: &str) -> Result<Option<String>, VcsError> {
        let target = fspath.unwrap_or("--revprop");
        let inv = self
            .look()
            .args(["propget", "-r"])
            .arg(number.to_string())
            .args([".", prop, target]);
        let output = self.core.run(&inv)?;
        if !output.success() && output.stderr_text().contains("E200017") {
            return Ok(None);
        }
        let bytes = self.checked_look(output, &inv, number, fspath.unwrap_or("/"))?;
        Ok(Some(self.core.decode(&bytes)))
    }

    fn cat_raw(&self, number: u64, fspath: &str) -> Result<Vec<u8>, VcsError> {
        self.core
            .cached(self.generation()?, "cat", &format!("{number} {fspath}"), || {
                let inv = self
                    .look()
                    .args(["cat", "-r"])
                    .arg(number.to_string())
                    .args([".", fspath]);
                self.run_look(&inv, number, fspath)
            })
    }

    /// Symlinks are files carrying `svn:special` whose content is `link <target>`
    fn classify(&self, number: u64, fspath: &str) -> Result<(EntryKind, Option<String>), VcsError> {
        if self.prop_names(number, Some(fspath))?.iter().any(|p| p == "svn:special") {
            let data = self.cat_raw(number, fspath)?;
            if let Some(target) = data.strip_prefix(b"link ") {
                return Ok((EntryKind::Symlink, Some(self.core.decode(target))));
            }
        }
        Ok((EntryKind::File, None))
    }

    fn info(&self, number: u64) -> Result<Info, VcsError> {
        self.core
            .cached(self.generation()?, "info", &number.to_string(), || {
                let inv = self
                    .look()
                    .args(["info", "-r"])
                    .arg(number.to_string())
                    .arg(".");
                let text = self.look_text(&inv, number, "/")?;
                parse_info(&text, &inv.command_line())
            })
    }

    /// Names of the directories directly below `fspath`
    fn child_dirs(&self, number: u64, fspath: &str) -> Result<Vec<String>, VcsError> {
        Ok(self
            .tree_lines(number, fspath, false)?
            .iter()
            .skip(1)
            .filter(|l| l.is_dir)
            .map(|l| l.path.rsplit('/').next().unwrap_or(&l.path).to_string())
            .collect())
    }

    /// Last change to `root` at or before `number`
    fn last_change(&self, number: u64, root: &str) -> Result<Located, VcsError> {
        let history = self.history(number, &format!("/{root}"), Some(1))?;
        let last = history.first().map_or(number, |h| h.number);
        Ok(Located {
            number: last,
            root: root.to_string(),
        })
    }

    /// `trunk`, `branches/*` and `tags/*`, at the top level or one project
    /// directory down
    fn refs(&self) -> Result<RefMaps, VcsError> {
        self.core.cached(self.generation()?, "refs", "", || {
            let mut branches = BTreeMap::new();
            let mut tags = BTreeMap::new();
            let youngest = self.youngest()?;
            if youngest == 0 {
                return Ok((branches, tags));
            }

            let top = self.child_dirs(youngest, "/")?;
            let mut roots = Vec::new();
            if top.iter().any(|d| d == "trunk") {
                roots.push((String::new(), top.clone()));
            } else {
                for project in &top {
                    let dirs = self.child_dirs(youngest, &format!("/{project}"))?;
                    if dirs.iter().any(|d| d == "trunk") {
                        roots.push((project.clone(), dirs));
                    }
                }
            }

            for (project, dirs) in roots {
                let trunk = tree::join_path(&project, "trunk");
                branches.insert(trunk.clone(), self.last_change(youngest, &trunk)?.revision());
                for (container, map) in [("branches", &mut branches), ("tags", &mut tags)] {
                    if !dirs.iter().any(|d| d == container) {
                        continue;
                    }
                    let base = tree::join_path(&project, container);
                    for name in self.child_dirs(youngest, &format!("/{base}"))? {
                        let full = format!("{base}/{name}");
                        map.insert(full.clone(), self.last_change(youngest, &full)?.revision());
                    }
                }
            }
            Ok((branches, tags))
        })
    }

    fn at_number(&self, number: u64, root: &str, rev: &RevSpec) -> Result<Located, VcsError> {
        if number > self.youngest()? {
            return Err(VcsError::unknown_revision(rev));
        }
        let (root, _) = tree::clean_path(root);
        if !root.is_empty() {
            match self.history(number, &format!("/{root}"), Some(1)) {
                Err(VcsError::PathNotFound { .. }) => return Err(VcsError::unknown_revision(rev)),
                Err(e) => return Err(e),
                Ok(_) => {}
            }
        }
        Ok(Located { number, root })
    }

    fn resolve(&self, rev: &RevSpec) -> Result<Located, VcsError> {
        match rev {
            RevSpec::Current | RevSpec::Exact(Revision::Hash(_)) => {
                Err(VcsError::unknown_revision(rev))
            }
            RevSpec::Exact(Revision::Number(n)) => self.at_number(*n, "", rev),
            RevSpec::Exact(Revision::PathAt { path, number }) => self.at_number(*number, path, rev),
            RevSpec::Named(name) => {
                let (head, number) =
                    parse_rev_name(name).ok_or_else(|| VcsError::unknown_revision(rev))?;
                let root = match head {
                    None | Some("HEAD") => "",
                    Some(head) => head,
                };
                match number {
                    Some(n) => self.at_number(n, root, rev),
                    None => {
                        let (root, _) = tree::clean_path(root);
                        let youngest = self.youngest()?;
                        if root.is_empty() {
                            return Ok(Located::whole(youngest));
                        }
                        match self.last_change(youngest, &root) {
                            Err(VcsError::PathNotFound { .. }) => Err(VcsError::unknown_revision(rev)),
                            other => other,
                        }
                    }
                }
            }
        }
    }

    /// First-parent chain below a start, as (revision, parents) pairs
    fn chain(&self, located: &Located) -> Result<Vec<(Revision, Vec<Revision>)>, VcsError> {
        if located.root.is_empty() {
            return Ok((1..=located.number)
                .rev()
                .map(|n| {
                    let parents = if n > 1 { vec![Revision::Number(n - 1)] } else { Vec::new() };
                    (Revision::Number(n), parents)
                })
                .collect());
        }
        let history = self.history(located.number, &located.fspath(""), None)?;
        let nodes: Vec<Revision> = history
            .iter()
            .filter(|h| h.number > 0)
            .map(|h| revision_at(&h.path, h.number))
            .collect();
        Ok(nodes
            .iter()
            .enumerate()
            .map(|(i, rev)| (rev.clone(), nodes.get(i + 1).cloned().into_iter().collect()))
            .collect())
    }

    fn parents_of(&self, revision: &Revision) -> Result<Vec<Revision>, VcsError> {
        match revision {
            Revision::Number(n) if *n > 1 => Ok(vec![Revision::Number(n - 1)]),
            Revision::PathAt { path, number } => {
                let history = self.history(*number, &format!("/{path}"), Some(2))?;
                Ok(history
                    .iter()
                    .find(|h| h.number < *number && h.number > 0)
                    .map(|h| revision_at(&h.path, h.number))
                    .into_iter()
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn entry(&self, revision: &Revision) -> Result<LogEntry, VcsError> {
        let number = revision
            .number()
            .ok_or_else(|| VcsError::unknown_revision(revision))?;
        let info = self.info(number)?;
        Ok(LogEntry {
            revision: revision.clone(),
            parents: self.parents_of(revision)?,
            author: info.author,
            date: info.date,
            message: info.message,
            refs: Vec::new(),
        })
    }

    fn ref_index(&self) -> Result<HashMap<Revision, Vec<String>>, VcsError> {
        let (branches, tags) = self.refs()?;
        let heads = self.heads()?;
        Ok(refs_by_revision([&branches, &tags, &heads]))
    }

    fn mergeinfo(&self, number: u64, fspath: &str) -> Result<Vec<MergeRange>, VcsError> {
        if !self.prop_names(number, Some(fspath))?.iter().any(|p| p == "svn:mergeinfo") {
            return Ok(Vec::new());
        }
        let value = self.prop_value(number, Some(fspath), "svn:mergeinfo")?;
        Ok(parse_mergeinfo(&value.unwrap_or_default()))
    }

    fn build_entry(
        &self,
        located: &Located,
        path: &str,
        name: &str,
        kind: EntryKind,
        target: Option<String>,
        report: &LsReport,
    ) -> Result<TreeEntry, VcsError> {
        let fspath = located.fspath(path);
        let mut entry = TreeEntry::new(path, name, kind);
        match kind {
            EntryKind::File => {
                if report.executable {
                    let props = self.prop_names(located.number, Some(&fspath))?;
                    entry.executable = Some(props.iter().any(|p| p == "svn:executable"));
                }
                if report.size {
                    entry.size = Some(self.cat_raw(located.number, &fspath)?.len() as u64);
                }
            }
            EntryKind::Symlink if report.target => entry.target = target,
            _ => {}
        }
        if report.commit {
            let history = self.history(located.number, &fspath, Some(1))?;
            entry.commit = history
                .first()
                .map(|h| revision_at(&located.root, h.number));
        }
        Ok(entry)
    }

    /// `ls` without the copy report
    fn list(
        &self,
        rev: &RevSpec,
        path: &str,
        options: &LsOptions,
    ) -> Result<Vec<TreeEntry>, VcsError> {
        let located = self.resolve(rev)?;
        let (clean, force_dir) = tree::clean_path(path);
        let report = &options.report;

        if clean.is_empty() && options.directory {
            let root = self.build_entry(&located, "", "", EntryKind::Directory, None, report)?;
            return Ok(vec![root]);
        }

        let fspath = located.fspath(&clean);
        let lines = match self.tree_lines(located.number, &fspath, options.recursive) {
            Err(VcsError::PathNotFound { .. }) => return Err(VcsError::path_not_found(rev, &clean)),
            other => other?,
        };
        let Some((first, rest)) = lines.split_first() else {
            return Err(VcsError::path_not_found(rev, &clean));
        };

        if !first.is_dir {
            if force_dir {
                return Err(VcsError::path_not_found(rev, &clean));
            }
            if !options.directory {
                return Err(VcsError::not_a_directory(rev, &clean));
            }
            let (kind, target) = self.classify(located.number, &fspath)?;
            return Ok(vec![self.build_entry(&located, &clean, "", kind, target, report)?]);
        }
        if options.directory {
            let dir = self.build_entry(&located, &clean, "", EntryKind::Directory, None, report)?;
            return Ok(vec![dir]);
        }

        let root_prefix = if located.root.is_empty() {
            String::new()
        } else {
            format!("{}/", located.root)
        };
        let mut entries = Vec::new();
        for line in rest.iter() {
            if line.is_dir && options.recursive && !options.recursive_dirs {
                continue;
            }
            let Some(rel) = line.path.strip_prefix(root_prefix.as_str()) else {
                tracing::warn!(path = %line.path, root = %located.root, "Skipping entry outside the listed root");
                continue;
            };
            let name = tree::relative_name(&clean, rel);
            let (kind, target) = if line.is_dir {
                (EntryKind::Directory, None)
            } else {
                self.classify(located.number, &format!("/{}", line.path))?
            };
            entries.push(self.build_entry(&located, rel, &name, kind, target, report)?);
        }
        Ok(tree::normalize(entries))
    }

    /// Revision and absolute path a property query addresses; no path means
    /// the revision properties
    fn prop_target(&self, rev: &RevSpec, path: Option<&str>) -> Result<(Located, Option<String>), VcsError> {
        let located = self.resolve(rev)?;
        let fspath = match path {
            None => None,
            Some(path) => {
                let (clean, _) = tree::clean_path(path);
                self.list(rev, &clean, &LsOptions::entry())?;
                Some(located.fspath(&clean))
            }
        };
        Ok((located, fspath))
    }

    /// The entry at `path` for cat/readlink, rejecting every other kind
    fn leaf(&self, rev: &RevSpec, path: &str, want: EntryKind) -> Result<(Located, TreeEntry), VcsError> {
        let (clean, _) = tree::clean_path(path);
        let bad = || match want {
            EntryKind::Symlink => VcsError::not_a_symlink(rev, &clean),
            _ => VcsError::not_a_file(rev, &clean),
        };
        if clean.is_empty() {
            return Err(bad());
        }
        let located = self.resolve(rev)?;
        let report = LsReport {
            target: true,
            ..LsReport::default()
        };
        let entry = self
            .list(rev, path, &LsOptions::entry().with_report(report))?
            .into_iter()
            .next()
            .ok_or_else(|| VcsError::path_not_found(rev, &clean))?;
        if entry.kind != want {
            return Err(bad());
        }
        Ok((located, entry))
    }
}

// ============================================================================
// VcsRepository Implementation
// ============================================================================

impl VcsRepository for SvnRepository {
    fn create(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError> {
        reject_working_copy(path, working_copy)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        ctx.run_checked(&ctx.command(Tool::Svnadmin).arg("create").arg(path))?;
        tracing::debug!(path = %path.display(), "Created svn repository");
        Self::open(path, working_copy, ctx)
    }

    fn open(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError> {
        reject_working_copy(path, working_copy)?;
        if !path.join("format").is_file() || !path.join("db").is_dir() {
            return Err(VcsError::unrecognized(path));
        }
        Ok(Self {
            core: RepoCore::new(path, false, ctx),
        })
    }

    fn clone_from(
        source: &Path,
        dest: &Path,
        working_copy: bool,
        ctx: RepoContext,
    ) -> Result<Self, VcsError> {
        reject_working_copy(dest, working_copy)?;
        let inv = ctx.command(Tool::Svnadmin).arg("hotcopy").arg(source).arg(dest);
        ctx.run_checked(&inv)?;
        Self::open(dest, working_copy, ctx)
    }

    fn path(&self) -> &Path {
        &self.core.path
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Svn
    }

    fn is_working_copy(&self) -> bool {
        false
    }

    fn private_path(&self) -> Result<PathBuf, VcsError> {
        self.core.private_dir(&self.core.path)
    }

    fn generation(&self) -> Result<Generation, VcsError> {
        Ok(Generation::new().file(self.core.path.join("db").join("current"))?)
    }

    fn cache_stats(&self) -> CacheStats {
        self.core.cache_stats()
    }
}

fn reject_working_copy(path: &Path, working_copy: bool) -> Result<(), VcsError> {
    if working_copy {
        return Err(VcsError::UnrecognizedRepositoryType(format!(
            "svn working copy at {}",
            path.display()
        )));
    }
    Ok(())
}

// ============================================================================
// VcsRefs Implementation
// ============================================================================

impl VcsRefs for SvnRepository {
    fn branches(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        Ok(self.refs()?.0)
    }

    fn tags(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        Ok(self.refs()?.1)
    }

    /// The youngest revision, as `HEAD`
    fn heads(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        let youngest = self.youngest()?;
        let mut heads = BTreeMap::new();
        if youngest > 0 {
            heads.insert("HEAD".to_string(), Revision::Number(youngest));
        }
        Ok(heads)
    }

    fn canonical_rev(&self, rev: &RevSpec) -> Result<Revision, VcsError> {
        Ok(self.resolve(rev)?.revision())
    }

    fn is_empty(&self) -> Result<bool, VcsError> {
        Ok(self.youngest()? == 0)
    }
}

// ============================================================================
// VcsHistory Implementation
// ============================================================================

impl EntrySource for SvnRepository {
    fn load_entry(&self, revision: &Revision) -> Result<LogEntry, VcsError> {
        self.entry(revision)
    }
}

impl VcsHistory for SvnRepository {
    fn log(&self, options: &LogOptions) -> Result<Log<'_>, VcsError> {
        let starts = if options.starts.is_empty() {
            match self.youngest()? {
                0 => Vec::new(),
                youngest => vec![Located::whole(youngest)],
            }
        } else {
            options
                .starts
                .iter()
                .map(|s| self.resolve(s))
                .collect::<Result<Vec<_>, _>>()?
        };
        let stops = options
            .stops
            .iter()
            .map(|s| self.resolve(s))
            .collect::<Result<Vec<_>, _>>()?;

        // Nodes are keyed by number so a commit reached through several
        // roots is listed once, under the identity of the first start that
        // reaches it. Commits are numbered in commit order, so the number
        // also serves as the ordering key.
        let mut graph = CommitGraph::new();
        let mut display: HashMap<Revision, Revision> = HashMap::new();
        let mut add_chain = |located: &Located, shown: bool| -> Result<Option<Revision>, VcsError> {
            let chain = self.chain(located)?;
            let head = chain.first().map(|(revision, _)| number_key(revision));
            for (revision, parents) in chain {
                let key = number_key(&revision);
                let timestamp = revision.number().map_or(0, |n| n as i64);
                if shown {
                    display.entry(key.clone()).or_insert(revision);
                }
                graph.insert(
                    key,
                    CommitNode {
                        parents: parents.iter().map(number_key).collect(),
                        timestamp,
                        entry: None,
                    },
                );
            }
            Ok(head)
        };
        let mut start_revs = Vec::new();
        for located in &starts {
            start_revs.extend(add_chain(located, true)?);
        }
        let mut stop_revs = Vec::new();
        for located in &stops {
            stop_revs.extend(add_chain(located, false)?);
        }
        graph.prune_implied_parents();
        if start_revs.is_empty() {
            return Ok(Log::empty(self));
        }

        let filter = match options.path.as_deref().map(tree::clean_path) {
            Some((path, _)) if !path.is_empty() => {
                let mut numbers = HashSet::new();
                for located in &starts {
                    let history = self.history_or_empty(located.number, &located.fspath(&path))?;
                    numbers.extend(history.iter().map(|h| h.number));
                }
                Some(PathFilter::Numbers(numbers))
            }
            _ => None,
        };

        let refs = Arc::new(self.ref_index()?);
        let walk = Arc::new(graph).walk(&start_revs, &stop_revs, options.first_parent);
        Ok(Log::new(walk, self, filter, options.merges, options.limit, refs).with_display(display))
    }

    fn log_entry(&self, rev: &RevSpec) -> Result<LogEntry, VcsError> {
        let located = self.resolve(rev)?;
        if located.number == 0 {
            return Err(VcsError::unknown_revision(rev));
        }
        let mut entry = self.entry(&located.revision())?;
        if let Some(names) = self.ref_index()?.remove(&entry.revision) {
            entry.refs = names;
        }
        Ok(entry)
    }

    /// Mergeinfo recorded on either side wins over plain history
    /// intersection
    fn ancestor(&self, a: &RevSpec, b: &RevSpec) -> Result<Option<Revision>, VcsError> {
        let (a, b) = (self.resolve(a)?, self.resolve(b)?);
        if a.root == b.root {
            return Ok(Some(revision_at(&a.root, a.number.min(b.number))));
        }
        let (path_a, path_b) = (a.fspath(""), b.fspath(""));
        let history_a = self.history_or_empty(a.number, &path_a)?;
        let history_b = self.history_or_empty(b.number, &path_b)?;

        let mut best: Option<&HistoryLine> = None;
        for (side, path, other) in [(&a, &path_a, &history_b), (&b, &path_b, &history_a)] {
            for range in self.mergeinfo(side.number, path)? {
                let found = other
                    .iter()
                    .take_while(|h| h.number >= range.min)
                    .find(|h| h.number > 0 && h.path == range.head && h.number <= range.max);
                if let Some(found) = found {
                    if best.is_none_or(|current| found.number > current.number) {
                        best = Some(found);
                    }
                }
            }
        }
        if let Some(best) = best {
            return Ok(Some(revision_at(&best.path, best.number)));
        }

        let (mut i, mut j) = (0, 0);
        while let (Some(x), Some(y)) = (history_a.get(i), history_b.get(j)) {
            match x.number.cmp(&y.number) {
                std::cmp::Ordering::Less => j += 1,
                std::cmp::Ordering::Greater => i += 1,
                std::cmp::Ordering::Equal if x.path == y.path && x.number > 0 => {
                    return Ok(Some(revision_at(&x.path, x.number)));
                }
                std::cmp::Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(None)
    }

    fn changes(&self, rev: &RevSpec) -> Result<BTreeMap<String, FileChange>, VcsError> {
        let located = self.resolve(rev)?;
        let number = located.number;
        let key = format!("{number} {}", located.root);
        self.core.cached(self.generation()?, "changes", &key, || {
            let inv = self
                .look()
                .args(["changed", "-r"])
                .arg(number.to_string())
                .args(["--copy-info", "."]);
            let text = self.look_text(&inv, number, "/")?;
            let root_prefix = if located.root.is_empty() {
                String::new()
            } else {
                format!("{}/", located.root)
            };

            let mut changes = BTreeMap::new();
            for line in parse_changed(&text, &inv.command_line())? {
                let Some(rel) = line.path.strip_prefix(root_prefix.as_str()) else {
                    continue;
                };
                if rel.is_empty() {
                    continue;
                }
                let status = match line.status {
                    'A' | 'R' => ChangeStatus::Added,
                    'D' => ChangeStatus::Removed,
                    'U' | '_' => ChangeStatus::Modified,
                    other => {
                        tracing::warn!(status = %other, path = %line.path, "Skipping unsupported svn change status");
                        continue;
                    }
                };
                let kind = if line.is_dir {
                    EntryKind::Directory
                } else {
                    let at = if status == ChangeStatus::Removed { number.saturating_sub(1) } else { number };
                    self.classify(at, &format!("/{}", line.path))?.0
                };
                let copied_from = line.copied_from.map(|(source, from)| {
                    match source.strip_prefix(root_prefix.as_str()) {
                        Some(rel) if !root_prefix.is_empty() => CopySource {
                            path: rel.to_string(),
                            revision: Some(revision_at(&located.root, from)),
                        },
                        _ => CopySource {
                            path: source,
                            revision: Some(Revision::Number(from)),
                        },
                    }
                });
                changes.insert(
                    rel.to_string(),
                    FileChange {
                        status,
                        kind,
                        copied_from,
                    },
                );
            }
            Ok(changes)
        })
    }
}

// ============================================================================
// VcsTree Implementation
// ============================================================================

impl VcsTree for SvnRepository {
    fn ls(
        &self,
        rev: &RevSpec,
        path: &str,
        options: &LsOptions,
    ) -> Result<Vec<TreeEntry>, VcsError> {
        let mut entries = self.list(rev, path, options)?;
        if options.report.copies {
            tree::attach_copies(&mut entries, &self.changes(rev)?);
        }
        Ok(entries)
    }

    fn cat(&self, rev: &RevSpec, path: &str) -> Result<Vec<u8>, VcsError> {
        let (located, entry) = self.leaf(rev, path, EntryKind::File)?;
        self.cat_raw(located.number, &located.fspath(&entry.path))
    }

    fn readlink(&self, rev: &RevSpec, path: &str) -> Result<String, VcsError> {
        let (_, entry) = self.leaf(rev, path, EntryKind::Symlink)?;
        Ok(entry.target.unwrap_or_default())
    }

    fn export(&self, rev: &RevSpec, dest: &Path) -> Result<(), VcsError> {
        tree::export_tree(self, rev, dest)
    }

    fn proplist(&self, rev: &RevSpec, path: Option<&str>) -> Result<Vec<String>, VcsError> {
        let (located, fspath) = self.prop_target(rev, path)?;
        Ok(self.prop_names(located.number, fspath.as_deref())?.to_vec())
    }

    fn propget(
        &self,
        prop: &str,
        rev: &RevSpec,
        path: Option<&str>,
    ) -> Result<Option<String>, VcsError> {
        let (located, fspath) = self.prop_target(rev, path)?;
        self.prop_value(located.number, fspath.as_deref(), prop)
    }
}

impl VcsBackend for SvnRepository {}

// ============================================================================
// Output parsing
// ============================================================================

fn parse_rev_name(name: &str) -> Option<(Option<&str>, Option<u64>)> {
    if name.is_empty() {
        return None;
    }
    let caps = REV_NAME.captures(name)?;
    let head = caps.name("head").map(|m| m.as_str());
    let number = match caps.name("rev") {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    Some((head, number))
}

fn parse_tree(text: &str) -> Vec<TreeLine> {
    text.lines()
        .filter(|l| !l.is_empty())
        .map(|l| TreeLine {
            path: l.trim_matches('/').to_string(),
            is_dir: l.ends_with('/'),
        })
        .collect()
}

/// `svnlook history` prints two header lines, then `<rev> <path>` rows
fn parse_history(text: &str, command: &str) -> Result<Vec<HistoryLine>, VcsError> {
    text.lines()
        .skip(2)
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (number, path) = line
                .trim_start()
                .split_once(char::is_whitespace)
                .ok_or_else(|| VcsError::parse(command, line))?;
            let number = number.parse().map_err(|_| VcsError::parse(command, line))?;
            Ok(HistoryLine {
                number,
                path: path.trim_start().to_string(),
            })
        })
        .collect()
}

/// Author, date, log size and message, one per line
fn parse_info(text: &str, command: &str) -> Result<Info, VcsError> {
    let mut parts = text.splitn(4, '\n');
    let author = parts.next().unwrap_or_default().to_string();
    let date_line = parts.next().unwrap_or_default();
    let _size = parts.next();
    let message = parts.next().unwrap_or_default().trim_end_matches('\n').to_string();

    let stamp = date_line.split(" (").next().unwrap_or(date_line).trim();
    let date = DateTime::parse_from_str(stamp, INFO_DATE_FORMAT)
        .map_err(|e| VcsError::parse(command, format!("bad date {stamp:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(Info {
        author,
        date,
        message,
    })
}

/// `svnlook changed --copy-info`: three status columns, a space, the path,
/// and an indented `(from path:rN)` line after copies
fn parse_changed(text: &str, command: &str) -> Result<Vec<ChangedLine>, VcsError> {
    let mut out: Vec<ChangedLine> = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if let Some(source) = line.trim_start().strip_prefix("(from ") {
            let (path, number) = source
                .trim_end_matches(')')
                .rsplit_once(":r")
                .ok_or_else(|| VcsError::parse(command, line))?;
            let number = number.parse().map_err(|_| VcsError::parse(command, line))?;
            let last = out.last_mut().ok_or_else(|| VcsError::parse(command, line))?;
            last.copied_from = Some((path.trim_matches('/').to_string(), number));
            continue;
        }
        let status = line.chars().next().ok_or_else(|| VcsError::parse(command, line))?;
        let path = line.get(4..).ok_or_else(|| VcsError::parse(command, line))?;
        out.push(ChangedLine {
            status,
            path: path.trim_matches('/').to_string(),
            is_dir: path.ends_with('/'),
            copied_from: None,
        });
    }
    Ok(out)
}

/// Every `/path:ranges` line; non-inheritable markers are ignored
fn parse_mergeinfo(text: &str) -> Vec<MergeRange> {
    let mut out = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = MERGEINFO_LINE.captures(line) else {
            tracing::warn!(line, "Skipping unparsable svn:mergeinfo line");
            continue;
        };
        let head = caps["head"].to_string();
        for range in caps["ranges"].split(',') {
            let range = range.trim_end_matches('*');
            let bounds = match range.split_once('-') {
                Some((min, max)) => min.parse().ok().zip(max.parse().ok()),
                None => range.parse().ok().map(|n| (n, n)),
            };
            if let Some((min, max)) = bounds {
                out.push(MergeRange {
                    head: head.clone(),
                    min,
                    max,
                });
            }
        }
    }
    out
}

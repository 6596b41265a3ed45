//! Mercurial backend implementation
//!
//! Every command runs with `HGPLAIN=1` so user configuration cannot change
//! the output formats parsed here. Mercurial always keeps a working
//! directory next to `.hg`; whether [`RevSpec::Current`] is honoured is
//! decided by the handle's working-copy flag alone.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;

use crate::backend::{RepoContext, RepoCore};
use crate::cache::Generation;
use crate::command::Invocation;
use crate::config::Tool;
use crate::error::VcsError;
use crate::history::{refs_by_revision, CommitGraph, EntrySource, Log, PathFilter};
use crate::traits::*;
use crate::tree;
use crate::types::*;

const NULL_NODE: &str = "0000000000000000000000000000000000000000";
const LOG_TEMPLATE: &str = "{node}\\0{p1node}\\0{p2node}\\0{date|hgdate}\\0{author}\\0{desc}\\0";
const LOG_FIELDS: usize = 6;
const ANNOTATE_TEMPLATE: &str = "{lines % '{node}\\0{user}\\0{date|hgdate}\\0{line}\\0'}";
const ANNOTATE_FIELDS: usize = 4;

/// Mercurial implementation of the repository backend
#[derive(Debug)]
pub struct HgRepository {
    core: RepoCore,
}

impl HgRepository {
    fn hg(&self) -> Invocation {
        self.core.command(Tool::Hg)
    }

    fn dot_hg(&self) -> PathBuf {
        self.core.path.join(".hg")
    }

    fn rev_expr(&self, rev: &RevSpec) -> Result<String, VcsError> {
        match rev {
            RevSpec::Current if self.core.working_copy => Ok(".".to_string()),
            RevSpec::Current => Err(VcsError::unknown_revision(rev)),
            RevSpec::Named(name) if name.is_empty() || name.starts_with('-') => {
                Err(VcsError::unknown_revision(rev))
            }
            RevSpec::Named(name) => Ok(name.clone()),
            RevSpec::Exact(Revision::Hash(node)) => Ok(node.clone()),
            RevSpec::Exact(other) => Err(VcsError::unknown_revision(other)),
        }
    }

    /// Resolve to a full changeset node; the null revision never resolves
    fn resolve(&self, rev: &RevSpec) -> Result<String, VcsError> {
        let expr = self.rev_expr(rev)?;
        self.core.cached(self.generation()?, "resolve", &expr, || {
            let inv = self
                .hg()
                .args(["log", "-l", "1", "-T", "{node}", "-r"])
                .arg(&expr);
            let output = self.core.run(&inv)?;
            match output.status {
                // hg aborts with 255 on unknown names and bad revsets alike
                Some(255) => Err(VcsError::unknown_revision(&expr)),
                Some(0) => {
                    let node = self.core.decode(&output.stdout).trim().to_string();
                    if node.is_empty() || node == NULL_NODE {
                        Err(VcsError::unknown_revision(&expr))
                    } else {
                        Ok(node)
                    }
                }
                _ => output.check(&inv).map(|_| String::new()),
            }
        })
    }

    /// `name\0node` listings from `hg branches|tags|bookmarks`
    fn named_nodes(&self, op: &'static str, keyword: &str) -> Result<BTreeMap<String, Revision>, VcsError> {
        self.core.cached(self.generation()?, op, "", || {
            let inv = self
                .hg()
                .arg(op)
                .arg("-T")
                .arg(format!("{{{keyword}}}\\0{{node}}\\n"));
            let text = self.core.text(&inv)?;
            Ok(parse_named_nodes(&text))
        })
    }

    /// Named branch of every DAG head, closed heads included
    fn dag_heads(&self) -> Result<Vec<(String, String)>, VcsError> {
        self.core.cached(self.generation()?, "dag-heads", "", || {
            let inv = self
                .hg()
                .args(["log", "-r", "heads(all())", "-T", "{node}\\0{branch}\\n"]);
            let text = self.core.text(&inv)?;
            Ok(text
                .lines()
                .filter_map(|line| line.split_once('\0'))
                .map(|(node, branch)| (node.to_string(), branch.to_string()))
                .collect())
        })
    }

    /// Bookmarks and their changesets
    pub fn bookmarks(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        self.named_nodes("bookmarks", "bookmark")
    }

    fn graph(&self, tips: &[String]) -> Result<Arc<CommitGraph>, VcsError> {
        let mut key: Vec<&str> = tips.iter().map(String::as_str).collect();
        key.sort_unstable();
        key.dedup();
        self.core
            .cached(self.generation()?, "graph", &key.join(" "), || {
                let inv = self
                    .hg()
                    .arg("log")
                    .arg("-r")
                    .arg(format!("::({})", key.join(" + ")))
                    .arg("-T")
                    .arg(LOG_TEMPLATE);
                let text = self.core.text(&inv)?;
                let mut graph = CommitGraph::new();
                for entry in parse_log(&text, &inv.command_line())? {
                    graph.insert_entry(entry);
                }
                Ok(Arc::new(graph))
            })
    }

    fn touching(&self, starts: &[String], stops: &[String], path: &str) -> Result<HashSet<Revision>, VcsError> {
        let mut revset = format!("::({})", starts.join(" + "));
        if !stops.is_empty() {
            revset.push_str(&format!(" - ::({})", stops.join(" + ")));
        }
        self.core
            .cached(self.generation()?, "touching", &format!("{revset} {path}"), || {
                let inv = self
                    .hg()
                    .args(["log", "-T", "{node}\\n", "-r"])
                    .arg(&revset)
                    .arg("--")
                    .arg(format!("path:{path}"));
                let text = self.core.text(&inv)?;
                Ok(text
                    .lines()
                    .filter(|l| !l.is_empty())
                    .map(Revision::hash)
                    .collect())
            })
    }

    fn manifest(&self, node: &str) -> Result<Arc<Vec<ManifestLine>>, VcsError> {
        self.core.cached(self.generation()?, "manifest", node, || {
            let inv = self.hg().args(["manifest", "--debug", "-v", "-r", node]);
            let text = self.core.text(&inv)?;
            let lines = text
                .lines()
                .filter(|l| !l.is_empty())
                .map(|l| parse_manifest_line(l).ok_or_else(|| VcsError::parse(inv.command_line(), l)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Arc::new(lines))
        })
    }

    fn file_data(&self, node: &str, path: &str) -> Result<Vec<u8>, VcsError> {
        self.core
            .cached(self.generation()?, "cat", &format!("{node}:{path}"), || {
                let inv = self
                    .hg()
                    .args(["cat", "-r", node, "--"])
                    .arg(format!("path:{path}"));
                self.core.output(&inv)
            })
    }

    fn last_commit(&self, node: &str, path: &str) -> Result<Option<Revision>, VcsError> {
        let mut inv = self
            .hg()
            .args(["log", "-l", "1", "-T", "{node}", "-r"])
            .arg(format!("reverse(::{node})"));
        if !path.is_empty() {
            inv = inv.arg("--").arg(format!("path:{path}"));
        }
        let text = self.core.text(&inv)?;
        let found = text.trim();
        Ok((!found.is_empty()).then(|| Revision::hash(found)))
    }

    fn build_entry(
        &self,
        node: &str,
        full: &str,
        name: &str,
        line: Option<&ManifestLine>,
        report: &LsReport,
    ) -> Result<TreeEntry, VcsError> {
        let kind = line.map_or(EntryKind::Directory, ManifestLine::kind);
        let mut entry = TreeEntry::new(full, name, kind);
        if let Some(line) = line {
            entry.object_id = Some(line.file_node.clone());
            match kind {
                EntryKind::File => {
                    if report.executable {
                        entry.executable = Some(line.flag == '*');
                    }
                    if report.size {
                        entry.size = Some(self.file_data(node, full)?.len() as u64);
                    }
                }
                EntryKind::Symlink if report.target => {
                    entry.target = Some(self.core.decode(&self.file_data(node, full)?));
                }
                _ => {}
            }
        }
        if report.commit {
            entry.commit = self.last_commit(node, full)?;
        }
        Ok(entry)
    }

    /// Kind of the entry at `path`, looking only at one manifest
    fn kind_at(&self, node: &str, path: &str) -> Result<Option<EntryKind>, VcsError> {
        let manifest = self.manifest(node)?;
        let prefix = format!("{path}/");
        if let Some(line) = manifest.iter().find(|l| l.path == path) {
            return Ok(Some(line.kind()));
        }
        Ok(manifest
            .iter()
            .any(|l| l.path.starts_with(&prefix))
            .then_some(EntryKind::Directory))
    }

    fn blob_at(&self, rev: &RevSpec, path: &str, want: EntryKind) -> Result<Vec<u8>, VcsError> {
        let (clean, force_dir) = tree::clean_path(path);
        let node = self.resolve(rev)?;
        let bad = || match want {
            EntryKind::Symlink => VcsError::not_a_symlink(rev, &clean),
            _ => VcsError::not_a_file(rev, &clean),
        };
        if clean.is_empty() {
            return Err(bad());
        }
        match self.kind_at(&node, &clean)? {
            None => Err(VcsError::path_not_found(rev, &clean)),
            Some(kind) if force_dir && kind != EntryKind::Directory => {
                Err(VcsError::path_not_found(rev, &clean))
            }
            Some(kind) if kind == want => self.file_data(&node, &clean),
            Some(_) => Err(bad()),
        }
    }

    /// `ls` without the copy report
    fn list(
        &self,
        rev: &RevSpec,
        path: &str,
        options: &LsOptions,
    ) -> Result<Vec<TreeEntry>, VcsError> {
        let (path, force_dir) = tree::clean_path(path);
        let node = self.resolve(rev)?;
        let report = &options.report;

        if path.is_empty() && options.directory {
            return Ok(vec![self.build_entry(&node, "", "", None, report)?]);
        }

        let manifest = self.manifest(&node)?;
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let mut exact: Option<&ManifestLine> = None;
        let mut below = Vec::new();
        for line in manifest.iter() {
            if !path.is_empty() && line.path == path {
                exact = Some(line);
            } else if let Some(rest) = line.path.strip_prefix(prefix.as_str()) {
                below.push((rest, line));
            }
        }

        match (exact, below.is_empty()) {
            (None, true) => return Err(VcsError::path_not_found(rev, &path)),
            (Some(_), true) if force_dir => return Err(VcsError::path_not_found(rev, &path)),
            (Some(line), true) => {
                if options.directory {
                    return Ok(vec![self.build_entry(&node, &path, "", Some(line), report)?]);
                }
                return Err(VcsError::not_a_directory(rev, &path));
            }
            (_, false) if options.directory => {
                return Ok(vec![self.build_entry(&node, &path, "", None, report)?]);
            }
            _ => {}
        }
        if let Some(line) = exact {
            tracing::warn!(path = %path, kind = %line.kind(), "Manifest holds both a file and entries below it");
        }

        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (rest, line) in below {
            match rest.rsplit_once('/').map(|(dir, _)| dir) {
                Some(dir) if !options.recursive => {
                    dirs.insert(dir.split('/').next().unwrap_or(dir).to_string());
                    continue;
                }
                Some(dir) if options.recursive_dirs => {
                    for (end, _) in dir.match_indices('/') {
                        dirs.insert(dir[..end].to_string());
                    }
                    dirs.insert(dir.to_string());
                }
                _ => {}
            }
            entries.push(self.build_entry(
                &node,
                &tree::join_path(&path, rest),
                rest,
                Some(line),
                report,
            )?);
        }
        for dir in dirs {
            let full = tree::join_path(&path, &dir);
            entries.push(self.build_entry(&node, &full, &dir, None, report)?);
        }
        Ok(tree::normalize(entries))
    }

    fn default_starts(&self) -> Result<Vec<String>, VcsError> {
        Ok(self.dag_heads()?.into_iter().map(|(node, _)| node).collect())
    }
}

// ============================================================================
// VcsRepository Implementation
// ============================================================================

impl VcsRepository for HgRepository {
    fn create(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError> {
        fs::create_dir_all(path)?;
        ctx.run_checked(&ctx.command(Tool::Hg).args(["init", "--quiet"]).arg(path))?;
        tracing::debug!(path = %path.display(), "Created hg repository");
        Self::open(path, working_copy, ctx)
    }

    fn open(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError> {
        if !path.join(".hg").is_dir() {
            return Err(VcsError::unrecognized(path));
        }
        Ok(Self {
            core: RepoCore::new(path, working_copy, ctx),
        })
    }

    fn clone_from(
        source: &Path,
        dest: &Path,
        working_copy: bool,
        ctx: RepoContext,
    ) -> Result<Self, VcsError> {
        let mut inv = ctx.command(Tool::Hg).args(["clone", "--quiet"]);
        if !working_copy {
            inv = inv.arg("-U");
        }
        ctx.run_checked(&inv.arg(source).arg(dest))?;
        Self::open(dest, working_copy, ctx)
    }

    fn path(&self) -> &Path {
        &self.core.path
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Hg
    }

    fn is_working_copy(&self) -> bool {
        self.core.working_copy
    }

    fn private_path(&self) -> Result<PathBuf, VcsError> {
        self.core.private_dir(&self.dot_hg())
    }

    fn generation(&self) -> Result<Generation, VcsError> {
        let hg = self.dot_hg();
        let store = hg.join("store");
        Ok(Generation::new()
            .file(store.join("00changelog.i"))?
            .file(store.join("00changelog.d"))?
            .file(store.join("phaseroots"))?
            .file(hg.join("bookmarks"))?
            .file(hg.join("localtags"))?
            .file(hg.join("dirstate"))?)
    }

    fn cache_stats(&self) -> CacheStats {
        self.core.cache_stats()
    }
}

// ============================================================================
// VcsRefs Implementation
// ============================================================================

impl VcsRefs for HgRepository {
    fn branches(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        self.named_nodes("branches", "branch")
    }

    fn tags(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        let mut tags = self.named_nodes("tags", "tag")?;
        tags.remove("tip");
        Ok(tags)
    }

    /// Tip of every named branch that still has a DAG head
    fn heads(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        let active: BTreeSet<String> = self.dag_heads()?.into_iter().map(|(_, b)| b).collect();
        let mut branches = self.branches()?;
        branches.retain(|name, _| active.contains(name));
        Ok(branches)
    }

    fn canonical_rev(&self, rev: &RevSpec) -> Result<Revision, VcsError> {
        self.resolve(rev).map(Revision::hash)
    }

    fn is_empty(&self) -> Result<bool, VcsError> {
        self.core.cached(self.generation()?, "is-empty", "", || {
            let inv = self.hg().args(["log", "-l", "1", "-T", "a"]);
            Ok(self.core.output(&inv)?.is_empty())
        })
    }
}

// ============================================================================
// VcsHistory Implementation
// ============================================================================

impl EntrySource for HgRepository {
    fn load_entry(&self, revision: &Revision) -> Result<LogEntry, VcsError> {
        self.log_entry(&RevSpec::from(revision))
    }
}

impl VcsHistory for HgRepository {
    fn log(&self, options: &LogOptions) -> Result<Log<'_>, VcsError> {
        let starts = if options.starts.is_empty() {
            self.default_starts()?
        } else {
            options
                .starts
                .iter()
                .map(|s| self.resolve(s))
                .collect::<Result<Vec<_>, _>>()?
        };
        if starts.is_empty() {
            return Ok(Log::empty(self));
        }
        let stops = options
            .stops
            .iter()
            .map(|s| self.resolve(s))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tips = starts.clone();
        tips.extend(stops.iter().cloned());
        let graph = self.graph(&tips)?;

        let filter = match options.path.as_deref().map(tree::clean_path) {
            Some((path, _)) if !path.is_empty() => {
                Some(PathFilter::Revisions(self.touching(&starts, &stops, &path)?))
            }
            _ => None,
        };

        let (branches, tags, bookmarks) = (self.branches()?, self.tags()?, self.bookmarks()?);
        let refs = Arc::new(refs_by_revision([&branches, &tags, &bookmarks]));
        let starts: Vec<Revision> = starts.iter().map(Revision::hash).collect();
        let stops: Vec<Revision> = stops.iter().map(Revision::hash).collect();
        let walk = graph.walk(&starts, &stops, options.first_parent);

        Ok(Log::new(walk, self, filter, options.merges, options.limit, refs))
    }

    fn log_entry(&self, rev: &RevSpec) -> Result<LogEntry, VcsError> {
        let node = self.resolve(rev)?;
        let mut entry = self.core.cached(self.generation()?, "entry", &node, || {
            let inv = self.hg().args(["log", "-r", node.as_str(), "-T", LOG_TEMPLATE]);
            parse_log(&self.core.text(&inv)?, &inv.command_line())?
                .into_iter()
                .next()
                .ok_or_else(|| VcsError::unknown_revision(&node))
        })?;
        let (branches, tags, bookmarks) = (self.branches()?, self.tags()?, self.bookmarks()?);
        if let Some(names) = refs_by_revision([&branches, &tags, &bookmarks]).remove(&entry.revision) {
            entry.refs = names;
        }
        Ok(entry)
    }

    fn ancestor(&self, a: &RevSpec, b: &RevSpec) -> Result<Option<Revision>, VcsError> {
        let (a, b) = (self.resolve(a)?, self.resolve(b)?);
        let inv = self
            .hg()
            .args(["log", "-T", "{node}", "-r"])
            .arg(format!("ancestor({a}, {b})"));
        let text = self.core.text(&inv)?;
        let node = text.trim();
        if node.is_empty() || node == NULL_NODE {
            Ok(None)
        } else {
            Ok(Some(Revision::hash(node)))
        }
    }

    fn changes(&self, rev: &RevSpec) -> Result<BTreeMap<String, FileChange>, VcsError> {
        let entry = self.log_entry(rev)?;
        let node = entry.revision.to_string();
        let parent = entry.parents.first().map(|p| p.to_string());
        self.core.cached(self.generation()?, "changes", &node, || {
            let inv = self.hg().args(["status", "--change", node.as_str(), "-C"]);
            let text = self.core.text(&inv)?;
            let new = self.manifest(&node)?;
            let old = match &parent {
                Some(parent) => self.manifest(parent)?,
                None => Arc::default(),
            };
            let kind_in = |manifest: &[ManifestLine], path: &str| {
                manifest
                    .iter()
                    .find(|l| l.path == path)
                    .map_or(EntryKind::File, ManifestLine::kind)
            };

            let mut changes: BTreeMap<String, FileChange> = BTreeMap::new();
            let mut last_added: Option<String> = None;
            for line in text.lines().filter(|l| !l.is_empty()) {
                if let Some(source) = line.strip_prefix("  ") {
                    let Some(dest) = last_added.as_ref() else {
                        return Err(VcsError::parse(inv.command_line(), line));
                    };
                    if let Some(change) = changes.get_mut(dest) {
                        change.copied_from = Some(CopySource {
                            path: source.to_string(),
                            revision: parent.as_deref().map(Revision::hash),
                        });
                    }
                    continue;
                }
                let Some((code, path)) = line.split_once(' ') else {
                    return Err(VcsError::parse(inv.command_line(), line));
                };
                let change = match code {
                    "A" => FileChange::new(ChangeStatus::Added, kind_in(new.as_slice(), path)),
                    "M" => FileChange::new(ChangeStatus::Modified, kind_in(new.as_slice(), path)),
                    "R" => FileChange::new(ChangeStatus::Removed, kind_in(old.as_slice(), path)),
                    _ => {
                        tracing::warn!(code, path, "Skipping unsupported hg status");
                        continue;
                    }
                };
                last_added = (code == "A").then(|| path.to_string());
                changes.insert(path.to_string(), change);
            }
            Ok(changes)
        })
    }

    fn diff(&self, from: &RevSpec, to: &RevSpec, path: Option<&str>) -> Result<Vec<u8>, VcsError> {
        let (from, to) = (self.resolve(from)?, self.resolve(to)?);
        let mut inv = self
            .hg()
            .args(["diff", "--git", "-r", from.as_str(), "-r", to.as_str()]);
        if let Some(path) = path.map(tree::clean_path).map(|(p, _)| p).filter(|p| !p.is_empty()) {
            inv = inv.arg("--").arg(format!("path:{path}"));
        }
        self.core.output(&inv)
    }

    fn patch(&self, rev: &RevSpec) -> Result<Vec<u8>, VcsError> {
        let node = self.resolve(rev)?;
        self.core.cached(self.generation()?, "patch", &node, || {
            let inv = self.hg().args(["diff", "--git", "-c", node.as_str()]);
            self.core.output(&inv)
        })
    }
}

// ============================================================================
// VcsTree Implementation
// ============================================================================

impl VcsTree for HgRepository {
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
        self.blob_at(rev, path, EntryKind::File)
    }

    fn readlink(&self, rev: &RevSpec, path: &str) -> Result<String, VcsError> {
        let bytes = self.blob_at(rev, path, EntryKind::Symlink)?;
        Ok(self.core.decode(&bytes))
    }

    fn export(&self, rev: &RevSpec, dest: &Path) -> Result<(), VcsError> {
        if dest.exists() {
            return Err(VcsError::InvalidPath(dest.to_path_buf()));
        }
        let node = self.resolve(rev)?;
        // hg runs inside the repository, so a relative destination would land there
        let inv = self
            .hg()
            .args(["archive", "-t", "files", "-r", node.as_str()])
            .arg(std::path::absolute(dest)?);
        self.core.output(&inv)?;
        match fs::remove_file(dest.join(".hg_archival.txt")) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn blame(&self, rev: &RevSpec, path: &str) -> Result<Vec<BlameLine>, VcsError> {
        let (clean, _) = tree::clean_path(path);
        // Same kind checks as cat
        self.blob_at(rev, path, EntryKind::File)?;
        let node = self.resolve(rev)?;
        self.core
            .cached(self.generation()?, "blame", &format!("{node}:{clean}"), || {
                let inv = self
                    .hg()
                    .args(["annotate", "-r", node.as_str(), "-T", ANNOTATE_TEMPLATE, "--"])
                    .arg(format!("path:{clean}"));
                parse_annotate(&self.core.text(&inv)?, &inv.command_line())
            })
    }
}

impl VcsBackend for HgRepository {}

// ============================================================================
// Output parsing
// ============================================================================

/// One line of `hg manifest --debug -v`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestLine {
    file_node: String,
    flag: char,
    path: String,
}

impl ManifestLine {
    fn kind(&self) -> EntryKind {
        match self.flag {
            '@' => EntryKind::Symlink,
            _ => EntryKind::File,
        }
    }
}

/// `<node> <mode> <flag> <path>`, where flag is ' ', '*' or '@'
fn parse_manifest_line(line: &str) -> Option<ManifestLine> {
    let (file_node, rest) = line.split_once(' ')?;
    let (mode, rest) = rest.split_once(' ')?;
    if mode.len() != 3 || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    let mut chars = rest.chars();
    let flag = chars.next()?;
    let path = chars.as_str().strip_prefix(' ')?;
    if path.is_empty() {
        return None;
    }
    Some(ManifestLine {
        file_node: file_node.to_string(),
        flag,
        path: path.to_string(),
    })
}

fn parse_named_nodes(text: &str) -> BTreeMap<String, Revision> {
    text.lines()
        .filter_map(|line| line.split_once('\0'))
        .filter(|(_, node)| !node.is_empty() && *node != NULL_NODE)
        .map(|(name, node)| (name.to_string(), Revision::hash(node)))
        .collect()
}

/// `{date|hgdate}` is `<unix seconds> <offset>`
fn parse_hgdate(value: &str) -> Option<i64> {
    let seconds = value.split_whitespace().next()?;
    seconds
        .split('.')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
}

fn parse_log(text: &str, command: &str) -> Result<Vec<LogEntry>, VcsError> {
    let fields: Vec<&str> = text.split('\0').collect();
    let mut out = Vec::new();
    for record in fields.chunks(LOG_FIELDS) {
        let &[node, p1, p2, date, author, desc] = record else {
            if record.iter().all(|f| f.is_empty()) {
                break;
            }
            return Err(VcsError::parse(command, format!("truncated record {record:?}")));
        };
        let seconds = parse_hgdate(date)
            .ok_or_else(|| VcsError::parse(command, format!("bad date {date:?}")))?;
        let date = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| VcsError::parse(command, format!("date out of range {seconds}")))?;
        out.push(LogEntry {
            revision: Revision::hash(node),
            parents: [p1, p2]
                .into_iter()
                .filter(|p| !p.is_empty() && *p != NULL_NODE)
                .map(Revision::hash)
                .collect(),
            author: author.to_string(),
            date,
            message: desc.to_string(),
            refs: Vec::new(),
        });
    }
    Ok(out)
}

fn parse_annotate(text: &str, command: &str) -> Result<Vec<BlameLine>, VcsError> {
    let fields: Vec<&str> = text.split('\0').collect();
    let mut out = Vec::new();
    for record in fields.chunks(ANNOTATE_FIELDS) {
        let &[node, user, date, line] = record else {
            if record.iter().all(|f| f.is_empty()) {
                break;
            }
            return Err(VcsError::parse(command, format!("truncated record {record:?}")));
        };
        let seconds = parse_hgdate(date)
            .ok_or_else(|| VcsError::parse(command, format!("bad date {date:?}")))?;
        out.push(BlameLine {
            revision: Revision::hash(node),
            author: user.to_string(),
            date: DateTime::from_timestamp(seconds, 0)
                .ok_or_else(|| VcsError::parse(command, format!("date out of range {seconds}")))?,
            line: line.strip_suffix('\n').unwrap_or(line).to_string(),
        });
    }
    Ok(out)
}

//! Git backend implementation for the repository abstraction
//!
//! This module drives the `git` command line. Both bare repositories and
//! working copies are supported; a working copy additionally resolves
//! [`RevSpec::Current`] to its checked-out `HEAD`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;

use crate::backend::{RepoContext, RepoCore};
use crate::cache::Generation;
use crate::config::Tool;
use crate::error::VcsError;
use crate::history::{refs_by_revision, CommitGraph, CommitNode, EntrySource, Log, PathFilter};
use crate::traits::*;
use crate::tree;
use crate::types::*;

const LOG_FORMAT: &str = "--format=%H%x00%P%x00%at%x00%ct%x00%an <%ae>%x00%B";
const LOG_FIELDS: usize = 6;
/// Object id git reserves for the empty tree
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Git implementation of the repository backend
#[derive(Debug)]
pub struct GitRepository {
    core: RepoCore,
    git_dir: PathBuf,
}

type RefMaps = (BTreeMap<String, Revision>, BTreeMap<String, Revision>);

impl GitRepository {
    fn git(&self) -> crate::command::Invocation {
        self.core.command(Tool::Git)
    }

    /// Map a spec to a revision expression git understands
    fn rev_expr(&self, rev: &RevSpec) -> Result<String, VcsError> {
        match rev {
            RevSpec::Current if self.core.working_copy => Ok("HEAD".to_string()),
            RevSpec::Current => Err(VcsError::unknown_revision(rev)),
            RevSpec::Named(name) if name.is_empty() || name.starts_with('-') => {
                Err(VcsError::unknown_revision(rev))
            }
            RevSpec::Named(name) => Ok(name.clone()),
            RevSpec::Exact(Revision::Hash(hash)) => Ok(hash.clone()),
            RevSpec::Exact(other) => Err(VcsError::unknown_revision(other)),
        }
    }

    /// Resolve to a full commit hash
    fn resolve(&self, rev: &RevSpec) -> Result<String, VcsError> {
        let expr = self.rev_expr(rev)?;
        self.core
            .cached(self.generation()?, "resolve", &expr, || {
                let inv = self
                    .git()
                    .args(["rev-parse", "--verify", "--quiet"])
                    .arg(format!("{expr}^{{commit}}"));
                let output = self.core.run(&inv)?;
                match output.status {
                    Some(0) => Ok(self.core.decode(&output.stdout).trim().to_string()),
                    Some(1) => Err(VcsError::unknown_revision(&expr)),
                    _ => output.check(&inv).map(|_| String::new()),
                }
            })
    }

    fn refs(&self) -> Result<RefMaps, VcsError> {
        self.core.cached(self.generation()?, "refs", "", || {
            let inv = self.git().args([
                "for-each-ref",
                "--format=%(refname)%00%(objectname)%00%(*objectname)",
                "refs/heads",
                "refs/tags",
            ]);
            parse_refs(&self.core.text(&inv)?)
        })
    }

    /// Commit graph reachable from `tips`
    fn graph(&self, tips: &[String]) -> Result<Arc<CommitGraph>, VcsError> {
        let mut key: Vec<&str> = tips.iter().map(String::as_str).collect();
        key.sort_unstable();
        key.dedup();
        self.core
            .cached(self.generation()?, "graph", &key.join(" "), || {
                let inv = self
                    .git()
                    .args(["log", "-z", LOG_FORMAT])
                    .args(&key)
                    .arg("--");
                let text = self.core.text(&inv)?;
                let mut graph = CommitGraph::new();
                for (entry, commit_time) in parse_log(&text, &inv.command_line())? {
                    let revision = entry.revision.clone();
                    graph.insert(
                        revision,
                        CommitNode {
                            parents: entry.parents.clone(),
                            timestamp: commit_time,
                            entry: Some(entry),
                        },
                    );
                }
                Ok(Arc::new(graph))
            })
    }

    /// Commits reachable from `starts` but not `stops` that touch `path`
    fn touching(
        &self,
        starts: &[String],
        stops: &[String],
        path: &str,
    ) -> Result<HashSet<Revision>, VcsError> {
        let args = format!("{} ^{} -- {}", starts.join(" "), stops.join(" ^"), path);
        self.core.cached(self.generation()?, "touching", &args, || {
            let mut inv = self
                .git()
                .args(["log", "--format=%H", "--full-history"])
                .args(starts);
            if !stops.is_empty() {
                inv = inv.arg("--not").args(stops);
            }
            let text = self.core.text(&inv.arg("--").arg(path))?;
            Ok(text
                .lines()
                .filter(|l| !l.is_empty())
                .map(Revision::hash)
                .collect())
        })
    }

    fn ls_tree(&self, hash: &str, path: &str, recursive: bool, dirs: bool) -> Result<Vec<RawEntry>, VcsError> {
        let args = format!("{hash} {path} {recursive} {dirs}");
        self.core.cached(self.generation()?, "ls-tree", &args, || {
            let mut inv = self.git().args(["ls-tree", "-z", "-l"]);
            if recursive {
                inv = inv.arg("-r");
                if dirs {
                    inv = inv.arg("-t");
                }
            }
            inv = inv.arg(hash);
            if !path.is_empty() {
                inv = inv.arg("--").arg(path);
            }
            let text = self.core.text(&inv)?;
            parse_ls_tree(&text, &inv.command_line())
        })
    }

    /// Last commit at or before `hash` touching `path`
    fn last_commit(&self, hash: &str, path: &str) -> Result<Option<Revision>, VcsError> {
        let mut inv = self.git().args(["log", "-1", "--format=%H"]).arg(hash);
        if !path.is_empty() {
            inv = inv.arg("--").arg(path);
        }
        let text = self.core.text(&inv)?;
        let hash = text.trim();
        Ok((!hash.is_empty()).then(|| Revision::hash(hash)))
    }

    fn blob(&self, object: &str) -> Result<Vec<u8>, VcsError> {
        self.core.cached(self.generation()?, "blob", object, || {
            let inv = self.git().args(["cat-file", "blob", object]);
            self.core.output(&inv)
        })
    }

    fn to_entry(
        &self,
        hash: &str,
        raw: RawEntry,
        base: &str,
        report: &LsReport,
    ) -> Result<TreeEntry, VcsError> {
        let kind = raw.kind();
        let mut entry = TreeEntry::new(raw.path.clone(), tree::relative_name(base, &raw.path), kind);
        if kind == EntryKind::File {
            if report.size {
                entry.size = raw.size;
            }
            if report.executable {
                entry.executable = Some(raw.mode == "100755");
            }
        }
        if kind == EntryKind::Symlink && report.target {
            entry.target = Some(self.core.decode(&self.blob(&raw.object)?));
        }
        if report.commit {
            entry.commit = self.last_commit(hash, &raw.path)?;
        }
        entry.object_id = Some(raw.object);
        Ok(entry)
    }

    fn root_entry(&self, hash: &str, report: &LsReport) -> Result<TreeEntry, VcsError> {
        let mut entry = TreeEntry::new("", "", EntryKind::Directory);
        if report.commit {
            entry.commit = self.last_commit(hash, "")?;
        }
        Ok(entry)
    }

    /// Look up the single entry at `path` (which must not be the root)
    fn entry_at(&self, rev: &RevSpec, hash: &str, path: &str) -> Result<RawEntry, VcsError> {
        self.ls_tree(hash, path, false, false)?
            .into_iter()
            .find(|e| e.path == path)
            .ok_or_else(|| VcsError::path_not_found(rev, path))
    }

    /// Entry at `path` for cat/readlink; anything other than `want` is
    /// rejected with the matching error
    fn blob_entry(
        &self,
        rev: &RevSpec,
        path: &str,
        want: EntryKind,
    ) -> Result<RawEntry, VcsError> {
        let (clean, force_dir) = tree::clean_path(path);
        let hash = self.resolve(rev)?;
        let bad = |clean: &str| match want {
            EntryKind::Symlink => VcsError::not_a_symlink(rev, clean),
            _ => VcsError::not_a_file(rev, clean),
        };
        if clean.is_empty() {
            return Err(bad(&clean));
        }
        let raw = self.entry_at(rev, &hash, &clean)?;
        if force_dir && raw.kind() != EntryKind::Directory {
            return Err(VcsError::path_not_found(rev, &clean));
        }
        if raw.kind() != want {
            return Err(bad(&clean));
        }
        Ok(raw)
    }

    /// `ls` without the copy report
    fn list(
        &self,
        rev: &RevSpec,
        path: &str,
        options: &LsOptions,
    ) -> Result<Vec<TreeEntry>, VcsError> {
        let (path, force_dir) = tree::clean_path(path);
        let hash = self.resolve(rev)?;
        let report = &options.report;

        if path.is_empty() {
            if options.directory {
                return Ok(vec![self.root_entry(&hash, report)?]);
            }
        } else {
            let raw = self.entry_at(rev, &hash, &path)?;
            if raw.kind() != EntryKind::Directory {
                if force_dir {
                    return Err(VcsError::path_not_found(rev, &path));
                }
                if options.directory {
                    return Ok(vec![self.to_entry(&hash, raw, &path, report)?]);
                }
                return Err(VcsError::not_a_directory(rev, &path));
            }
            if options.directory {
                return Ok(vec![self.to_entry(&hash, raw, &path, report)?]);
            }
        }

        let listing_path = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let raws = self.ls_tree(
            &hash,
            &listing_path,
            options.recursive,
            options.recursive && options.recursive_dirs,
        )?;
        let entries = raws
            .into_iter()
            .filter(|raw| raw.path != path)
            .map(|raw| self.to_entry(&hash, raw, &path, report))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tree::normalize(entries))
    }

    fn unified_diff(&self, from: &str, to: &str, path: Option<&str>) -> Result<Vec<u8>, VcsError> {
        let mut inv = self
            .git()
            .args(["diff", "--no-color", "--no-ext-diff", "--binary", from, to]);
        if let Some(path) = path.map(tree::clean_path).map(|(p, _)| p).filter(|p| !p.is_empty()) {
            inv = inv.arg("--").arg(path);
        }
        self.core.output(&inv)
    }

    fn default_starts(&self) -> Result<Vec<String>, VcsError> {
        let (branches, _) = self.refs()?;
        let mut starts: Vec<String> = branches.values().map(|r| r.to_string()).collect();
        if starts.is_empty() && self.core.working_copy {
            if let Ok(head) = self.resolve(&RevSpec::Current) {
                starts.push(head);
            }
        }
        Ok(starts)
    }
}

// ============================================================================
// VcsRepository Implementation
// ============================================================================

impl VcsRepository for GitRepository {
    fn create(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError> {
        fs::create_dir_all(path)?;
        let mut inv = ctx.command(Tool::Git).args(["init", "--quiet"]);
        if !working_copy {
            inv = inv.arg("--bare");
        }
        ctx.run_checked(&inv.arg(path))?;
        if !working_copy {
            // Newer git no longer creates it, but probing a bare store needs it.
            fs::create_dir_all(path.join("branches"))?;
        }
        tracing::debug!(path = %path.display(), working_copy, "Created git repository");
        Self::open(path, working_copy, ctx)
    }

    fn open(path: &Path, working_copy: bool, ctx: RepoContext) -> Result<Self, VcsError> {
        let git_dir = if working_copy {
            path.join(".git")
        } else {
            path.to_path_buf()
        };
        if !git_dir.join("HEAD").is_file() {
            return Err(VcsError::unrecognized(path));
        }
        Ok(Self {
            core: RepoCore::new(path, working_copy, ctx),
            git_dir,
        })
    }

    fn clone_from(
        source: &Path,
        dest: &Path,
        working_copy: bool,
        ctx: RepoContext,
    ) -> Result<Self, VcsError> {
        let mut inv = ctx.command(Tool::Git).args(["clone", "--quiet"]);
        if !working_copy {
            inv = inv.arg("--bare");
        }
        ctx.run_checked(&inv.arg(source).arg(dest))?;
        if !working_copy {
            fs::create_dir_all(dest.join("branches"))?;
        }
        Self::open(dest, working_copy, ctx)
    }

    fn path(&self) -> &Path {
        &self.core.path
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Git
    }

    fn is_working_copy(&self) -> bool {
        self.core.working_copy
    }

    fn private_path(&self) -> Result<PathBuf, VcsError> {
        self.core.private_dir(&self.git_dir)
    }

    fn generation(&self) -> Result<Generation, VcsError> {
        Ok(Generation::new()
            .file(self.git_dir.join("HEAD"))?
            .file(self.git_dir.join("packed-refs"))?
            .tree(self.git_dir.join("refs"))?)
    }

    fn cache_stats(&self) -> CacheStats {
        self.core.cache_stats()
    }
}

// ============================================================================
// VcsRefs Implementation
// ============================================================================

impl VcsRefs for GitRepository {
    fn branches(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        Ok(self.refs()?.0)
    }

    fn tags(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        Ok(self.refs()?.1)
    }

    fn heads(&self) -> Result<BTreeMap<String, Revision>, VcsError> {
        self.branches()
    }

    fn canonical_rev(&self, rev: &RevSpec) -> Result<Revision, VcsError> {
        self.resolve(rev).map(Revision::hash)
    }

    fn is_empty(&self) -> Result<bool, VcsError> {
        self.core.cached(self.generation()?, "is-empty", "", || {
            let inv = self.git().args(["rev-list", "-n", "1", "--all"]);
            Ok(self.core.text(&inv)?.trim().is_empty())
        })
    }
}

// ============================================================================
// VcsHistory Implementation
// ============================================================================

impl EntrySource for GitRepository {
    fn load_entry(&self, revision: &Revision) -> Result<LogEntry, VcsError> {
        self.log_entry(&RevSpec::from(revision))
    }
}

impl VcsHistory for GitRepository {
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

        let (branches, tags) = self.refs()?;
        let refs = Arc::new(refs_by_revision([&branches, &tags]));
        let to_rev = |hashes: &[String]| hashes.iter().map(Revision::hash).collect::<Vec<_>>();
        let walk = graph.walk(&to_rev(&starts), &to_rev(&stops), options.first_parent);

        Ok(Log::new(walk, self, filter, options.merges, options.limit, refs))
    }

    fn log_entry(&self, rev: &RevSpec) -> Result<LogEntry, VcsError> {
        let hash = self.resolve(rev)?;
        let mut entry = self.core.cached(self.generation()?, "entry", &hash, || {
            let inv = self
                .git()
                .args(["log", "-1", "-z", LOG_FORMAT])
                .arg(&hash)
                .arg("--");
            let text = self.core.text(&inv)?;
            parse_log(&text, &inv.command_line())?
                .into_iter()
                .next()
                .map(|(entry, _)| entry)
                .ok_or_else(|| VcsError::unknown_revision(&hash))
        })?;
        let (branches, tags) = self.refs()?;
        if let Some(names) = refs_by_revision([&branches, &tags]).remove(&entry.revision) {
            entry.refs = names;
        }
        Ok(entry)
    }

    fn ancestor(&self, a: &RevSpec, b: &RevSpec) -> Result<Option<Revision>, VcsError> {
        let (a, b) = (self.resolve(a)?, self.resolve(b)?);
        let inv = self.git().arg("merge-base").arg(&a).arg(&b);
        let output = self.core.run(&inv)?;
        match output.status {
            Some(0) => Ok(Some(Revision::hash(
                self.core.decode(&output.stdout).trim(),
            ))),
            Some(1) if output.stdout.is_empty() => Ok(None),
            _ => output.check(&inv).map(|_| None),
        }
    }

    fn changes(&self, rev: &RevSpec) -> Result<BTreeMap<String, FileChange>, VcsError> {
        let entry = self.log_entry(rev)?;
        let hash = entry.revision.to_string();
        let parent = entry.parents.first().cloned();
        self.core.cached(self.generation()?, "changes", &hash, || {
            let mut inv = self
                .git()
                .args(["diff-tree", "-r", "-z", "-M", "-C", "--raw", "--no-abbrev", "--no-commit-id"]);
            inv = match &parent {
                Some(parent) => inv.arg(parent.to_string()).arg(&hash),
                None => inv.arg("--root").arg(&hash),
            };
            let text = self.core.text(&inv)?;
            parse_raw_diff(&text, parent.as_ref(), &inv.command_line())
        })
    }

    fn diff(&self, from: &RevSpec, to: &RevSpec, path: Option<&str>) -> Result<Vec<u8>, VcsError> {
        let (from, to) = (self.resolve(from)?, self.resolve(to)?);
        self.unified_diff(&from, &to, path)
    }

    fn patch(&self, rev: &RevSpec) -> Result<Vec<u8>, VcsError> {
        let entry = self.log_entry(rev)?;
        let hash = entry.revision.to_string();
        let parent = entry
            .parents
            .first()
            .map_or_else(|| EMPTY_TREE.to_string(), Revision::to_string);
        self.core.cached(self.generation()?, "patch", &hash, || {
            self.unified_diff(&parent, &hash, None)
        })
    }
}

// ============================================================================
// VcsTree Implementation
// ============================================================================

impl VcsTree for GitRepository {
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
        let raw = self.blob_entry(rev, path, EntryKind::File)?;
        self.blob(&raw.object)
    }

    fn readlink(&self, rev: &RevSpec, path: &str) -> Result<String, VcsError> {
        let raw = self.blob_entry(rev, path, EntryKind::Symlink)?;
        Ok(self.core.decode(&self.blob(&raw.object)?))
    }

    fn export(&self, rev: &RevSpec, dest: &Path) -> Result<(), VcsError> {
        if dest.exists() {
            return Err(VcsError::InvalidPath(dest.to_path_buf()));
        }
        let hash = self.resolve(rev)?;
        fs::create_dir_all(dest)?;
        let archive = self.git().args(["archive", "--format=tar"]).arg(&hash);
        let extract = self
            .core
            .ctx
            .command(Tool::Tar)
            .args(["-x", "-f", "-", "-C"])
            .arg(dest);
        self.core.pipe(&archive, &extract)
    }
}

impl VcsBackend for GitRepository {}

// ============================================================================
// Output parsing
// ============================================================================

/// One `ls-tree -l` record
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawEntry {
    mode: String,
    object: String,
    size: Option<u64>,
    path: String,
}

impl RawEntry {
    fn kind(&self) -> EntryKind {
        kind_from_mode(&self.mode)
    }
}

fn kind_from_mode(mode: &str) -> EntryKind {
    match mode {
        "040000" => EntryKind::Directory,
        "120000" => EntryKind::Symlink,
        "160000" => EntryKind::Submodule,
        _ => EntryKind::File,
    }
}

fn parse_refs(text: &str) -> Result<RefMaps, VcsError> {
    let mut branches = BTreeMap::new();
    let mut tags = BTreeMap::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
        let mut fields = line.split('\0');
        let (Some(name), Some(object)) = (fields.next(), fields.next()) else {
            return Err(VcsError::parse("git for-each-ref", line));
        };
        let peeled = fields.next().filter(|p| !p.is_empty());
        if let Some(branch) = name.strip_prefix("refs/heads/") {
            branches.insert(branch.to_string(), Revision::hash(object));
        } else if let Some(tag) = name.strip_prefix("refs/tags/") {
            tags.insert(tag.to_string(), Revision::hash(peeled.unwrap_or(object)));
        }
    }
    Ok((branches, tags))
}

/// Parse `git log -z` output in [`LOG_FORMAT`]; returns entries with their
/// commit timestamps
fn parse_log(text: &str, command: &str) -> Result<Vec<(LogEntry, i64)>, VcsError> {
    let fields: Vec<&str> = text.split('\0').collect();
    let mut out = Vec::new();
    for record in fields.chunks(LOG_FIELDS) {
        let &[hash, parents, author_time, commit_time, author, body] = record else {
            if record.iter().all(|f| f.is_empty()) {
                break;
            }
            return Err(VcsError::parse(command, format!("truncated record {record:?}")));
        };
        let seconds = |s: &str| {
            s.parse::<i64>()
                .map_err(|_| VcsError::parse(command, format!("bad timestamp {s:?}")))
        };
        let date = DateTime::from_timestamp(seconds(author_time)?, 0)
            .ok_or_else(|| VcsError::parse(command, format!("timestamp out of range {author_time}")))?;
        let entry = LogEntry {
            revision: Revision::hash(hash),
            parents: parents.split_whitespace().map(Revision::hash).collect(),
            author: author.to_string(),
            date,
            message: body.trim_end_matches('\n').to_string(),
            refs: Vec::new(),
        };
        out.push((entry, seconds(commit_time)?));
    }
    Ok(out)
}

fn parse_ls_tree(text: &str, command: &str) -> Result<Vec<RawEntry>, VcsError> {
    text.split('\0')
        .filter(|record| !record.is_empty())
        .map(|record| {
            let (meta, path) = record
                .split_once('\t')
                .ok_or_else(|| VcsError::parse(command, record))?;
            let parts: Vec<&str> = meta.split_whitespace().collect();
            let [mode, _otype, object, size] = parts.as_slice() else {
                return Err(VcsError::parse(command, record));
            };
            Ok(RawEntry {
                mode: mode.to_string(),
                object: object.to_string(),
                size: size.parse().ok(),
                path: path.to_string(),
            })
        })
        .collect()
}

fn parse_raw_diff(
    text: &str,
    parent: Option<&Revision>,
    command: &str,
) -> Result<BTreeMap<String, FileChange>, VcsError> {
    let mut changes = BTreeMap::new();
    let mut tokens = text.split('\0').filter(|t| !t.is_empty());
    while let Some(meta) = tokens.next() {
        let parts: Vec<&str> = meta.trim_start_matches(':').split_whitespace().collect();
        let [old_mode, new_mode, _old_id, _new_id, status] = parts.as_slice() else {
            return Err(VcsError::parse(command, meta));
        };
        let path = tokens
            .next()
            .ok_or_else(|| VcsError::parse(command, format!("missing path after {meta}")))?;
        let old_kind = kind_from_mode(old_mode);
        let new_kind = kind_from_mode(new_mode);
        match status.chars().next() {
            Some('A') => {
                changes.insert(path.to_string(), FileChange::new(ChangeStatus::Added, new_kind));
            }
            Some('D') => {
                changes.insert(path.to_string(), FileChange::new(ChangeStatus::Removed, old_kind));
            }
            Some('M') | Some('T') => {
                changes.insert(
                    path.to_string(),
                    FileChange::new(ChangeStatus::Modified, new_kind),
                );
            }
            Some(code @ ('R' | 'C')) => {
                let dest = tokens
                    .next()
                    .ok_or_else(|| VcsError::parse(command, format!("missing target after {meta}")))?;
                changes.insert(
                    dest.to_string(),
                    FileChange {
                        status: ChangeStatus::Added,
                        kind: new_kind,
                        copied_from: Some(CopySource {
                            path: path.to_string(),
                            revision: parent.cloned(),
                        }),
                    },
                );
                if code == 'R' {
                    changes.insert(path.to_string(), FileChange::new(ChangeStatus::Removed, old_kind));
                }
            }
            _ => tracing::warn!(status, path, "Skipping unsupported git change status"),
        }
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use crate::config::VcsConfig;
    use tempfile::TempDir;

    const H1: &str = "1111111111111111111111111111111111111111";
    const H2: &str = "2222222222222222222222222222222222222222";
    const H3: &str = "3333333333333333333333333333333333333333";

    fn bare_repo(runner: ScriptedRunner) -> (TempDir, GitRepository, Arc<ScriptedRunner>) {
        let root = TempDir::new().unwrap();
        for dir in ["objects", "refs/heads", "refs/tags", "branches"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        fs::write(root.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        let runner = Arc::new(runner);
        let ctx = RepoContext::new(runner.clone(), VcsConfig::default());
        let repo = GitRepository::open(root.path(), false, ctx).unwrap();
        (root, repo, runner)
    }

    #[test]
    fn test_open_requires_head() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("db")).unwrap();
        let ctx = RepoContext::new(Arc::new(ScriptedRunner::new()), VcsConfig::default());
        assert!(matches!(
            GitRepository::open(root.path(), false, ctx.clone()),
            Err(VcsError::UnrecognizedRepositoryType(_))
        ));
        assert!(matches!(
            GitRepository::open(root.path(), true, ctx),
            Err(VcsError::UnrecognizedRepositoryType(_))
        ));
    }

    #[test]
    fn test_parse_refs_peels_annotated_tags() {
        let text = format!(
            "refs/heads/main\0{H1}\0\nrefs/tags/light\0{H2}\0\nrefs/tags/v1\0{H3}\0{H1}\n"
        );
        let (branches, tags) = parse_refs(&text).unwrap();
        assert_eq!(branches, BTreeMap::from([("main".into(), Revision::hash(H1))]));
        assert_eq!(tags.get("light"), Some(&Revision::hash(H2)));
        assert_eq!(tags.get("v1"), Some(&Revision::hash(H1)));
    }

    #[test]
    fn test_parse_log_records() {
        let text = format!(
            "{H2}\0{H1}\0100\0110\0Test User <test@example.com>\0second\n\nbody\n\0\
             {H1}\0\090\091\0Test User <test@example.com>\0first\n\0"
        );
        let entries = parse_log(&text, "git log").unwrap();
        assert_eq!(entries.len(), 2);
        let (second, commit_time) = &entries[0];
        assert_eq!(second.revision, Revision::hash(H2));
        assert_eq!(second.parents, vec![Revision::hash(H1)]);
        assert_eq!(second.date.timestamp(), 100);
        assert_eq!(*commit_time, 110);
        assert_eq!(second.message, "second\n\nbody");
        assert!(entries[1].0.parents.is_empty());
    }

    #[test]
    fn test_parse_log_rejects_truncated_output() {
        let text = format!("{H1}\0\0100");
        assert!(matches!(parse_log(&text, "git log"), Err(VcsError::Parse { .. })));
    }

    #[test]
    fn test_parse_ls_tree() {
        let text = "100644 blob aaaa       6\ta\0120000 blob bbbb       1\tb\0\
                    040000 tree cccc       -\tc\0160000 commit dddd       -\tvendor/lib\0";
        let entries = parse_ls_tree(text, "git ls-tree").unwrap();
        let kinds: Vec<EntryKind> = entries.iter().map(RawEntry::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntryKind::File,
                EntryKind::Symlink,
                EntryKind::Directory,
                EntryKind::Submodule
            ]
        );
        assert_eq!(entries[0].size, Some(6));
        assert_eq!(entries[2].size, None);
        assert_eq!(entries[3].path, "vendor/lib");
    }

    #[test]
    fn test_parse_raw_diff_rename() {
        let text = ":100644 100644 aaaa bbbb R090\0old.txt\0new.txt\0\
                    :000000 100755 0000 cccc A\0run.sh\0\
                    :120000 000000 dddd 0000 D\0link\0";
        let parent = Revision::hash(H1);
        let changes = parse_raw_diff(text, Some(&parent), "git diff-tree").unwrap();
        assert_eq!(changes["old.txt"].status, ChangeStatus::Removed);
        let renamed = &changes["new.txt"];
        assert_eq!(renamed.status, ChangeStatus::Added);
        assert_eq!(
            renamed.copied_from,
            Some(CopySource {
                path: "old.txt".into(),
                revision: Some(parent.clone())
            })
        );
        assert_eq!(changes["run.sh"].kind, EntryKind::File);
        assert_eq!(changes["link"].kind, EntryKind::Symlink);
        assert_eq!(changes["link"].status, ChangeStatus::Removed);
    }

    #[test]
    fn test_current_rejected_on_bare_repository() {
        let (_root, repo, _) = bare_repo(ScriptedRunner::new());
        assert!(matches!(
            repo.canonical_rev(&RevSpec::Current),
            Err(VcsError::UnknownRevision(_))
        ));
    }

    #[test]
    fn test_unknown_revision() {
        let runner = ScriptedRunner::new().fail("rev-parse --verify --quiet", 1, "");
        let (_root, repo, _) = bare_repo(runner);
        assert!(matches!(
            repo.canonical_rev(&RevSpec::named("nope")),
            Err(VcsError::UnknownRevision(_))
        ));
        assert!(!repo.contains(&RevSpec::named("nope")).unwrap());
    }

    #[test]
    fn test_option_like_names_never_reach_git() {
        let (_root, repo, runner) = bare_repo(ScriptedRunner::new());
        assert!(repo.canonical_rev(&RevSpec::named("--all")).is_err());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_branches_are_cached_until_refs_move() {
        let runner = ScriptedRunner::new().ok(
            "for-each-ref",
            format!("refs/heads/main\0{H1}\0\n"),
        );
        let (root, repo, runner) = bare_repo(runner);
        fs::write(root.path().join("refs/heads/main"), format!("{H1}\n")).unwrap();

        assert_eq!(repo.branches().unwrap().len(), 1);
        assert_eq!(repo.branches().unwrap().len(), 1);
        assert_eq!(runner.call_count("for-each-ref"), 1);

        fs::write(root.path().join("refs/heads/main"), format!("{H2}\n")).unwrap();
        repo.branches().unwrap();
        assert_eq!(runner.call_count("for-each-ref"), 2);
    }

    #[test]
    fn test_ancestor_none_for_unrelated() {
        let runner = ScriptedRunner::new()
            .ok(&format!("rev-parse --verify --quiet {H1}"), format!("{H1}\n"))
            .ok(&format!("rev-parse --verify --quiet {H2}"), format!("{H2}\n"))
            .fail("merge-base", 1, "");
        let (_root, repo, _) = bare_repo(runner);
        let found = repo
            .ancestor(&RevSpec::named(H1), &RevSpec::named(H2))
            .unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_log_of_empty_repository() {
        let runner = ScriptedRunner::new().ok("for-each-ref", "");
        let (_root, repo, _) = bare_repo(runner);
        assert_eq!(repo.log(&LogOptions::default()).unwrap().count(), 0);
    }

    #[test]
    fn test_ls_file_is_not_a_directory() {
        let runner = ScriptedRunner::new()
            .ok("rev-parse --verify --quiet main", format!("{H1}\n"))
            .ok("ls-tree -z -l", "100644 blob aaaa       6\ta\0");
        let (_root, repo, _) = bare_repo(runner);
        let main = RevSpec::named("main");
        assert!(matches!(
            repo.ls(&main, "a", &LsOptions::default()),
            Err(VcsError::NotADirectory { .. })
        ));
        assert!(matches!(
            repo.ls(&main, "a/", &LsOptions::entry()),
            Err(VcsError::PathNotFound { .. })
        ));
        let entry = repo.ls(&main, "/a", &LsOptions::entry()).unwrap();
        assert_eq!(entry[0].kind, EntryKind::File);
        assert_eq!(entry[0].name, "");
        assert!(matches!(
            repo.readlink(&main, "a"),
            Err(VcsError::NotASymlink { .. })
        ));
        assert!(matches!(repo.cat(&main, "/"), Err(VcsError::NotAFile { .. })));
    }

    #[test]
    fn test_export_refuses_existing_destination() {
        let (root, repo, _) = bare_repo(ScriptedRunner::new());
        let err = repo.export(&RevSpec::named("main"), root.path()).unwrap_err();
        assert!(matches!(err, VcsError::InvalidPath(_)));
    }

    #[test]
    fn test_patch_of_root_commit_diffs_against_empty_tree() {
        let runner = ScriptedRunner::new()
            .ok("rev-parse --verify --quiet main", format!("{H1}\n"))
            .ok("log -1 -z", format!("{H1}\0\090\091\0Test User <test@example.com>\0first\n\0"))
            .ok("for-each-ref", "")
            .ok("diff --no-color", "diff --git a/a b/a\n");
        let (_root, repo, runner) = bare_repo(runner);
        let patch = repo.patch(&RevSpec::named("main")).unwrap();
        assert_eq!(patch, b"diff --git a/a b/a\n");
        repo.patch(&RevSpec::named("main")).unwrap();
        assert_eq!(runner.call_count(&format!("{EMPTY_TREE} {H1}")), 1);
    }

    #[test]
    fn test_unsupported_operations() {
        let (_root, repo, runner) = bare_repo(ScriptedRunner::new());
        let main = RevSpec::named("main");
        assert!(matches!(repo.blame(&main, "a"), Err(VcsError::Unsupported { .. })));
        assert!(matches!(repo.proplist(&main, None), Err(VcsError::Unsupported { .. })));
        assert!(matches!(
            repo.propget("svn:eol-style", &main, Some("a")),
            Err(VcsError::Unsupported { .. })
        ));
        assert!(runner.calls().is_empty());
    }
}

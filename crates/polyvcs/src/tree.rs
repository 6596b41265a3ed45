//! Uniform tree entries on top of the native listings.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::VcsError;
use crate::traits::VcsTree;
use crate::types::{
    ChangeStatus, EntryKind, FileChange, LsOptions, LsReport, RevSpec, TreeChange, TreeEntry,
};

/// Normalize a caller-supplied repository path.
///
/// Leading and repeated slashes are dropped. The flag reports whether the
/// caller ended the path with a slash, which demands a directory.
pub fn clean_path(path: &str) -> (String, bool) {
    let force_dir = path.ends_with('/') && !path.trim_matches('/').is_empty();
    let cleaned = path
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    (cleaned, force_dir)
}

/// Join a directory and a child name into a repository path
pub fn join_path(dir: &str, name: &str) -> String {
    match (dir.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => dir.to_string(),
        _ => format!("{dir}/{name}"),
    }
}

/// Path of `full` relative to the listed directory `base`
pub fn relative_name(base: &str, full: &str) -> String {
    if base.is_empty() {
        return full.to_string();
    }
    full.strip_prefix(base)
        .map(|rest| rest.trim_start_matches('/').to_string())
        .unwrap_or_else(|| full.to_string())
}

/// Collapse duplicates and surface kind conflicts.
///
/// Synthesized directory entries are deduplicated. When one path is
/// reported both as a directory and as something else, both entries are
/// kept and flagged `mismatched`; nothing is dropped or coerced.
pub fn normalize(entries: Vec<TreeEntry>) -> Vec<TreeEntry> {
    let mut by_path: BTreeMap<String, Vec<TreeEntry>> = BTreeMap::new();
    for entry in entries {
        let slot = by_path.entry(entry.path.clone()).or_default();
        if slot.iter().any(|e| e.kind == entry.kind) {
            continue;
        }
        slot.push(entry);
    }

    let mut out = Vec::new();
    for (path, mut group) in by_path {
        let has_dir = group.iter().any(TreeEntry::is_dir);
        let has_other = group.iter().any(|e| !e.is_dir());
        if has_dir && has_other {
            tracing::warn!(path = %path, "Path is both a directory and a non-directory");
            for entry in &mut group {
                entry.mismatched = true;
            }
        }
        group.sort_by_key(|e| e.kind);
        out.extend(group);
    }
    out
}

/// Fill `copied_from` on entries that `changes` records as copies
pub fn attach_copies(entries: &mut [TreeEntry], changes: &BTreeMap<String, FileChange>) {
    for entry in entries {
        if let Some(change) = changes.get(&entry.path) {
            entry.copied_from = change.copied_from.clone();
        }
    }
}

/// Compare two recursive listings.
///
/// Entries are matched by `(path, kind)`. Non-directory entries present on
/// both sides are compared by `object_id` when both carry one and through
/// `same_content` otherwise.
pub fn compare<F>(
    old: &[TreeEntry],
    new: &[TreeEntry],
    mut same_content: F,
) -> Result<Vec<TreeChange>, VcsError>
where
    F: FnMut(&TreeEntry, &TreeEntry) -> Result<bool, VcsError>,
{
    let index = |entries: &[TreeEntry]| -> BTreeMap<(String, EntryKind), TreeEntry> {
        entries
            .iter()
            .map(|e| ((e.path.clone(), e.kind), e.clone()))
            .collect()
    };
    let old_index = index(old);
    let new_index = index(new);
    let keys: BTreeSet<&(String, EntryKind)> = old_index.keys().chain(new_index.keys()).collect();

    let mut changes = Vec::new();
    for key in keys {
        let (path, kind) = key;
        let change = match (old_index.get(key), new_index.get(key)) {
            (Some(_), None) => Some(ChangeStatus::Removed),
            (None, Some(_)) => Some(ChangeStatus::Added),
            (Some(_), Some(_)) if *kind == EntryKind::Directory => None,
            (Some(a), Some(b)) => {
                let same = match (&a.object_id, &b.object_id) {
                    (Some(x), Some(y)) => x == y,
                    _ => same_content(a, b)?,
                };
                (!same).then_some(ChangeStatus::Modified)
            }
            (None, None) => None,
        };
        if let Some(status) = change {
            changes.push(TreeChange {
                path: path.clone(),
                status,
                kind: *kind,
            });
        }
    }
    changes.sort_by(|a, b| {
        a.path
            .cmp(&b.path)
            .then_with(|| status_rank(a.status).cmp(&status_rank(b.status)))
            .then_with(|| a.kind.cmp(&b.kind))
    });
    Ok(changes)
}

fn status_rank(status: ChangeStatus) -> u8 {
    match status {
        ChangeStatus::Removed => 0,
        ChangeStatus::Modified => 1,
        ChangeStatus::Added => 2,
    }
}

/// Materialize a tree by walking a recursive listing.
///
/// Used by backends without a native archive command.
pub fn export_tree<R>(repo: &R, rev: &RevSpec, dest: &Path) -> Result<(), VcsError>
where
    R: VcsTree + ?Sized,
{
    if dest.exists() {
        return Err(VcsError::InvalidPath(dest.to_path_buf()));
    }
    let listing = LsOptions::recursive_with_dirs().with_report(LsReport {
        executable: true,
        ..LsReport::default()
    });
    let entries = repo.ls(rev, "", &listing)?;
    fs::create_dir_all(dest)?;

    for entry in entries {
        let target = dest.join(&entry.path);
        match entry.kind {
            EntryKind::Directory | EntryKind::Submodule => fs::create_dir_all(&target)?,
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, repo.cat(rev, &entry.path)?)?;
                if entry.executable == Some(true) {
                    set_executable(&target)?;
                }
            }
            EntryKind::Symlink => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let link = repo.readlink(rev, &entry.path)?;
                make_symlink(&link, &target)?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(link: &str, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn make_symlink(link: &str, target: &Path) -> std::io::Result<()> {
    fs::write(target, link)
}

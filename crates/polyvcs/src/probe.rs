//! Repository type detection from directory shape.
//!
//! Detection is a pure filesystem inspection: no native tool is run, so it
//! works on hosts where the backend is not installed.

use std::path::Path;

use crate::error::VcsError;
use crate::types::BackendKind;

/// One marker rule: all listed files and directories must exist directly
/// under the probed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRule {
    pub kind: BackendKind,
    /// `None` when the markers cannot tell a working copy from a store
    pub working_copy: Option<bool>,
    pub files: &'static [&'static str],
    pub dirs: &'static [&'static str],
}

impl ProbeRule {
    pub fn matches(&self, path: &Path) -> bool {
        self.files.iter().all(|f| path.join(f).is_file())
            && self.dirs.iter().all(|d| path.join(d).is_dir())
    }
}

/// Rules in evaluation order; the first match wins.
pub const PROBE_RULES: &[ProbeRule] = &[
    ProbeRule {
        kind: BackendKind::Git,
        working_copy: Some(true),
        files: &[],
        dirs: &[".git"],
    },
    ProbeRule {
        kind: BackendKind::Hg,
        working_copy: None,
        files: &[],
        dirs: &[".hg"],
    },
    ProbeRule {
        kind: BackendKind::Git,
        working_copy: Some(false),
        files: &["config"],
        dirs: &["objects", "refs", "branches"],
    },
    ProbeRule {
        kind: BackendKind::Svn,
        working_copy: Some(false),
        files: &["format"],
        dirs: &["conf", "db", "locks"],
    },
];

/// Guess the backend and working-copy flag of `path`
pub fn probe(path: &Path) -> Result<(BackendKind, Option<bool>), VcsError> {
    probe_with(PROBE_RULES, path)
}

pub fn probe_with(
    rules: &[ProbeRule],
    path: &Path,
) -> Result<(BackendKind, Option<bool>), VcsError> {
    let rule = rules
        .iter()
        .find(|rule| rule.matches(path))
        .ok_or_else(|| VcsError::unrecognized(path))?;
    tracing::debug!(
        path = %path.display(),
        kind = %rule.kind,
        working_copy = ?rule.working_copy,
        "Probed repository"
    );
    Ok((rule.kind, rule.working_copy))
}

/// Fill in whichever of `kind` and `working_copy` the caller left out.
///
/// Both given: used verbatim without touching the filesystem. Otherwise the
/// path is probed; an inconclusive working-copy probe falls back to `assume`.
pub fn resolve_guess(
    path: &Path,
    kind: Option<BackendKind>,
    working_copy: Option<bool>,
    assume: bool,
) -> Result<(BackendKind, bool), VcsError> {
    if let (Some(kind), Some(working_copy)) = (kind, working_copy) {
        return Ok((kind, working_copy));
    }

    let (kind_guess, wc_guess) = probe(path)?;
    let kind = kind.unwrap_or(kind_guess);
    let working_copy = working_copy.or(wc_guess).unwrap_or(assume);
    Ok((kind, working_copy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout(files: &[&str], dirs: &[&str]) -> TempDir {
        let root = TempDir::new().unwrap();
        for d in dirs {
            fs::create_dir_all(root.path().join(d)).unwrap();
        }
        for f in files {
            fs::write(root.path().join(f), b"").unwrap();
        }
        root
    }

    #[test]
    fn test_git_working_copy() {
        let root = layout(&[], &[".git"]);
        assert_eq!(probe(root.path()).unwrap(), (BackendKind::Git, Some(true)));
    }

    #[test]
    fn test_git_bare() {
        let root = layout(&["config"], &["objects", "refs", "branches"]);
        assert_eq!(probe(root.path()).unwrap(), (BackendKind::Git, Some(false)));
    }

    #[test]
    fn test_git_bare_requires_branches_dir() {
        let root = layout(&["config"], &["objects", "refs"]);
        assert!(matches!(
            probe(root.path()),
            Err(VcsError::UnrecognizedRepositoryType(_))
        ));
    }

    #[test]
    fn test_hg_is_ambiguous() {
        let root = layout(&[], &[".hg"]);
        assert_eq!(probe(root.path()).unwrap(), (BackendKind::Hg, None));
    }

    #[test]
    fn test_svn_store() {
        let root = layout(&["format"], &["conf", "db", "locks"]);
        assert_eq!(probe(root.path()).unwrap(), (BackendKind::Svn, Some(false)));
    }

    #[test]
    fn test_marker_file_must_be_a_file() {
        let root = layout(&[], &["format", "conf", "db", "locks"]);
        assert!(probe(root.path()).is_err());
    }

    #[test]
    fn test_rule_order_prefers_dot_git() {
        let root = layout(&["config"], &[".git", ".hg", "objects", "refs", "branches"]);
        assert_eq!(probe(root.path()).unwrap(), (BackendKind::Git, Some(true)));
    }

    #[test]
    fn test_unrecognized_names_path() {
        let root = layout(&[], &["src"]);
        match probe(root.path()) {
            Err(VcsError::UnrecognizedRepositoryType(p)) => {
                assert_eq!(p, root.path().display().to_string())
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_guess_both_given_skips_probe() {
        let missing = Path::new("/nonexistent/polyvcs/probe");
        assert_eq!(
            resolve_guess(missing, Some(BackendKind::Svn), Some(false), true).unwrap(),
            (BackendKind::Svn, false)
        );
    }

    #[test]
    fn test_resolve_guess_uses_assume_when_inconclusive() {
        let root = layout(&[], &[".hg"]);
        assert_eq!(
            resolve_guess(root.path(), None, None, true).unwrap(),
            (BackendKind::Hg, true)
        );
        assert_eq!(
            resolve_guess(root.path(), None, None, false).unwrap(),
            (BackendKind::Hg, false)
        );
    }

    #[test]
    fn test_resolve_guess_probe_beats_assume() {
        let root = layout(&[], &[".git"]);
        assert_eq!(
            resolve_guess(root.path(), None, None, false).unwrap(),
            (BackendKind::Git, true)
        );
    }

    #[test]
    fn test_resolve_guess_keeps_caller_kind() {
        let root = layout(&[], &[".hg"]);
        assert_eq!(
            resolve_guess(root.path(), Some(BackendKind::Git), None, false).unwrap(),
            (BackendKind::Git, false)
        );
    }
}

//! Helpers for locating external executables.

use std::path::{Path, PathBuf};

/// Resolve `program` to an absolute path.
///
/// Names containing a path separator are returned unchanged when they point
/// at an existing file; bare names are searched on `PATH`.
pub fn resolve_executable_path_blocking(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    which::which(program).ok()
}

/// Whether `program` can be found at all.
pub fn is_executable_available(program: &str) -> bool {
    resolve_executable_path_blocking(program).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_none() {
        assert!(resolve_executable_path_blocking("definitely-not-a-real-tool-4213").is_none());
    }

    #[test]
    fn test_explicit_missing_path_is_none() {
        assert!(resolve_executable_path_blocking("/nonexistent/dir/git").is_none());
    }
}

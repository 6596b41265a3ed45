use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during repository operations
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Unrecognized repository type: {0}")]
    UnrecognizedRepositoryType(String),

    #[error("Invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("Path not found: {path} at revision {rev}")]
    PathNotFound { rev: String, path: String },

    #[error("Not a directory: {path} at revision {rev}")]
    NotADirectory { rev: String, path: String },

    #[error("Not a file: {path} at revision {rev}")]
    NotAFile { rev: String, path: String },

    #[error("Not a symbolic link: {path} at revision {rev}")]
    NotASymlink { rev: String, path: String },

    #[error("Command `{command}` failed ({}): {stderr}", exit_code_label(.code))]
    BackendCommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported { backend: String, operation: String },

    #[error("Backend disabled at compile time: {0}")]
    BackendDisabled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "not started".to_string(),
    }
}

impl VcsError {
    /// Create an UnrecognizedRepositoryType error from a path
    pub fn unrecognized(path: &Path) -> Self {
        Self::UnrecognizedRepositoryType(path.display().to_string())
    }

    pub fn unknown_revision(spec: impl std::fmt::Display) -> Self {
        Self::UnknownRevision(spec.to_string())
    }

    pub fn path_not_found(rev: impl std::fmt::Display, path: &str) -> Self {
        Self::PathNotFound {
            rev: rev.to_string(),
            path: path.to_string(),
        }
    }

    pub fn not_a_directory(rev: impl std::fmt::Display, path: &str) -> Self {
        Self::NotADirectory {
            rev: rev.to_string(),
            path: path.to_string(),
        }
    }

    pub fn not_a_file(rev: impl std::fmt::Display, path: &str) -> Self {
        Self::NotAFile {
            rev: rev.to_string(),
            path: path.to_string(),
        }
    }

    pub fn not_a_symlink(rev: impl std::fmt::Display, path: &str) -> Self {
        Self::NotASymlink {
            rev: rev.to_string(),
            path: path.to_string(),
        }
    }

    pub fn parse(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            detail: detail.into(),
        }
    }

    pub fn unsupported(backend: impl std::fmt::Display, operation: &str) -> Self {
        Self::Unsupported {
            backend: backend.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Exit code of a failed native command, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::BackendCommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

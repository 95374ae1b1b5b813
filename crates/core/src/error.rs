use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupWatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate user '{username}' found as both {first} and {second} user")]
    DuplicateUser {
        username: String,
        first: String,
        second: String,
    },

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("History error: {0}")]
    History(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, BackupWatchError>;

/// Why a directory could not be inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanFailureKind {
    PermissionDenied,
    Io(String),
}

/// A non-fatal failure to read one user's backup tree or one rule's home
/// directories. Never confused with "no files".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub kind: ScanFailureKind,
}

impl ScanFailure {
    /// Stat `dir` and classify the answer: `Ok(false)` only when nothing
    /// exists there, `Err` when it cannot be told or is not a directory.
    pub fn check_dir(dir: &std::path::Path) -> std::result::Result<bool, ScanFailure> {
        match std::fs::metadata(dir) {
            Ok(metadata) if metadata.is_dir() => Ok(true),
            Ok(_) => Err(Self {
                path: dir.to_path_buf(),
                kind: ScanFailureKind::Io("not a directory".to_string()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::from_io(dir.to_path_buf(), &e)),
        }
    }

    pub fn from_io(path: PathBuf, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ScanFailureKind::PermissionDenied,
            _ => ScanFailureKind::Io(err.to_string()),
        };
        Self { path, kind }
    }

    pub fn from_walkdir(fallback: &std::path::Path, err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| fallback.to_path_buf());
        match err.io_error() {
            Some(io) => Self::from_io(path, io),
            None => Self {
                path,
                kind: ScanFailureKind::Io(err.to_string()),
            },
        }
    }
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ScanFailureKind::PermissionDenied => {
                write!(f, "permission denied: '{}'", self.path.display())
            }
            ScanFailureKind::Io(reason) => {
                write!(f, "cannot read '{}': {}", self.path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ScanFailure {}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("No email address known for user '{0}'")]
    MissingAddress(String),
}

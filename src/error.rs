//! Per-subsystem error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no servers configured: at least one classic or dynamic server is required")]
    NoServers,

    #[error("server tag {tag:?} is invalid: must be 1-64 chars of [A-Za-z0-9_.-]")]
    InvalidTag { tag: String },

    #[error("duplicate server tag {tag:?}")]
    DuplicateTag { tag: String },

    #[error("invalid delay-before-rewatch: {0}")]
    InvalidDelay(String),

    #[error("server {tag:?}: log file {path:?} does not exist or is not a file")]
    MissingLogFile { tag: String, path: PathBuf },

    #[error("server {tag:?}: archived-logs-dir-path {path:?} is not a directory")]
    MissingArchiveDir { tag: String, path: PathBuf },

    #[error("server {tag:?}: archives-enabled requires archived-logs-filename-format")]
    MissingArchiveFormat { tag: String },

    #[error("server {tag:?}: invalid log-file-pattern {pattern:?}: {source}")]
    InvalidPattern {
        tag: String,
        pattern: String,
        source: glob::PatternError,
    },

    #[error("server {tag:?}: invalid instance-identifier regex: {source}")]
    InvalidInstanceRegex {
        tag: String,
        source: regex::Error,
    },

    #[error("server {tag:?}: instance-identifier must contain a named capture group `id`")]
    MissingIdGroup { tag: String },
}

#[derive(Error, Debug)]
pub enum TailerError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to install watcher on {path}: {source}")]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archives are not enabled for this server")]
    NotEnabled,

    #[error("failed to list archive directory {path}: {source}")]
    ListDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid archive glob {pattern:?}: {source}")]
    Glob {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("archive {path} not found")]
    NotFound { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

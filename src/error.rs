// src/error.rs

//! Error types for source acquisition and tree installation
//!
//! Every variant names the unit that failed (checksum, key, mount point,
//! commit) so an operator can tell a bad checksum from a bad signature from
//! a transaction conflict without reading tool output first.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure class, used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Options,
    Resolution,
    Trust,
    Transfer,
    Environment,
    Transaction,
    Io,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "options",
            Self::Resolution => "resolution",
            Self::Trust => "trust",
            Self::Transfer => "transfer",
            Self::Environment => "environment",
            Self::Transaction => "transaction",
            Self::Io => "io",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("I/O error at {path}: {source}")]
    IoAt { path: PathBuf, source: io::Error },

    #[error("Invalid checksum '{checksum}': {reason}")]
    InvalidChecksum { checksum: String, reason: String },

    #[error("Invalid stage options: {0}")]
    InvalidOptions(String),

    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Failed to run '{tool}': {source}. Is it installed?")]
    ToolSpawn { tool: String, source: io::Error },

    #[error("Checksums not available from source '{source_type}': {}", .missing.join(", "))]
    ChecksumNotFound {
        source_type: String,
        missing: Vec<String>,
    },

    #[error("Content of {path} does not match {expected} (got {actual})")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to import GPG key #{index} into {scope}: {stderr}")]
    KeyImport {
        index: usize,
        scope: String,
        stderr: String,
    },

    #[error("GPG signature verification failed for package {checksum}: {stderr}")]
    SignatureInvalid { checksum: String, stderr: String },

    #[error("Failed to extract archive {checksum} (exit code {code}): {stderr}")]
    Extraction {
        checksum: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to copy '{from}' to '{to}': {stderr}")]
    Copy {
        from: String,
        to: String,
        stderr: String,
    },

    #[error("Failed to {action} {mount_point}: {reason}")]
    Mount {
        action: &'static str,
        mount_point: PathBuf,
        reason: String,
    },

    #[error("Failed to prepare {path}: {reason}")]
    Shim { path: PathBuf, reason: String },

    #[error("RPM transaction failed (exit code {code}): {stderr}")]
    Transaction { code: i32, stderr: String },

    #[error("Failed to query package database in {tree}: {reason}")]
    PackageQuery { tree: PathBuf, reason: String },

    #[error("OSTree {step} failed for commit {commit}: {stderr}")]
    Pull {
        step: &'static str,
        commit: String,
        stderr: String,
    },

    #[error("OSTree repository setup failed for {repo}: {stderr}")]
    Repository { repo: PathBuf, stderr: String },
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn io_at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Classify this error into the reporting taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidChecksum { .. } | Self::InvalidOptions(_) | Self::PathTraversal(_) => {
                ErrorCategory::Options
            }
            Self::ChecksumNotFound { .. } | Self::ChecksumMismatch { .. } => {
                ErrorCategory::Resolution
            }
            Self::KeyImport { .. } | Self::SignatureInvalid { .. } => ErrorCategory::Trust,
            Self::Extraction { .. }
            | Self::Copy { .. }
            | Self::Pull { .. }
            | Self::Repository { .. } => ErrorCategory::Transfer,
            Self::Mount { .. } | Self::Shim { .. } => ErrorCategory::Environment,
            Self::Transaction { .. } | Self::PackageQuery { .. } => ErrorCategory::Transaction,
            Self::Io(_) | Self::IoAt { .. } | Self::ToolSpawn { .. } => ErrorCategory::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_checksums_are_listed() {
        let err = Error::ChecksumNotFound {
            source_type: "org.osbuild.files".to_string(),
            missing: vec!["sha256:aa".to_string(), "sha256:bb".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("org.osbuild.files"));
        assert!(msg.contains("sha256:aa, sha256:bb"));
        assert_eq!(err.category(), ErrorCategory::Resolution);
    }

    #[test]
    fn test_categories_are_distinct_per_step() {
        let sig = Error::SignatureInvalid {
            checksum: "sha256:aa".to_string(),
            stderr: "NOT OK".to_string(),
        };
        let tx = Error::Transaction {
            code: 1,
            stderr: "conflict".to_string(),
        };
        let mount = Error::Mount {
            action: "bind-mount",
            mount_point: PathBuf::from("/tree/proc"),
            reason: "EPERM".to_string(),
        };
        assert_eq!(sig.category(), ErrorCategory::Trust);
        assert_eq!(tx.category(), ErrorCategory::Transaction);
        assert_eq!(mount.category(), ErrorCategory::Environment);
        assert!(mount.to_string().contains("/tree/proc"));
    }
}

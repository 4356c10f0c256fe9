//! # Error Types
//!
//! Failure signals for the library surface. Input timeouts and staircase
//! non-convergence are not errors: they are ordinary outcomes handled by
//! the staircase itself. What remains are caller precondition violations,
//! configuration problems and collaborator failures.

use std::path::PathBuf;
use thiserror::Error;

/// Precondition violations on the test sequencer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("test unit {0} is not part of the current sequence")]
    UnknownUnit(usize),
    #[error("test unit {0} was already marked completed")]
    AlreadyCompleted(usize),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures while driving an assessment session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error("tone presentation failed: {0:#}")]
    Presenter(anyhow::Error),
}

/// Failures while saving or loading a report bundle.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("report JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

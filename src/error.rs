//! Error taxonomy for indexing and querying.
//!
//! Per-file indexing failures are data, not panics: they travel inside
//! [`IndexResult`](crate::model::IndexResult) and never abort a batch. Only
//! contract violations (malformed queries, invalid roots) surface as `Err`.

use std::path::PathBuf;
use thiserror::Error;

/// Why indexing a single file failed. Carried in the per-file result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexErrorKind {
    #[error("file exceeds size limit ({size} > {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("no parser registered for this file type")]
    UnsupportedLanguage,

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("task deadline exceeded")]
    Timeout,

    #[error("task was cancelled")]
    Cancelled,

    #[error("storage write conflict: {0}")]
    StorageWriteConflict(String),

    #[error("io error: {0}")]
    Io(String),
}

/// Fatal coordinator errors. The only one is a bad root, raised before any
/// task is created.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid root path: {}", .0.display())]
    InvalidRootPath(PathBuf),
}

/// Errors from the query optimizer pipeline.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("malformed query: {0}")]
    InvalidQuery(String),

    /// Every step of the plan failed. Partial step failures degrade the
    /// result instead of producing this.
    #[error("every plan step failed: {0}")]
    PlanFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

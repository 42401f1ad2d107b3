//! Error types for the deduplication engine (§7).
//!
//! `StoreError` is what a `StoreGateway` implementation returns. `CoreError`
//! is what the driver surfaces to its caller — only the fatal kinds from
//! §7's propagation policy ever reach this far; per-commit errors are
//! logged with the offending `commit_id` and swallowed by the worker.

use thiserror::Error;

use crate::model::{CesId, CommitId};

/// Errors raised by a `StoreGateway` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transport-level failure talking to the document store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A required singleton document (project, VCS system, commit, CES) was
    /// not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// No project with the given name exists.
    #[error("project not found: {0}")]
    ProjectMissing(String),
}

/// Fatal errors surfaced by the driver. Everything else is logged and
/// skipped at the point it occurs.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("project {0:?} not found")]
    ProjectMissing(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProjectMissing(name) => CoreError::ProjectMissing(name),
            StoreError::Unavailable(msg) => CoreError::StoreUnavailable(msg),
            StoreError::NotFound(msg) => CoreError::StoreUnavailable(msg),
        }
    }
}

/// A non-fatal error encountered while merging a single commit. Carries the
/// commit so the driver's aggregate statistics and logs can cite it.
#[derive(Debug, Error)]
#[error("error merging commit {commit_id}: {source}")]
pub struct MergeError {
    pub commit_id: CommitId,
    #[source]
    pub source: MergeErrorKind,
}

#[derive(Debug, Error)]
pub enum MergeErrorKind {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Raised while resolving `ce.ce_parent_id` during the parent-repair
    /// step (§4.4 step 4) when the referenced CES cannot be found at all
    /// (neither kept nor in the deletion set). Logged and the key is
    /// skipped, per §7.
    #[error("dangling ce_parent_id {0} on CES")]
    DanglingParent(CesId),
}

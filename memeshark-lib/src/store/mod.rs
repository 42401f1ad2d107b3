//! The Store Gateway (§4.1): the abstract persistence layer every other
//! component is built against. Concrete implementations live outside this
//! crate (`memeshark-store-mongo`) or in `store::memory` for tests — the
//! upstream document-store bindings are out of scope for the core per §1.

pub mod memory;

use std::collections::HashSet;

use crate::error::StoreError;
use crate::model::{CesId, Commit, CodeEntityState, CommitId, CommitSummary, ProjectId, VcsSystemId};

/// Abstract persistence layer. All operations are synchronous and block the
/// caller (§4.1, §5).
///
/// Implementations must be `Clone`, and `clone()` must yield a handle that
/// owns an independent connection rather than sharing one — the fork-safety
/// contract of §4.1 and §9: a handle must be opened fresh per worker,
/// after the worker has started, never inherited from the driver process.
pub trait StoreGateway: Clone + Send {
    /// Resolves a project name to the id of its unique VCS system.
    /// `StoreError::ProjectMissing` if no such project exists.
    fn resolve_vcs(&self, project_name: &str) -> Result<VcsSystemId, StoreError>;

    /// Streams commit summaries for a VCS system: just `commit_id`,
    /// `revision_hash`, and `parents` — enough for the Graph Builder (§4.2),
    /// which prefers streaming over materializing full documents.
    fn commits_of(
        &self,
        vcs_system_id: VcsSystemId,
    ) -> Result<Box<dyn Iterator<Item = CommitSummary> + '_>, StoreError>;

    /// Resolves a revision hash to a commit id within a VCS system.
    fn commit_lookup(
        &self,
        vcs_system_id: VcsSystemId,
        revision_hash: &str,
    ) -> Result<CommitId, StoreError>;

    /// All CES recorded directly at a commit.
    fn ces_of(&self, commit_id: CommitId) -> Result<Vec<CodeEntityState>, StoreError>;

    /// Batch-fetches CES by id, e.g. to resolve a `ce_parent_id`.
    fn ces_by_ids(&self, ids: &HashSet<CesId>) -> Result<Vec<CodeEntityState>, StoreError>;

    /// A single CES by id.
    fn ces_by_id(&self, id: CesId) -> Result<CodeEntityState, StoreError>;

    /// The full commit document, including `code_entity_states`.
    fn commit(&self, commit_id: CommitId) -> Result<Commit, StoreError>;

    /// Idempotent rewrite of a commit's CES reference list.
    fn set_commit_ces(&self, commit_id: CommitId, ces_ids: Vec<CesId>) -> Result<(), StoreError>;

    /// Persists a mutation of `ce_parent_id` on an existing CES.
    fn save_ces(&self, ces: &CodeEntityState) -> Result<(), StoreError>;

    /// Bulk-deletes CES by id.
    fn delete_ces(&self, ids: &HashSet<CesId>) -> Result<(), StoreError>;
}

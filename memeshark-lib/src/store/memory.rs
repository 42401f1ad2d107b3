//! An in-memory `StoreGateway` used by unit and scenario tests. Mirrors the
//! schema contract of §6 without talking to an actual document store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::model::{
    CesId, Commit, CommitId, CommitSummary, CodeEntityState, ProjectId, VcsSystemId,
};

use super::StoreGateway;

#[derive(Default)]
struct Data {
    projects: HashMap<String, (ProjectId, VcsSystemId)>,
    commits: HashMap<CommitId, Commit>,
    ces: HashMap<CesId, CodeEntityState>,
}

/// A `StoreGateway` backed by in-process hash maps behind a mutex. Every
/// clone shares the same underlying data, which is the only sane behavior
/// for a test double (a real implementation must instead open an
/// independent connection per clone, per the fork-safety contract on
/// `StoreGateway`).
#[derive(Clone, Default)]
pub struct InMemoryStoreGateway {
    data: Arc<Mutex<Data>>,
}

impl InMemoryStoreGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a project with its (only) VCS system. Test setup helper;
    /// not part of the `StoreGateway` trait, which only exposes read access
    /// to projects via `resolve_vcs`.
    pub fn add_project(&self, name: &str, project_id: ProjectId, vcs_system_id: VcsSystemId) {
        self.data
            .lock()
            .unwrap()
            .projects
            .insert(name.to_string(), (project_id, vcs_system_id));
    }

    /// Inserts or replaces a commit document. Test setup helper.
    pub fn put_commit(&self, commit: Commit) {
        self.data
            .lock()
            .unwrap()
            .commits
            .insert(commit.commit_id, commit);
    }

    /// Inserts or replaces a CES document. Test setup helper.
    pub fn put_ces(&self, ces: CodeEntityState) {
        self.data.lock().unwrap().ces.insert(ces.id, ces);
    }

    /// Snapshot of every CES currently stored, for asserting post-run state
    /// in scenario tests.
    pub fn all_ces(&self) -> Vec<CodeEntityState> {
        self.data.lock().unwrap().ces.values().cloned().collect()
    }

    /// Snapshot of a commit's reference list, for asserting post-run state.
    pub fn commit_ces_ids(&self, commit_id: CommitId) -> Vec<CesId> {
        self.data
            .lock()
            .unwrap()
            .commits
            .get(&commit_id)
            .map(|c| c.code_entity_states.clone())
            .unwrap_or_default()
    }
}

impl StoreGateway for InMemoryStoreGateway {
    fn resolve_vcs(&self, project_name: &str) -> Result<VcsSystemId, StoreError> {
        self.data
            .lock()
            .unwrap()
            .projects
            .get(project_name)
            .map(|(_, vcs_system_id)| *vcs_system_id)
            .ok_or_else(|| StoreError::ProjectMissing(project_name.to_string()))
    }

    fn commits_of(
        &self,
        vcs_system_id: VcsSystemId,
    ) -> Result<Box<dyn Iterator<Item = CommitSummary> + '_>, StoreError> {
        let data = self.data.lock().unwrap();
        let summaries: Vec<CommitSummary> = data
            .commits
            .values()
            .filter(|c| c.vcs_system_id == vcs_system_id)
            .map(|c| CommitSummary {
                commit_id: c.commit_id,
                revision_hash: c.revision_hash.clone(),
                parents: c.parents.clone(),
            })
            .collect();
        Ok(Box::new(summaries.into_iter()))
    }

    fn commit_lookup(
        &self,
        vcs_system_id: VcsSystemId,
        revision_hash: &str,
    ) -> Result<CommitId, StoreError> {
        self.data
            .lock()
            .unwrap()
            .commits
            .values()
            .find(|c| c.vcs_system_id == vcs_system_id && c.revision_hash == revision_hash)
            .map(|c| c.commit_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("commit with revision_hash {revision_hash}"))
            })
    }

    fn ces_of(&self, commit_id: CommitId) -> Result<Vec<CodeEntityState>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .ces
            .values()
            .filter(|ces| ces.commit_id == commit_id)
            .cloned()
            .collect())
    }

    fn ces_by_ids(&self, ids: &HashSet<CesId>) -> Result<Vec<CodeEntityState>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(ids.iter().filter_map(|id| data.ces.get(id).cloned()).collect())
    }

    fn ces_by_id(&self, id: CesId) -> Result<CodeEntityState, StoreError> {
        self.data
            .lock()
            .unwrap()
            .ces
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("CES {id}")))
    }

    fn commit(&self, commit_id: CommitId) -> Result<Commit, StoreError> {
        self.data
            .lock()
            .unwrap()
            .commits
            .get(&commit_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("commit {commit_id}")))
    }

    fn set_commit_ces(&self, commit_id: CommitId, ces_ids: Vec<CesId>) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        let commit = data
            .commits
            .get_mut(&commit_id)
            .ok_or_else(|| StoreError::NotFound(format!("commit {commit_id}")))?;
        commit.code_entity_states = ces_ids;
        Ok(())
    }

    fn save_ces(&self, ces: &CodeEntityState) -> Result<(), StoreError> {
        self.data.lock().unwrap().ces.insert(ces.id, ces.clone());
        Ok(())
    }

    fn delete_ces(&self, ids: &HashSet<CesId>) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        for id in ids {
            data.ces.remove(id);
        }
        Ok(())
    }
}

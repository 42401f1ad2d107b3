//! A `StoreGateway` implementation backed by the official `mongodb` crate's
//! synchronous client.
//!
//! Collection and field names match the `pycoshark`/`mongoengine` schema the
//! original Python tool was built against: `project`, `vcs_system`, `commit`,
//! `code_entity_state`. A `CodeEntityState` document's non-identity fields
//! (everything but `_id`, `commit_id`, `long_name`, `file_id`,
//! `ce_parent_id`) are read back wholesale into `CodeEntityState::attributes`
//! rather than enumerated field-by-field, since the core never needs to know
//! what they mean — only whether two documents' worth of them are equal.

#![warn(clippy::all)]

use std::collections::HashSet;

use bson::{doc, Bson, Document};
use mongodb::options::FindOptions;
use mongodb::sync::{Client, Collection, Database};

use lib::error::StoreError;
use lib::model::{CesId, Commit, CodeEntityState, CommitId, CommitSummary, EntityKey, ProjectId, VcsSystemId};
use lib::store::StoreGateway;

const PROJECT_COLLECTION: &str = "project";
const VCS_SYSTEM_COLLECTION: &str = "vcs_system";
const COMMIT_COLLECTION: &str = "commit";
const CES_COLLECTION: &str = "code_entity_state";

const CES_IDENTITY_FIELDS: &[&str] = &["_id", "commit_id", "long_name", "file_id", "ce_parent_id"];

fn mongo_err(err: mongodb::error::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// A handle to one project/VCS-system pair's data in a MongoDB-compatible
/// document store.
///
/// `clone()` yields a new `Client` handle backed by the same internal
/// connection pool, which is the correct sharing unit for this crate's
/// thread-per-worker scheduler (unlike the raw per-process sockets the
/// original multiprocessing-based tool had to avoid inheriting across a
/// `fork()`). Each worker thread still calls `new_store()` itself rather than
/// receiving a handle created before the thread started, per the fork-safety
/// contract in `StoreGateway`'s documentation.
#[derive(Clone)]
pub struct MongoStoreGateway {
    database: Database,
}

impl MongoStoreGateway {
    /// Connects to the document store at `uri` and selects `database_name`.
    pub fn connect(uri: &str, database_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).map_err(mongo_err)?;
        Ok(Self {
            database: client.database(database_name),
        })
    }

    fn projects(&self) -> Collection<Document> {
        self.database.collection(PROJECT_COLLECTION)
    }

    fn vcs_systems(&self) -> Collection<Document> {
        self.database.collection(VCS_SYSTEM_COLLECTION)
    }

    fn commits(&self) -> Collection<Document> {
        self.database.collection(COMMIT_COLLECTION)
    }

    fn ces(&self) -> Collection<Document> {
        self.database.collection(CES_COLLECTION)
    }
}

fn commit_from_doc(doc: Document) -> Result<Commit, StoreError> {
    let commit_id = CommitId::from(
        doc.get_object_id("_id")
            .map_err(|_| StoreError::NotFound("commit._id".into()))?,
    );
    let vcs_system_id = VcsSystemId::from(
        doc.get_object_id("vcs_system_id")
            .map_err(|_| StoreError::NotFound("commit.vcs_system_id".into()))?,
    );
    let revision_hash = doc
        .get_str("revision_hash")
        .map_err(|_| StoreError::NotFound("commit.revision_hash".into()))?
        .to_string();
    let parents = doc
        .get_array("parents")
        .map(|arr| {
            arr.iter()
                .filter_map(|b| b.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let code_entity_states = doc
        .get_array("code_entity_states")
        .map(|arr| arr.iter().filter_map(Bson::as_object_id).map(CesId::from).collect())
        .unwrap_or_default();

    Ok(Commit {
        commit_id,
        vcs_system_id,
        revision_hash,
        parents,
        code_entity_states,
    })
}

fn ces_from_doc(mut doc: Document) -> Result<CodeEntityState, StoreError> {
    let id = CesId::from(
        doc.get_object_id("_id")
            .map_err(|_| StoreError::NotFound("code_entity_state._id".into()))?,
    );
    let commit_id = CommitId::from(
        doc.get_object_id("commit_id")
            .map_err(|_| StoreError::NotFound("code_entity_state.commit_id".into()))?,
    );
    let long_name = doc
        .get_str("long_name")
        .map_err(|_| StoreError::NotFound("code_entity_state.long_name".into()))?
        .to_string();
    let file_id = doc
        .get_str("file_id")
        .map_err(|_| StoreError::NotFound("code_entity_state.file_id".into()))?
        .to_string();
    let ce_parent_id = doc.get_object_id("ce_parent_id").ok().map(CesId::from);

    for field in CES_IDENTITY_FIELDS {
        doc.remove(*field);
    }

    Ok(CodeEntityState {
        id,
        commit_id,
        key: EntityKey::new(long_name, file_id),
        ce_parent_id,
        attributes: doc,
    })
}

fn ces_to_doc(ces: &CodeEntityState) -> Document {
    let mut doc = ces.attributes.clone();
    doc.insert("_id", ces.id.inner());
    doc.insert("commit_id", ces.commit_id.inner());
    doc.insert("long_name", ces.key.long_name.clone());
    doc.insert("file_id", ces.key.file_id.clone());
    match ces.ce_parent_id {
        Some(parent_id) => {
            doc.insert("ce_parent_id", parent_id.inner());
        }
        None => {
            doc.remove("ce_parent_id");
        }
    }
    doc
}

impl StoreGateway for MongoStoreGateway {
    fn resolve_vcs(&self, project_name: &str) -> Result<VcsSystemId, StoreError> {
        let project = self
            .projects()
            .find_one(doc! { "name": project_name }, None)
            .map_err(mongo_err)?
            .ok_or_else(|| StoreError::ProjectMissing(project_name.to_string()))?;
        let project_id = ProjectId::from(
            project
                .get_object_id("_id")
                .map_err(|_| StoreError::NotFound("project._id".into()))?,
        );
        let vcs_system = self
            .vcs_systems()
            .find_one(doc! { "project_id": project_id.inner() }, None)
            .map_err(mongo_err)?
            .ok_or_else(|| StoreError::NotFound(format!("vcs_system for project {project_name}")))?;
        Ok(VcsSystemId::from(
            vcs_system
                .get_object_id("_id")
                .map_err(|_| StoreError::NotFound("vcs_system._id".into()))?,
        ))
    }

    fn commits_of(
        &self,
        vcs_system_id: VcsSystemId,
    ) -> Result<Box<dyn Iterator<Item = CommitSummary> + '_>, StoreError> {
        // The Graph Builder calls this twice to stream every commit of a VCS
        // system end to end; disable the server-side cursor timeout so a
        // large history doesn't get dropped mid-scan.
        let options = FindOptions::builder().no_cursor_timeout(true).build();
        let cursor = self
            .commits()
            .find(doc! { "vcs_system_id": vcs_system_id.inner() }, options)
            .map_err(mongo_err)?;
        let summaries: Vec<CommitSummary> = cursor
            .filter_map(|result| result.ok())
            .filter_map(|doc| commit_from_doc(doc).ok())
            .map(|commit| CommitSummary {
                commit_id: commit.commit_id,
                revision_hash: commit.revision_hash,
                parents: commit.parents,
            })
            .collect();
        Ok(Box::new(summaries.into_iter()))
    }

    fn commit_lookup(
        &self,
        vcs_system_id: VcsSystemId,
        revision_hash: &str,
    ) -> Result<CommitId, StoreError> {
        let doc = self
            .commits()
            .find_one(
                doc! { "vcs_system_id": vcs_system_id.inner(), "revision_hash": revision_hash },
                None,
            )
            .map_err(mongo_err)?
            .ok_or_else(|| StoreError::NotFound(format!("commit {revision_hash}")))?;
        Ok(commit_from_doc(doc)?.commit_id)
    }

    fn ces_of(&self, commit_id: CommitId) -> Result<Vec<CodeEntityState>, StoreError> {
        let cursor = self
            .ces()
            .find(doc! { "commit_id": commit_id.inner() }, None)
            .map_err(mongo_err)?;
        cursor
            .map(|result| result.map_err(mongo_err).and_then(ces_from_doc))
            .collect()
    }

    fn ces_by_ids(&self, ids: &HashSet<CesId>) -> Result<Vec<CodeEntityState>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw_ids: Vec<bson::oid::ObjectId> = ids.iter().map(|id| id.inner()).collect();
        let cursor = self
            .ces()
            .find(doc! { "_id": { "$in": raw_ids } }, None)
            .map_err(mongo_err)?;
        cursor
            .map(|result| result.map_err(mongo_err).and_then(ces_from_doc))
            .collect()
    }

    fn ces_by_id(&self, id: CesId) -> Result<CodeEntityState, StoreError> {
        let doc = self
            .ces()
            .find_one(doc! { "_id": id.inner() }, None)
            .map_err(mongo_err)?
            .ok_or_else(|| StoreError::NotFound(format!("code_entity_state {id}")))?;
        ces_from_doc(doc)
    }

    fn commit(&self, commit_id: CommitId) -> Result<Commit, StoreError> {
        let doc = self
            .commits()
            .find_one(doc! { "_id": commit_id.inner() }, None)
            .map_err(mongo_err)?
            .ok_or_else(|| StoreError::NotFound(format!("commit {commit_id}")))?;
        commit_from_doc(doc)
    }

    fn set_commit_ces(&self, commit_id: CommitId, ces_ids: Vec<CesId>) -> Result<(), StoreError> {
        let raw_ids: Vec<bson::oid::ObjectId> = ces_ids.iter().map(|id| id.inner()).collect();
        self.commits()
            .update_one(
                doc! { "_id": commit_id.inner() },
                doc! { "$set": { "code_entity_states": raw_ids } },
                None,
            )
            .map_err(mongo_err)?;
        Ok(())
    }

    fn save_ces(&self, ces: &CodeEntityState) -> Result<(), StoreError> {
        self.ces()
            .replace_one(doc! { "_id": ces.id.inner() }, ces_to_doc(ces), None)
            .map_err(mongo_err)?;
        Ok(())
    }

    fn delete_ces(&self, ids: &HashSet<CesId>) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw_ids: Vec<bson::oid::ObjectId> = ids.iter().map(|id| id.inner()).collect();
        self.ces()
            .delete_many(doc! { "_id": { "$in": raw_ids } }, None)
            .map_err(mongo_err)?;
        Ok(())
    }
}

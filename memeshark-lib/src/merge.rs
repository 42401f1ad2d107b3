//! The Path Merger (§4.4): given a single commit and the CES state
//! inherited from its parent, produces the deduplicated CES set for the
//! commit, the rewrite map, and the deletion set, and persists the result.
//!
//! Ported from `MemeSHARK._merge_node`/`_merge_path`, but expressed as a
//! single function over one commit rather than a recursive walk — the
//! iteration across a linear segment lives in `memeshark-scheduler`
//! instead (§9: rewrite recursion as an explicit loop).

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::equivalence::{equivalent, EXCLUDED_FIELDS};
use crate::error::{MergeError, MergeErrorKind};
use crate::model::{CesId, CodeEntityState, CommitId, EntityKey};
use crate::store::StoreGateway;

/// The CES state inherited from a commit's unique predecessor on a path:
/// `(long_name, file_id) → CES`.
pub type InheritedState = HashMap<EntityKey, CodeEntityState>;

/// The outcome of merging a single commit.
pub struct MergeOutcome {
    /// The post-commit state, to be carried forward to this commit's
    /// successors.
    pub state_out: InheritedState,
    /// Total CES considered at this commit (for driver statistics).
    pub ces_seen: usize,
    /// Total CES actually deleted at this commit.
    pub ces_deleted: usize,
    /// Whether this call persisted anything (false for the "already
    /// processed, all successors already processed too" skip case in step
    /// 1, and for the "already processed, re-read for propagation" case).
    pub did_write: bool,
}

/// Runs the Path Merger algorithm on `node`, given the inherited state from
/// its unique parent (empty for a root or a merge point, per §4.5's
/// seeding policy).
///
/// This function is idempotent (I5): calling it twice on the same commit
/// with the same store state produces the same persisted result and
/// returns the same `state_out` both times.
#[instrument(skip(store, state_in), fields(commit_id = %node))]
pub fn merge_commit<G: StoreGateway>(
    store: &G,
    node: CommitId,
    state_in: &InheritedState,
    successors_already_processed: bool,
) -> Result<MergeOutcome, MergeError> {
    let wrap = |kind: MergeErrorKind| MergeError {
        commit_id: node,
        source: kind,
    };

    let commit = store.commit(node).map_err(|e| wrap(e.into()))?;

    // Step 1: idempotence probe (§4.4 step 1).
    if !commit.code_entity_states.is_empty() {
        if successors_already_processed {
            debug!("commit already processed and all successors already processed; skipping");
            return Ok(MergeOutcome {
                state_out: InheritedState::new(),
                ces_seen: 0,
                ces_deleted: 0,
                did_write: false,
            });
        }
        debug!("commit already processed; re-reading persisted CES for propagation");
        let ids: HashSet<CesId> = commit.code_entity_states.iter().copied().collect();
        let ces_list = store.ces_by_ids(&ids).map_err(|e| wrap(e.into()))?;
        let state_out = ces_list
            .into_iter()
            .map(|ces| (ces.key.clone(), ces))
            .collect();
        return Ok(MergeOutcome {
            state_out,
            ces_seen: 0,
            ces_deleted: 0,
            did_write: false,
        });
    }

    // Step 2: classify this commit's CES against the inherited state.
    let mut state_out: InheritedState = InheritedState::new();
    let mut rewrite: HashMap<CesId, CesId> = HashMap::new();
    let mut to_delete: HashSet<CesId> = HashSet::new();
    let mut changed: HashSet<CesId> = HashSet::new();

    let this_commit_ces = store.ces_of(node).map_err(|e| wrap(e.into()))?;
    let ces_seen = this_commit_ces.len();

    // Originals of tentatively-deleted CES, keyed by their own id, so the
    // cascade below can inspect and potentially restore them without a
    // store round-trip (`state_out` holds the parent's copy for these keys
    // instead, once classified).
    let mut deleted_originals: HashMap<CesId, CodeEntityState> = HashMap::new();

    for x in this_commit_ces {
        match state_in.get(&x.key) {
            None => {
                rewrite.insert(x.id, x.id);
                changed.insert(x.id);
                state_out.insert(x.key.clone(), x);
            }
            Some(y) => {
                if equivalent(&x.attributes, &y.attributes, EXCLUDED_FIELDS) {
                    rewrite.insert(x.id, y.id);
                    to_delete.insert(x.id);
                    state_out.insert(x.key.clone(), y.clone());
                    deleted_originals.insert(x.id, x);
                } else {
                    rewrite.insert(x.id, x.id);
                    changed.insert(x.id);
                    state_out.insert(x.key.clone(), x);
                }
            }
        }
    }

    // Step 3: parent-change cascade (I2 enforcement). A CES slated for
    // deletion whose `ce_parent_id` points at something that changed *at
    // this commit* must be anchored here too, because a deleted child
    // would otherwise carry a `ce_parent_id` pointing at a CES not
    // referenced by this commit. Terminates because each iteration moves
    // exactly one id out of `to_delete`.
    let mut promoted = true;
    while promoted {
        promoted = false;
        let candidates: Vec<CesId> = to_delete
            .iter()
            .copied()
            .filter(|id| {
                deleted_originals
                    .get(id)
                    .and_then(|ces| ces.ce_parent_id)
                    .is_some_and(|parent_id| changed.contains(&parent_id))
            })
            .collect();
        for id in candidates {
            to_delete.remove(&id);
            let own_copy = deleted_originals
                .remove(&id)
                .expect("candidate came from deleted_originals");
            rewrite.insert(id, id);
            changed.insert(id);
            state_out.insert(own_copy.key.clone(), own_copy);
            promoted = true;
        }
    }

    // Step 4: parent repair (I2 across the keep set). For CES newly
    // introduced or changed at this node, if its own `ce_parent_id` is
    // among the final deletion set, rewrite it via `rewrite` and persist.
    // If a `ce_parent_id` instead points at a CES absent from both the keep
    // set and the deletion set, the reference is dangling (§7): log it via
    // a per-CES fetch and clear it rather than leaving a broken pointer.
    let mut to_save: Vec<CodeEntityState> = Vec::new();
    for ces in state_out.values() {
        if ces.commit_id != node {
            continue;
        }
        let Some(parent_id) = ces.ce_parent_id else {
            continue;
        };
        if to_delete.contains(&parent_id) {
            let mut updated = ces.clone();
            updated.ce_parent_id =
                Some(*rewrite.get(&parent_id).expect("to_delete ids are always rewritten"));
            to_save.push(updated);
        } else if !state_out.values().any(|c| c.id == parent_id) {
            if let Err(source) = store.ces_by_id(parent_id) {
                let err = wrap(MergeErrorKind::DanglingParent(parent_id));
                debug!(ces_id = %ces.id, parent_id = %parent_id, fetch_error = %source, "{}", err);
                let mut updated = ces.clone();
                updated.ce_parent_id = None;
                to_save.push(updated);
            }
        }
    }
    for updated in &to_save {
        store.save_ces(updated).map_err(|e| wrap(e.into()))?;
        state_out.insert(updated.key.clone(), updated.clone());
    }

    // Step 5: persist.
    let ids: Vec<CesId> = state_out.values().map(|ces| ces.id).collect();
    store
        .set_commit_ces(node, ids)
        .map_err(|e| wrap(e.into()))?;
    if !to_delete.is_empty() {
        store.delete_ces(&to_delete).map_err(|e| wrap(e.into()))?;
    }

    Ok(MergeOutcome {
        ces_deleted: to_delete.len(),
        ces_seen,
        state_out,
        did_write: true,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bson::{doc, oid::ObjectId};

    use super::*;
    use crate::model::{Commit, VcsSystemId};
    use crate::store::memory::InMemoryStoreGateway;
    use crate::store::StoreGateway;

    fn oid() -> ObjectId {
        ObjectId::new()
    }

    fn make_commit(store: &InMemoryStoreGateway, vcs: VcsSystemId, parents: &[&str]) -> CommitId {
        let commit_id = CommitId::from(oid());
        store.put_commit(Commit {
            commit_id,
            vcs_system_id: vcs,
            revision_hash: format!("{commit_id}"),
            parents: parents.iter().map(|s| s.to_string()).collect(),
            code_entity_states: vec![],
        });
        commit_id
    }

    fn put_ces(
        store: &InMemoryStoreGateway,
        commit_id: CommitId,
        long_name: &str,
        parent: Option<CesId>,
        attrs: bson::Document,
    ) -> CesId {
        let id = CesId::from(oid());
        store.put_ces(CodeEntityState {
            id,
            commit_id,
            key: EntityKey::new(long_name, "1"),
            ce_parent_id: parent,
            attributes: attrs,
        });
        id
    }

    /// Step 3's parent-change cascade, exercised directly: `p` changes at
    /// this commit while `c`'s own attributes are unchanged from the
    /// inherited state. `c` must still be kept, not deduplicated against
    /// the inherited copy, because its `ce_parent_id` would otherwise point
    /// at a CES this commit no longer references.
    #[test]
    fn cascade_keeps_child_whose_parent_changed() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());
        let parent_commit = make_commit(&store, vcs, &[]);
        let this_commit = make_commit(&store, vcs, &[]);

        let p_parent = put_ces(&store, parent_commit, "Class", None, doc! { "loc": 10 });
        let c_parent = put_ces(&store, parent_commit, "Class.m", Some(p_parent), doc! { "loc": 3 });

        let p_this = put_ces(&store, this_commit, "Class", None, doc! { "loc": 11 });
        let c_this = put_ces(&store, this_commit, "Class.m", Some(p_this), doc! { "loc": 3 });

        let state_in: InheritedState = [
            (EntityKey::new("Class", "1"), store.ces_by_id(p_parent).unwrap()),
            (EntityKey::new("Class.m", "1"), store.ces_by_id(c_parent).unwrap()),
        ]
        .into_iter()
        .collect();

        let outcome = merge_commit(&store, this_commit, &state_in, false).unwrap();

        let kept: HashSet<CesId> = outcome.state_out.values().map(|c| c.id).collect();
        assert!(kept.contains(&p_this));
        assert!(kept.contains(&c_this));
        assert!(!kept.contains(&p_parent));
        assert!(!kept.contains(&c_parent));
        assert_eq!(outcome.ces_deleted, 0);
    }

    /// Step 4's parent repair: a CES unchanged from the inherited state
    /// (and so slated for deletion) whose *child* is pinned to this commit
    /// for an unrelated reason must have that child's `ce_parent_id`
    /// rewritten to the surviving (parent's) CES id, not left pointing at
    /// the about-to-be-deleted local copy.
    #[test]
    fn parent_repair_rewrites_surviving_childs_parent_pointer() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());
        let parent_commit = make_commit(&store, vcs, &[]);
        let this_commit = make_commit(&store, vcs, &[]);

        let p_parent = put_ces(&store, parent_commit, "Class", None, doc! { "loc": 10 });

        // `p` is unchanged (will dedupe against p_parent and be deleted).
        let p_this = put_ces(&store, this_commit, "Class", None, doc! { "loc": 10 });
        // `c` is newly introduced here but already points at `p_this`'s id
        // (e.g. written by the same ingestion pass before this merge ran).
        let c_this = put_ces(&store, this_commit, "Class.m", Some(p_this), doc! { "loc": 5 });

        let state_in: InheritedState = [(EntityKey::new("Class", "1"), store.ces_by_id(p_parent).unwrap())]
            .into_iter()
            .collect();

        let outcome = merge_commit(&store, this_commit, &state_in, false).unwrap();

        let c_out = outcome
            .state_out
            .get(&EntityKey::new("Class.m", "1"))
            .expect("c survives");
        assert_eq!(c_out.ce_parent_id, Some(p_parent));
        assert_eq!(c_out.id, c_this);
        assert_eq!(outcome.ces_deleted, 1);

        // P3: nothing still referenced by the commit is missing from the store.
        let commit = store.commit(this_commit).unwrap();
        for id in &commit.code_entity_states {
            assert!(store.ces_by_id(*id).is_ok());
        }
        // P2: every referenced CES's ce_parent_id resolves to a CES
        // referenced by the same commit.
        let referenced: HashSet<CesId> = commit.code_entity_states.iter().copied().collect();
        for id in &commit.code_entity_states {
            let ces = store.ces_by_id(*id).unwrap();
            if let Some(parent_id) = ces.ce_parent_id {
                assert!(referenced.contains(&parent_id));
            }
        }
    }

    /// A `ce_parent_id` pointing at a CES absent from both the keep set and
    /// the deletion set (a truly dangling reference) is logged and cleared
    /// rather than left broken or treated as fatal.
    #[test]
    fn dangling_parent_is_cleared_not_fatal() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());
        let this_commit = make_commit(&store, vcs, &[]);

        let bogus_parent = CesId::from(oid());
        let c_this = put_ces(&store, this_commit, "Class.m", Some(bogus_parent), doc! { "loc": 5 });

        let outcome = merge_commit(&store, this_commit, &InheritedState::new(), false).unwrap();

        let c_out = outcome
            .state_out
            .values()
            .find(|c| c.id == c_this)
            .expect("c survives");
        assert_eq!(c_out.ce_parent_id, None);
    }

    /// P5 directly: a child CES whose attributes are equal to the parent's
    /// (non-excluded attributes) ends up referencing the parent's CES id.
    #[test]
    fn equivalent_ces_dedupes_to_parents_id() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());
        let parent_commit = make_commit(&store, vcs, &[]);
        let this_commit = make_commit(&store, vcs, &[]);

        let p_parent = put_ces(&store, parent_commit, "foo", None, doc! { "loc": 10 });
        put_ces(&store, this_commit, "foo", None, doc! { "loc": 10 });

        let state_in: InheritedState = [(EntityKey::new("foo", "1"), store.ces_by_id(p_parent).unwrap())]
            .into_iter()
            .collect();

        let outcome = merge_commit(&store, this_commit, &state_in, false).unwrap();

        assert_eq!(outcome.state_out.get(&EntityKey::new("foo", "1")).unwrap().id, p_parent);
        assert_eq!(outcome.ces_deleted, 1);
    }
}

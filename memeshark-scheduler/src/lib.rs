//! The Task Scheduler (§4.5): decomposes the commit DAG into linear paths
//! separated at branch points and merge points, dispatches path-head tasks
//! to a pool of workers, and serializes state at branch/merge boundaries.
//!
//! The work-queue and worker machinery is adapted from
//! `git-branchless-test::worker`, which solves the same "FIFO queue of
//! small job descriptors, drained by a bounded pool of threads, results
//! reported over a channel" problem for running a test command across many
//! commits. Here the "job" is a path head rather than a commit to test, and
//! a worker walks an entire linear segment per job instead of doing a
//! single unit of work.

mod driver;
mod queue;

pub use driver::compress;

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, instrument};

use lib::error::MergeError;
use lib::graph::{CommitGraph, NodeIndex};
use lib::merge::{merge_commit, InheritedState};
use lib::model::{CesId, CommitId};
use lib::store::StoreGateway;

use queue::WorkQueue;

/// A scheduling unit (§4.5): either a path head with zero or more-than-one
/// parents (`PathStart`), or a single-parent node reached as a branch
/// successor of another worker's segment (`BranchStart`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    PathStart(CommitId),
    BranchStart(CommitId),
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::PathStart(id) => write!(f, "PathStart({id})"),
            Task::BranchStart(id) => write!(f, "BranchStart({id})"),
        }
    }
}

impl Task {
    fn commit_id(&self) -> CommitId {
        match self {
            Task::PathStart(id) | Task::BranchStart(id) => *id,
        }
    }
}

/// Aggregate statistics for a run, accumulated by draining the result
/// channel after the work queue closes (§5: counters are written via
/// channels that serialize updates, not shared atomics).
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub commits_processed: usize,
    pub ces_seen: usize,
    pub ces_deleted: usize,
}

impl RunStats {
    fn merge(&mut self, other: RunStats) {
        self.commits_processed += other.commits_processed;
        self.ces_seen += other.ces_seen;
        self.ces_deleted += other.ces_deleted;
    }
}

struct JobOutcome {
    stats: RunStats,
    follow_up: Vec<Task>,
}

enum JobResult {
    Done(Task, JobOutcome),
    Error(Task, MergeError),
}

/// Runs the scheduler to completion: seeds one `PathStart` task per node
/// with ≠1 parents (the driver's job per §4.5), then dispatches work across
/// `num_workers` threads until the queue drains.
///
/// `new_store` is invoked once per worker, from inside the worker's own
/// thread after it has started — never before — so that each worker opens
/// an independent connection rather than inheriting one from the calling
/// thread (§4.1, §9 fork-safety contract).
#[instrument(skip(graph, new_store))]
pub fn run<G, F>(graph: &CommitGraph, new_store: F, num_workers: usize) -> RunStats
where
    G: StoreGateway,
    F: Fn() -> G + Sync,
{
    let num_workers = num_workers.max(1);

    let initial_tasks: Vec<Task> = graph
        .nodes()
        .filter(|&node| graph.parent_count(node) != 1)
        .map(|node| Task::PathStart(graph.commit_id(node)))
        .collect();
    let total = initial_tasks.len();
    info!(path_heads = total, "seeded initial path-start tasks");

    let work_queue: WorkQueue<Task> = WorkQueue::new();
    work_queue.set(initial_tasks);

    let mut stats = RunStats::default();
    let mut outstanding = total;
    let mut completed = 0usize;

    crossbeam::thread::scope(|scope| {
        let (result_tx, result_rx) = crossbeam::channel::unbounded::<JobResult>();

        for worker_id in 0..num_workers {
            let work_queue = work_queue.clone();
            let result_tx = result_tx.clone();
            let new_store = &new_store;
            scope.spawn(move |_| {
                let store = new_store();
                debug!(worker_id, "worker started, store handle opened");
                while let Some(task) = work_queue.pop_blocking() {
                    match run_task(&store, graph, task) {
                        Ok(outcome) => {
                            result_tx.send(JobResult::Done(task, outcome)).ok();
                        }
                        Err(err) => {
                            result_tx.send(JobResult::Error(task, err)).ok();
                        }
                    }
                }
                debug!(worker_id, "worker exiting");
            });
        }
        drop(result_tx);

        while outstanding > 0 {
            match result_rx.recv() {
                Ok(JobResult::Done(task, outcome)) => {
                    outstanding -= 1;
                    completed += 1;
                    stats.merge(outcome.stats);
                    if !outcome.follow_up.is_empty() {
                        outstanding += outcome.follow_up.len();
                        work_queue.set(outcome.follow_up);
                    }
                    info!(
                        completed,
                        total = completed + outstanding,
                        task = ?task,
                        "path segment merged"
                    );
                }
                Ok(JobResult::Error(task, err)) => {
                    outstanding -= 1;
                    tracing::error!(commit_id = %task.commit_id(), error = %err, "error merging commit; skipping");
                }
                Err(_) => break,
            }
        }
        work_queue.close();
    })
    .expect("scheduler worker thread panicked");

    stats.commits_processed = completed;
    stats
}

/// Runs one task: seeds the inherited state per §4.5, then walks the
/// now-linear segment forward as an explicit loop (§9: no recursion),
/// carrying `state_out` in memory between commits rather than round-
/// tripping through the store.
fn run_task<G: StoreGateway>(
    store: &G,
    graph: &CommitGraph,
    task: Task,
) -> Result<JobOutcome, MergeError> {
    let start = task.commit_id();
    let start_idx = graph
        .node(start)
        .unwrap_or_else(|| panic!("task references commit {start} not present in the graph"));

    let mut state: InheritedState = match task {
        Task::PathStart(_) => InheritedState::new(),
        Task::BranchStart(_) => seed_from_parent(store, graph, start_idx)?,
    };

    let mut stats = RunStats::default();
    let mut follow_up = Vec::new();
    let mut node_idx = start_idx;

    loop {
        let node = graph.commit_id(node_idx);
        let children: Vec<NodeIndex> = graph.children(node_idx).collect();
        let successors_already_processed = !children.is_empty()
            && children.iter().all(|&child| {
                let child_id = graph.commit_id(child);
                store
                    .commit(child_id)
                    .map(|c| !c.code_entity_states.is_empty())
                    .unwrap_or(false)
            });

        let outcome = merge_commit(store, node, &state, successors_already_processed)?;
        stats.commits_processed += 1;
        stats.ces_seen += outcome.ces_seen;
        stats.ces_deleted += outcome.ces_deleted;

        if children.len() == 1 && graph.parent_count(children[0]) == 1 {
            node_idx = children[0];
            state = outcome.state_out;
            continue;
        }

        for child in children {
            if graph.parent_count(child) == 1 {
                follow_up.push(Task::BranchStart(graph.commit_id(child)));
            }
            // Children with ≠1 parents are merge points or roots, already
            // covered by the initial `PathStart` enqueue (§4.5).
        }
        break;
    }

    Ok(JobOutcome { stats, follow_up })
}

fn seed_from_parent<G: StoreGateway>(
    store: &G,
    graph: &CommitGraph,
    node: NodeIndex,
) -> Result<InheritedState, MergeError> {
    let parent_idx = graph
        .parents(node)
        .next()
        .expect("BranchStart task targets a node with exactly one parent");
    let parent_commit_id = graph.commit_id(parent_idx);
    let commit_id = graph.commit_id(node);
    let wrap = |source: lib::error::StoreError| MergeError {
        commit_id,
        source: lib::error::MergeErrorKind::Store(source),
    };
    let parent = store.commit(parent_commit_id).map_err(wrap)?;
    let ids: HashSet<CesId> = parent.code_entity_states.iter().copied().collect();
    let ces_list = store.ces_by_ids(&ids).map_err(wrap)?;
    Ok(ces_list.into_iter().map(|c| (c.key.clone(), c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;
    use lib::model::{CesId as LibCesId, Commit, CodeEntityState, EntityKey, ProjectId, VcsSystemId};
    use lib::store::memory::InMemoryStoreGateway;

    fn oid() -> ObjectId {
        ObjectId::new()
    }

    fn make_commit(
        store: &InMemoryStoreGateway,
        vcs: VcsSystemId,
        hash: &str,
        parents: &[&str],
    ) -> CommitId {
        let commit_id = CommitId::from(oid());
        store.put_commit(Commit {
            commit_id,
            vcs_system_id: vcs,
            revision_hash: hash.into(),
            parents: parents.iter().map(|s| s.to_string()).collect(),
            code_entity_states: vec![],
        });
        commit_id
    }

    fn make_ces(store: &InMemoryStoreGateway, commit_id: CommitId, attrs: bson::Document) -> LibCesId {
        let id = LibCesId::from(oid());
        store.put_ces(CodeEntityState {
            id,
            commit_id,
            key: EntityKey::new("foo", "1"),
            ce_parent_id: None,
            attributes: attrs,
        });
        id
    }

    /// Scenario 1 (§8): linear chain, no changes. A → B → C, each with an
    /// identical CES `(foo, 1)`. All three commits should end up
    /// referencing the same single CES.
    #[test]
    fn linear_chain_no_changes_collapses_to_one_ces() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());
        store.add_project("proj", ProjectId::from(oid()), vcs);

        let a = make_commit(&store, vcs, "a", &[]);
        let b = make_commit(&store, vcs, "b", &["a"]);
        let c = make_commit(&store, vcs, "c", &["b"]);

        let attrs = doc! { "loc": 10 };
        let ces_a = make_ces(&store, a, attrs.clone());
        make_ces(&store, b, attrs.clone());
        make_ces(&store, c, attrs);

        let graph = lib::graph::build_graph(&store, vcs).unwrap();
        let stats = run(&graph, || store.clone(), 2);

        assert_eq!(stats.commits_processed, 3);
        assert_eq!(store.all_ces().len(), 1);
        assert_eq!(store.commit_ces_ids(a), vec![ces_a]);
        assert_eq!(store.commit_ces_ids(b), vec![ces_a]);
        assert_eq!(store.commit_ces_ids(c), vec![ces_a]);
    }

    /// Scenario 2 (§8): linear chain with one change. A → B → C. CES
    /// `(foo, 1)` differs at B and returns to A's attributes at C. Because
    /// B introduced a change, C is anchored to B's copy rather than
    /// deduping back to A's — the cascade in `merge.rs` keeps children of a
    /// changed parent pinned to that parent even when their own attributes
    /// happen to match an older ancestor.
    #[test]
    fn linear_chain_one_change_keeps_child_anchored_to_changed_parent() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());

        let a = make_commit(&store, vcs, "a", &[]);
        let b = make_commit(&store, vcs, "b", &["a"]);
        let c = make_commit(&store, vcs, "c", &["b"]);

        let ces_a = make_ces(&store, a, doc! { "loc": 10 });
        let ces_b = make_ces(&store, b, doc! { "loc": 20 });
        let ces_c = make_ces(&store, c, doc! { "loc": 10 });

        let graph = lib::graph::build_graph(&store, vcs).unwrap();
        run(&graph, || store.clone(), 2);

        assert_eq!(store.all_ces().len(), 3);
        assert_eq!(store.commit_ces_ids(a), vec![ces_a]);
        assert_eq!(store.commit_ces_ids(b), vec![ces_b]);
        assert_eq!(store.commit_ces_ids(c), vec![ces_c]);
    }

    /// Scenario 3 (§8): parent cascade. A → B. A has `p = (Class, 1)` and
    /// `c = (Class.m, 1)` with `c.ce_parent_id = p`. At B, `p` changed but
    /// `c`'s own attributes are identical to A's `c`. Expected: B keeps its
    /// own `p` *and* its own `c`, because `c`'s parent changed — this is
    /// the parent-change cascade (`merge.rs` step 3) exercised end to end
    /// through the scheduler.
    #[test]
    fn parent_cascade_keeps_child_anchored_when_its_own_parent_changes() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());

        let a = make_commit(&store, vcs, "a", &[]);
        let b = make_commit(&store, vcs, "b", &["a"]);

        let p_a = LibCesId::from(oid());
        store.put_ces(CodeEntityState {
            id: p_a,
            commit_id: a,
            key: EntityKey::new("Class", "1"),
            ce_parent_id: None,
            attributes: doc! { "loc": 10 },
        });
        let c_a = LibCesId::from(oid());
        store.put_ces(CodeEntityState {
            id: c_a,
            commit_id: a,
            key: EntityKey::new("Class.m", "1"),
            ce_parent_id: Some(p_a),
            attributes: doc! { "loc": 3 },
        });
        let p_b = LibCesId::from(oid());
        store.put_ces(CodeEntityState {
            id: p_b,
            commit_id: b,
            key: EntityKey::new("Class", "1"),
            ce_parent_id: None,
            attributes: doc! { "loc": 11 },
        });
        let c_b = LibCesId::from(oid());
        store.put_ces(CodeEntityState {
            id: c_b,
            commit_id: b,
            key: EntityKey::new("Class.m", "1"),
            ce_parent_id: Some(p_b),
            attributes: doc! { "loc": 3 },
        });

        let graph = lib::graph::build_graph(&store, vcs).unwrap();
        run(&graph, || store.clone(), 1);

        let b_refs = store.commit_ces_ids(b);
        assert!(b_refs.contains(&p_b));
        assert!(b_refs.contains(&c_b));
        assert!(!b_refs.contains(&p_a));
        assert!(!b_refs.contains(&c_a));
    }

    /// Scenario 4 (§8): branch. A → B, A → C. B and C each have a CES
    /// identical to A's. Both should end up referencing A's CES.
    #[test]
    fn branch_both_children_dedupe_against_root() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());

        let a = make_commit(&store, vcs, "a", &[]);
        let b = make_commit(&store, vcs, "b", &["a"]);
        let c = make_commit(&store, vcs, "c", &["a"]);

        let attrs = doc! { "loc": 10 };
        let ces_a = make_ces(&store, a, attrs.clone());
        make_ces(&store, b, attrs.clone());
        make_ces(&store, c, attrs);

        let graph = lib::graph::build_graph(&store, vcs).unwrap();
        run(&graph, || store.clone(), 2);

        assert_eq!(store.all_ces().len(), 1);
        assert_eq!(store.commit_ces_ids(b), vec![ces_a]);
        assert_eq!(store.commit_ces_ids(c), vec![ces_a]);
    }

    /// Scenario 5 (§8): merge point. A → M, B → M. Even though A, B, and M
    /// all carry an identical CES, M is seeded with an empty inherited
    /// state and so keeps its own CES rather than deduping against either
    /// parent.
    #[test]
    fn merge_point_keeps_its_own_ces() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());

        let a = make_commit(&store, vcs, "a", &[]);
        let b = make_commit(&store, vcs, "b", &[]);
        let m = make_commit(&store, vcs, "m", &["a", "b"]);

        let attrs = doc! { "loc": 10 };
        make_ces(&store, a, attrs.clone());
        make_ces(&store, b, attrs.clone());
        let ces_m = make_ces(&store, m, attrs);

        let graph = lib::graph::build_graph(&store, vcs).unwrap();
        run(&graph, || store.clone(), 2);

        assert_eq!(store.all_ces().len(), 3);
        assert_eq!(store.commit_ces_ids(m), vec![ces_m]);
    }

    /// Scenario 6 (§8): idempotent re-run. Running the scheduler twice over
    /// scenario 1's input leaves the store unchanged the second time.
    #[test]
    fn rerun_is_idempotent() {
        let store = InMemoryStoreGateway::new();
        let vcs = VcsSystemId::from(oid());

        let a = make_commit(&store, vcs, "a", &[]);
        let b = make_commit(&store, vcs, "b", &["a"]);

        let attrs = doc! { "loc": 10 };
        make_ces(&store, a, attrs.clone());
        make_ces(&store, b, attrs);

        let graph = lib::graph::build_graph(&store, vcs).unwrap();
        run(&graph, || store.clone(), 1);

        let ces_after_first = store.all_ces();
        let a_refs_after_first = store.commit_ces_ids(a);
        let b_refs_after_first = store.commit_ces_ids(b);

        let second_stats = run(&graph, || store.clone(), 1);

        assert_eq!(store.all_ces().len(), ces_after_first.len());
        assert_eq!(store.commit_ces_ids(a), a_refs_after_first);
        assert_eq!(store.commit_ces_ids(b), b_refs_after_first);
        assert_eq!(second_stats.ces_deleted, 0);
    }
}

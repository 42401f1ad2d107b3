//! The Driver (§4.6): the top-level entry point a binary calls into. Resolves
//! a project name to its VCS system, builds the commit graph, runs the
//! scheduler, and logs final aggregate statistics with elapsed time.
//!
//! Grounded in `MemeSHARK.start`/`MemeSHARK.run` from
//! `examples/original_source/memeshark/memeshark.py`: that method times the
//! whole run with `timeit`, resolves the project and VCS system, builds the
//! commit graph, dispatches the multiprocessing pool, and logs a final
//! "finished in Xs, Y commits processed" line. The timing and pool-dispatch
//! responsibilities land here rather than in `run()` so that `run()` stays a
//! pure function of an already-built graph, testable without a clock.

use std::time::Instant;

use tracing::{info, instrument};

use lib::error::CoreError;
use lib::graph::build_graph;
use lib::store::StoreGateway;

use crate::RunStats;

/// Walks every commit of `project_name`'s VCS system and deduplicates CES
/// against parent state, using `num_workers` worker threads.
///
/// `new_store` is called once up front to resolve the project (on whichever
/// thread calls `compress`), and again once per worker thread inside
/// [`run`](crate::run) — see that function's fork-safety note.
#[instrument(skip(new_store))]
pub fn compress<G, F>(project_name: &str, new_store: F, num_workers: usize) -> Result<RunStats, CoreError>
where
    G: StoreGateway,
    F: Fn() -> G + Sync,
{
    let start = Instant::now();
    let store = new_store();

    let vcs_system_id = store.resolve_vcs(project_name)?;
    info!(project_name, %vcs_system_id, "resolved project");

    let graph = build_graph(&store, vcs_system_id)?;
    info!(commits = graph.len(), "commit graph built");

    let stats = crate::run(&graph, new_store, num_workers);

    let elapsed = start.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        commits_processed = stats.commits_processed,
        ces_seen = stats.ces_seen,
        ces_deleted = stats.ces_deleted,
        "compression finished"
    );

    Ok(stats)
}

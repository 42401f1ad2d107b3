//! Entry point for `memeshark-consistency-checker`: compares an unprocessed
//! ("verbose") database against a compressed one, commit by commit, and
//! reports any code-entity-state whose attributes differ between the two or
//! whose `ce_parent_id` resolves to a differing CES.
//!
//! Ported from `tests/consistency_checker.py`'s `start()`/
//! `compare_djangoobjects()`: that script walks every verbose commit, looks
//! up the same commit id in the condensed database, and diffs each CES by
//! `long_name`. Here the `long_name` index and the exclusion set are the
//! same ones the core's equivalence predicate already uses
//! ([`lib::equivalence::EXCLUDED_FIELDS`]), so a customer-visible drift and
//! a merge-algorithm bug would be caught by the same logic.

use std::collections::HashMap;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use lib::equivalence::{equivalent, EXCLUDED_FIELDS};
use lib::model::CodeEntityState;
use lib::store::StoreGateway;
use memeshark_opts::ConsistencyCheckerOpts;
use memeshark_store_mongo::MongoStoreGateway;

fn install_tracing(default_level: tracing::Level) -> eyre::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(default_level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .try_init()?;

    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opts = ConsistencyCheckerOpts::parse();
    install_tracing(opts.log_level.to_tracing_level())?;

    let verbose_config: lib::config::StoreConnectionConfig = opts.verbose_store.into();
    let compressed_config: lib::config::StoreConnectionConfig = opts.compressed_store.into();

    let verbose_store = MongoStoreGateway::connect(&verbose_config.to_uri(), &verbose_config.database)?;
    let compressed_store =
        MongoStoreGateway::connect(&compressed_config.to_uri(), &compressed_config.database)?;

    let mismatches = check_consistency(&verbose_store, &compressed_store, &opts.project_name)?;

    if mismatches == 0 {
        tracing::info!("all code-entity-states match between the two databases");
    } else {
        tracing::warn!(mismatches, "found mismatched code-entity-states");
    }

    Ok(())
}

/// Walks every commit of `project_name` and compares its CES between the two
/// stores. Returns the total number of CES found to differ.
fn check_consistency<G: StoreGateway>(
    verbose_store: &G,
    compressed_store: &G,
    project_name: &str,
) -> Result<usize, lib::error::CoreError> {
    let verbose_vcs = verbose_store.resolve_vcs(project_name)?;
    let commits: Vec<_> = verbose_store.commits_of(verbose_vcs)?.collect();
    tracing::info!(num_commits = commits.len(), "loaded verbose commits");

    let mut total_mismatches = 0usize;

    for summary in commits {
        let commit_id = summary.commit_id;
        tracing::info!(%commit_id, "processing commit");

        let verbose_ces = verbose_store.ces_of(commit_id)?;
        let verbose_by_name: HashMap<&str, &CodeEntityState> = verbose_ces
            .iter()
            .map(|ces| (ces.long_name(), ces))
            .collect();

        let compressed_commit = compressed_store.commit(commit_id)?;
        let compressed_ces_ids: std::collections::HashSet<_> =
            compressed_commit.code_entity_states.iter().copied().collect();
        let compressed_ces_list = compressed_store.ces_by_ids(&compressed_ces_ids)?;
        let compressed_by_name: HashMap<&str, &CodeEntityState> = compressed_ces_list
            .iter()
            .map(|ces| (ces.long_name(), ces))
            .collect();

        tracing::info!(
            num_ces_verbose = verbose_by_name.len(),
            num_ces_compressed = compressed_by_name.len(),
            "CES counts for commit"
        );

        let mut commit_mismatches = 0usize;
        for (long_name, verbose_ces) in &verbose_by_name {
            let Some(compressed_ces) = compressed_by_name.get(long_name) else {
                tracing::error!(long_name, "CES not found in compressed database");
                commit_mismatches += 1;
                continue;
            };

            if !equivalent(&verbose_ces.attributes, &compressed_ces.attributes, EXCLUDED_FIELDS) {
                tracing::error!(
                    long_name,
                    verbose_id = %verbose_ces.id,
                    compressed_id = %compressed_ces.id,
                    "CES attributes differ between databases"
                );
                commit_mismatches += 1;
                continue;
            }

            if let (Some(verbose_parent), Some(compressed_parent)) =
                (verbose_ces.ce_parent_id, compressed_ces.ce_parent_id)
            {
                let verbose_parent_ces = verbose_store.ces_by_id(verbose_parent)?;
                let compressed_parent_ces = compressed_store.ces_by_id(compressed_parent)?;
                if !equivalent(
                    &verbose_parent_ces.attributes,
                    &compressed_parent_ces.attributes,
                    EXCLUDED_FIELDS,
                ) {
                    tracing::error!(long_name, "ce_parent_id of CES differs between databases");
                    commit_mismatches += 1;
                }
            }
        }

        tracing::info!(commit_mismatches, %commit_id, "finished commit");
        total_mismatches += commit_mismatches;
    }

    Ok(total_mismatches)
}

//! Entry point for the `memeshark` binary: parses `CompressOpts`, installs
//! logging and error reporting, connects to the document store, and runs the
//! deduplication engine end to end.

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use lib::config::CompressConfig;
use lib::error::CoreError;
use memeshark_opts::CompressOpts;
use memeshark_store_mongo::MongoStoreGateway;

/// Installs a `tracing` subscriber whose verbosity follows `--log-level`
/// unless overridden by `RUST_LOG`, and an `ErrorLayer` so `color-eyre`
/// reports can include a span trace. Mirrors the teacher's
/// `install_tracing`, trimmed of the Chrome-profiling layer this batch job
/// has no use for (see DESIGN.md).
fn install_tracing(default_level: tracing::Level) -> eyre::Result<()> {
    let default_directive = LevelFilter::from_level(default_level);
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .try_init()?;

    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opts = CompressOpts::parse();
    install_tracing(opts.log_level.to_tracing_level())?;

    let config: CompressConfig = opts.into();
    let uri = config.store.to_uri();
    let database = config.store.database.clone();
    let processes = if config.processes == 0 {
        num_cpus::get()
    } else {
        config.processes
    };

    let result = memeshark_scheduler::compress(
        &config.project_name,
        move || {
            MongoStoreGateway::connect(&uri, &database)
                .expect("failed to open a document store connection on worker thread")
        },
        processes,
    );

    match result {
        Ok(stats) => {
            tracing::info!(?stats, "memeshark finished");
            Ok(())
        }
        Err(err @ CoreError::ProjectMissing(_)) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

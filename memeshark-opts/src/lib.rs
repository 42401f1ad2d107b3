//! The command-line options for memeSHARK's binaries.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

use std::str::FromStr;

use clap::{Args, Parser};

use lib::config::{CompressConfig, LogLevel, StoreConnectionConfig};

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::from_str(s)
}

/// Connection parameters for one document store, shared between `memeshark`
/// and `memeshark-consistency-checker`.
///
/// Grounded in `pycoshark.utils.get_base_argparser`'s `-H`/`-p`/`-U`/`-P`/
/// `-DB`/`-a`/`--ssl` flag set.
#[derive(Args, Debug, Clone)]
pub struct StoreConnectionArgs {
    /// Hostname of the document store.
    #[clap(value_parser, long = "db-hostname", short = 'H', default_value = "localhost")]
    pub hostname: String,

    /// Port of the document store.
    #[clap(value_parser, long = "db-port", short = 'p', default_value_t = 27017)]
    pub port: u16,

    /// Database user name.
    #[clap(value_parser, long = "db-user", short = 'U')]
    pub user: Option<String>,

    /// Database user password.
    #[clap(value_parser, long = "db-password", short = 'P')]
    pub password: Option<String>,

    /// Database name to store the data in.
    #[clap(value_parser, long = "db-database", short = 'D', default_value = "smartshark")]
    pub database: String,

    /// Database that is used for authentication.
    #[clap(value_parser, long = "db-authentication", short = 'a')]
    pub authentication_db: Option<String>,

    /// Enables ssl for the database connection.
    #[clap(action, long = "ssl")]
    pub ssl: bool,
}

impl From<StoreConnectionArgs> for StoreConnectionConfig {
    fn from(args: StoreConnectionArgs) -> Self {
        StoreConnectionConfig {
            hostname: args.hostname,
            port: args.port,
            user: args.user,
            password: args.password,
            database: args.database,
            authentication_db: args.authentication_db,
            ssl: args.ssl,
        }
    }
}

/// Options for the `memeshark` compression run (§6 `CompressOpts`).
#[derive(Parser, Debug)]
#[clap(
    name = "memeshark",
    about = "Deduplicate code-entity-state records across a project's commit history."
)]
pub struct CompressOpts {
    /// Name of the project to process.
    #[clap(value_parser, long = "project-name", short = 'n')]
    pub project_name: String,

    /// Number of worker threads to process commits in parallel.
    #[clap(value_parser, long = "processes", short = 'c', default_value_t = 1)]
    pub processes: usize,

    /// Sets the log level: DEBUG, INFO, WARNING, ERROR, CRITICAL.
    #[clap(value_parser = parse_log_level, long = "log-level", default_value = "DEBUG")]
    pub log_level: LogLevel,

    /// Document store connection parameters.
    #[clap(flatten)]
    pub store: StoreConnectionArgs,
}

impl From<CompressOpts> for CompressConfig {
    fn from(opts: CompressOpts) -> Self {
        CompressConfig {
            project_name: opts.project_name,
            processes: opts.processes,
            log_level: opts.log_level,
            store: opts.store.into(),
        }
    }
}

/// Options for `memeshark-consistency-checker`, which compares CES counts
/// between an unprocessed and a processed database (§6
/// `ConsistencyCheckerOpts`).
///
/// Grounded in `tests/consistency_checker.py`'s `-U1/-P1/-DB1/...` (the
/// verbose, unprocessed database) and `-U2/-P2/-DB2/...` (the compressed
/// database) argument pairs.
#[derive(Parser, Debug)]
#[clap(
    name = "memeshark-consistency-checker",
    about = "Compare CES counts between an unprocessed and a compressed database."
)]
pub struct ConsistencyCheckerOpts {
    /// Name of the project to check.
    #[clap(value_parser, long = "project-name", short = 'n')]
    pub project_name: String,

    /// Sets the log level: DEBUG, INFO, WARNING, ERROR, CRITICAL.
    #[clap(value_parser = parse_log_level, long = "log-level", default_value = "DEBUG")]
    pub log_level: LogLevel,

    /// Connection parameters for the unprocessed (verbose) database.
    #[clap(flatten)]
    pub verbose_store: VerboseStoreConnectionArgs,

    /// Connection parameters for the compressed database.
    #[clap(flatten)]
    pub compressed_store: CompressedStoreConnectionArgs,
}

/// `StoreConnectionArgs` with its flags renamed to the `1` suffix used for
/// the unprocessed database, so both groups can be flattened into one
/// `clap::Parser` without colliding.
#[derive(Args, Debug, Clone)]
pub struct VerboseStoreConnectionArgs {
    #[clap(value_parser, long = "db-hostname-1", default_value = "localhost")]
    pub hostname: String,
    #[clap(value_parser, long = "db-port-1", default_value_t = 27017)]
    pub port: u16,
    #[clap(value_parser, long = "db-user-1", short = 'U')]
    pub user: Option<String>,
    #[clap(value_parser, long = "db-password-1", short = 'P')]
    pub password: Option<String>,
    #[clap(value_parser, long = "db-database-1", short = 'D', default_value = "smartshark")]
    pub database: String,
    #[clap(value_parser, long = "db-authentication-1")]
    pub authentication_db: Option<String>,
    #[clap(action, long = "ssl-1")]
    pub ssl: bool,
}

/// `StoreConnectionArgs` with its flags renamed to the `2` suffix used for
/// the compressed database.
#[derive(Args, Debug, Clone)]
pub struct CompressedStoreConnectionArgs {
    #[clap(value_parser, long = "db-hostname-2", default_value = "localhost")]
    pub hostname: String,
    #[clap(value_parser, long = "db-port-2", default_value_t = 27017)]
    pub port: u16,
    #[clap(value_parser, long = "db-user-2")]
    pub user: Option<String>,
    #[clap(value_parser, long = "db-password-2")]
    pub password: Option<String>,
    #[clap(value_parser, long = "db-database-2", default_value = "smartshark")]
    pub database: String,
    #[clap(value_parser, long = "db-authentication-2")]
    pub authentication_db: Option<String>,
    #[clap(action, long = "ssl-2")]
    pub ssl: bool,
}

impl From<VerboseStoreConnectionArgs> for StoreConnectionConfig {
    fn from(args: VerboseStoreConnectionArgs) -> Self {
        StoreConnectionConfig {
            hostname: args.hostname,
            port: args.port,
            user: args.user,
            password: args.password,
            database: args.database,
            authentication_db: args.authentication_db,
            ssl: args.ssl,
        }
    }
}

impl From<CompressedStoreConnectionArgs> for StoreConnectionConfig {
    fn from(args: CompressedStoreConnectionArgs) -> Self {
        StoreConnectionConfig {
            hostname: args.hostname,
            port: args.port,
            user: args.user,
            password: args.password,
            database: args.database,
            authentication_db: args.authentication_db,
            ssl: args.ssl,
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use ratus_core::engine::memdb::MemDbConfig;
use ratus_core::engine::mongodb::MongoDbConfig;

/// Configuration for the Ratus server, read from command line arguments
/// with environment variable fallbacks. A `.env` file is loaded before
/// parsing when present.
#[derive(Parser, Debug, Clone)]
#[command(name = "ratus-server")]
#[command(about = "RESTful asynchronous task queue server", version)]
pub struct Config {
    /// Port on which to listen for API requests. A port of zero does not
    /// start the API server, leaving the instance to run background jobs
    /// only.
    #[arg(short, long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Address on which to listen for API requests.
    #[arg(short, long, env = "BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Name of the storage engine to be used.
    #[arg(long, env = "ENGINE", default_value = "mongodb")]
    pub engine: String,

    /// Interval for running periodic background jobs such as recovering and
    /// expiring tasks. An interval of zero does not start the jobs.
    #[arg(long, env = "CHORE_INTERVAL", default_value = "10s", value_parser = humantime::parse_duration)]
    pub chore_interval: Duration,

    /// Delay before the initial execution of background jobs to avoid
    /// spikes while starting multiple instances.
    #[arg(long, env = "CHORE_INITIAL_DELAY", default_value = "0s", value_parser = humantime::parse_duration)]
    pub chore_initial_delay: Duration,

    /// Randomly defer the initial execution of background jobs within a
    /// range that does not exceed the initial delay.
    #[arg(long, env = "CHORE_INITIAL_RANDOM", default_value_t = false)]
    pub chore_initial_random: bool,

    /// Maximum number of resources to return in pagination.
    #[arg(long, env = "PAGINATION_MAX_LIMIT", default_value_t = 100)]
    pub pagination_max_limit: i64,

    /// Maximum number of resources to be skipped in pagination.
    #[arg(long, env = "PAGINATION_MAX_OFFSET", default_value_t = 10000)]
    pub pagination_max_offset: i64,

    /// Path to the snapshot file for the in-memory engine.
    #[arg(long, env = "MEMDB_SNAPSHOT_PATH")]
    pub memdb_snapshot_path: Option<PathBuf>,

    /// Interval for writing snapshots to disk.
    #[arg(long, env = "MEMDB_SNAPSHOT_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub memdb_snapshot_interval: Duration,

    /// Retention period for completed tasks in the in-memory engine.
    #[arg(long, env = "MEMDB_RETENTION_PERIOD", default_value = "72h", value_parser = humantime::parse_duration)]
    pub memdb_retention_period: Duration,

    /// Connection URI of the MongoDB deployment to connect to.
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://127.0.0.1:27017")]
    pub mongodb_uri: String,

    /// Name of the MongoDB database to use.
    #[arg(long, env = "MONGODB_DATABASE", default_value = "ratus")]
    pub mongodb_database: String,

    /// Name of the MongoDB collection to store tasks.
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "tasks")]
    pub mongodb_collection: String,

    /// Retention period for completed tasks in the MongoDB engine.
    #[arg(long, env = "MONGODB_RETENTION_PERIOD", default_value = "72h", value_parser = humantime::parse_duration)]
    pub mongodb_retention_period: Duration,

    /// Disable automatic index creation on startup.
    #[arg(long, env = "MONGODB_DISABLE_INDEX_CREATION", default_value_t = false)]
    pub mongodb_disable_index_creation: bool,

    /// Disable transparent fallbacks for unsupported operations.
    #[arg(long, env = "MONGODB_DISABLE_AUTO_FALLBACK", default_value_t = false)]
    pub mongodb_disable_auto_fallback: bool,

    /// Disable atomic polling and fall back to optimistic locking.
    #[arg(long, env = "MONGODB_DISABLE_ATOMIC_POLL", default_value_t = false)]
    pub mongodb_disable_atomic_poll: bool,
}

/// Pagination bounds shared with the request extractors.
#[derive(Debug, Clone, Copy)]
pub struct PaginationConfig {
    pub max_limit: i64,
    pub max_offset: i64,
}

impl Config {
    pub fn pagination(&self) -> PaginationConfig {
        PaginationConfig {
            max_limit: self.pagination_max_limit,
            max_offset: self.pagination_max_offset,
        }
    }

    pub fn memdb(&self) -> MemDbConfig {
        MemDbConfig {
            snapshot_path: self.memdb_snapshot_path.clone(),
            snapshot_interval: self.memdb_snapshot_interval,
            retention_period: self.memdb_retention_period,
        }
    }

    pub fn mongodb(&self) -> MongoDbConfig {
        MongoDbConfig {
            uri: self.mongodb_uri.clone(),
            database: self.mongodb_database.clone(),
            collection: self.mongodb_collection.clone(),
            retention_period: self.mongodb_retention_period,
            disable_index_creation: self.mongodb_disable_index_creation,
            disable_auto_fallback: self.mongodb_disable_auto_fallback,
            disable_atomic_poll: self.mongodb_disable_atomic_poll,
        }
    }
}

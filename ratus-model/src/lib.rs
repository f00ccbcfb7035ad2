//! Core data model definitions shared across Ratus crates.

pub mod commit;
pub mod promise;
pub mod task;
pub mod topic;

pub use commit::Commit;
pub use promise::{Promise, Promises};
pub use task::{Task, TaskState, Tasks};
pub use topic::{Deleted, Topic, Topics, Updated};

/// Length of the nonce strings generated for tasks entering the active state.
pub const NONCE_LENGTH: usize = 16;

/// Default number of resources to return for paginated endpoints.
pub const DEFAULT_LIMIT: i64 = 10;

/// Default timeout duration applied to promises that carry neither a
/// deadline nor an explicit timeout.
pub const DEFAULT_TIMEOUT: &str = "10m";

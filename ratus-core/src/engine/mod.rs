//! The storage engine contract and its backends.

use async_trait::async_trait;

use ratus_model::{Commit, Deleted, Promise, Task, Topic, Updated};

use crate::error::Result;

pub mod memdb;
pub mod mongodb;

pub use self::memdb::MemDbEngine;
pub use self::mongodb::MongoDbEngine;

/// Contract implemented by every storage backend.
///
/// The engine is the single source of truth for the task state machine:
/// within a single task ID, state transitions are serialized by the engine's
/// internal transaction or by optimistic concurrency control. All methods
/// must be safe for concurrent callers.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Open or connect to the storage engine.
    async fn open(&self) -> Result<()>;
    /// Close or disconnect from the storage engine.
    async fn close(&self) -> Result<()>;
    /// Clear all data and close the storage engine.
    async fn destroy(&self) -> Result<()>;
    /// Probe the storage engine and fail if it is not ready.
    async fn ready(&self) -> Result<()>;

    /// Recover timed out tasks and delete expired tasks.
    async fn chore(&self) -> Result<()>;
    /// Claim the next available task in the topic based on the scheduled time.
    async fn poll(&self, topic: &str, promise: &Promise) -> Result<Task>;
    /// Apply a set of updates to a task and return the updated task.
    async fn commit(&self, id: &str, commit: &Commit) -> Result<Task>;

    /// List all topics.
    async fn list_topics(&self, limit: usize, offset: usize) -> Result<Vec<Topic>>;
    /// Delete all topics and tasks.
    async fn delete_topics(&self) -> Result<Deleted>;
    /// Get information about a topic.
    async fn get_topic(&self, topic: &str) -> Result<Topic>;
    /// Delete a topic and its tasks.
    async fn delete_topic(&self, topic: &str) -> Result<Deleted>;

    /// List all tasks in a topic.
    async fn list_tasks(&self, topic: &str, limit: usize, offset: usize) -> Result<Vec<Task>>;
    /// Insert a batch of tasks while ignoring existing ones.
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<Updated>;
    /// Insert or update a batch of tasks.
    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<Updated>;
    /// Delete all tasks in a topic.
    async fn delete_tasks(&self, topic: &str) -> Result<Deleted>;
    /// Get a task by its unique ID.
    async fn get_task(&self, id: &str) -> Result<Task>;
    /// Insert a new task.
    async fn insert_task(&self, task: &Task) -> Result<Updated>;
    /// Insert or update a task.
    async fn upsert_task(&self, task: &Task) -> Result<Updated>;
    /// Delete a task by its unique ID.
    async fn delete_task(&self, id: &str) -> Result<Deleted>;

    /// List all promises in a topic.
    async fn list_promises(&self, topic: &str, limit: usize, offset: usize)
        -> Result<Vec<Promise>>;
    /// Delete all promises in a topic.
    async fn delete_promises(&self, topic: &str) -> Result<Deleted>;
    /// Get a promise by the unique ID of its target task.
    async fn get_promise(&self, id: &str) -> Result<Promise>;
    /// Claim the target task if it is in pending state.
    async fn insert_promise(&self, promise: &Promise) -> Result<Task>;
    /// Claim the target task regardless of its current state.
    async fn upsert_promise(&self, promise: &Promise) -> Result<Task>;
    /// Delete a promise by the unique ID of its target task.
    async fn delete_promise(&self, id: &str) -> Result<Deleted>;
}

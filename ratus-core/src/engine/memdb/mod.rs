//! In-memory storage engine with optional snapshot persistence.
//!
//! Tasks live in an indexed table guarded by a single reader-writer lock.
//! Readers clone values out of the table and writers insert fresh clones, so
//! no caller ever observes or mutates a value owned by the engine. Snapshots
//! serialize every task as a sequence of self-describing binary records and
//! atomically replace the snapshot file.

mod promise;
mod queue;
mod snapshot;
mod table;
mod task;
mod topic;

use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use ratus_model::{Commit, Promise, Task, TaskState, NONCE_LENGTH};

use crate::error::{Error, Result};
use crate::nonce;

use super::Engine;

use self::table::TaskTable;

/// Configuration for the in-memory storage engine.
#[derive(Debug, Clone)]
pub struct MemDbConfig {
    /// Path to the snapshot file. Snapshotting is disabled when unset.
    pub snapshot_path: Option<PathBuf>,
    /// Interval for writing snapshots to disk. The snapshot check runs
    /// inside the chore pass, so the effective interval is the larger of
    /// this value and the chore interval.
    pub snapshot_interval: Duration,
    /// Retention period for completed tasks.
    pub retention_period: Duration,
}

impl Default for MemDbConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(5 * 60),
            retention_period: Duration::from_secs(72 * 60 * 60),
        }
    }
}

/// Storage engine backed by an indexed in-memory task table.
pub struct MemDbEngine {
    config: MemDbConfig,
    table: RwLock<Option<TaskTable>>,
    saved: Mutex<Option<Instant>>,
}

impl MemDbEngine {
    pub fn new(config: MemDbConfig) -> Self {
        Self {
            config,
            table: RwLock::new(None),
            saved: Mutex::new(None),
        }
    }

    fn with_read<T>(&self, f: impl FnOnce(&TaskTable) -> Result<T>) -> Result<T> {
        let guard = self
            .table
            .read()
            .map_err(|_| Error::Internal("task table lock poisoned".to_owned()))?;
        let table = guard
            .as_ref()
            .ok_or_else(|| Error::ServiceUnavailable("storage engine is not open".to_owned()))?;
        f(table)
    }

    fn with_write<T>(&self, f: impl FnOnce(&mut TaskTable) -> Result<T>) -> Result<T> {
        let mut guard = self
            .table
            .write()
            .map_err(|_| Error::Internal("task table lock poisoned".to_owned()))?;
        let table = guard
            .as_mut()
            .ok_or_else(|| Error::ServiceUnavailable("storage engine is not open".to_owned()))?;
        f(table)
    }
}

#[async_trait]
impl Engine for MemDbEngine {
    async fn open(&self) -> Result<()> {
        let mut table = TaskTable::default();

        // Load data from the snapshot file if required; a missing file
        // is not an error.
        if let Some(path) = &self.config.snapshot_path {
            if let Some(tasks) = snapshot::load(path)? {
                for t in tasks {
                    table.insert(t);
                }
            }
        }

        let mut guard = self
            .table
            .write()
            .map_err(|_| Error::Internal("task table lock poisoned".to_owned()))?;
        *guard = Some(table);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(path) = &self.config.snapshot_path {
            let tasks: Vec<Task> =
                self.with_read(|table| Ok(table.iter().map(|t| (**t).clone()).collect()))?;
            snapshot::save(tasks, path)?;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.delete_topics().await?;
        self.close().await?;

        // Remove the snapshot file after closing.
        if let Some(path) = &self.config.snapshot_path {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(Error::Internal(format!(
                        "failed to remove snapshot file: {e}"
                    )));
                }
            }
        }

        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        let guard = self
            .table
            .read()
            .map_err(|_| Error::Internal("task table lock poisoned".to_owned()))?;
        if guard.is_none() {
            return Err(Error::ServiceUnavailable(
                "storage engine is not open".to_owned(),
            ));
        }
        Ok(())
    }

    async fn chore(&self) -> Result<()> {
        self.run_chore()
    }

    async fn poll(&self, topic: &str, promise: &Promise) -> Result<Task> {
        self.run_poll(topic, promise)
    }

    async fn commit(&self, id: &str, commit: &Commit) -> Result<Task> {
        self.run_commit(id, commit)
    }

    async fn list_topics(&self, limit: usize, offset: usize) -> Result<Vec<ratus_model::Topic>> {
        self.run_list_topics(limit, offset)
    }

    async fn delete_topics(&self) -> Result<ratus_model::Deleted> {
        self.run_delete_topics()
    }

    async fn get_topic(&self, topic: &str) -> Result<ratus_model::Topic> {
        self.run_get_topic(topic)
    }

    async fn delete_topic(&self, topic: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_tasks(topic)
    }

    async fn list_tasks(
        &self,
        topic: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>> {
        self.run_list_tasks(topic, limit, offset)
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<ratus_model::Updated> {
        self.run_insert_tasks(tasks)
    }

    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<ratus_model::Updated> {
        self.run_upsert_tasks(tasks)
    }

    async fn delete_tasks(&self, topic: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_tasks(topic)
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        self.run_get_task(id)
    }

    async fn insert_task(&self, task: &Task) -> Result<ratus_model::Updated> {
        self.run_insert_task(task)
    }

    async fn upsert_task(&self, task: &Task) -> Result<ratus_model::Updated> {
        self.run_upsert_task(task)
    }

    async fn delete_task(&self, id: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_task(id)
    }

    async fn list_promises(
        &self,
        topic: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Promise>> {
        self.run_list_promises(topic, limit, offset)
    }

    async fn delete_promises(&self, topic: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_promises(topic)
    }

    async fn get_promise(&self, id: &str) -> Result<Promise> {
        self.run_get_promise(id)
    }

    async fn insert_promise(&self, promise: &Promise) -> Result<Task> {
        self.run_insert_promise(promise)
    }

    async fn upsert_promise(&self, promise: &Promise) -> Result<Task> {
        self.run_upsert_promise(promise)
    }

    async fn delete_promise(&self, id: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_promise(id)
    }
}

/// A copy of the task with the state set back to pending and the nonce
/// cleared to invalidate subsequent commits.
fn update_ops_recover(v: &Task) -> Task {
    let mut u = v.clone();
    u.state = TaskState::Pending;
    u.nonce.clear();
    u
}

/// A copy of the task set to the active state with claim fields populated
/// from the promise.
fn update_ops_consume(v: &Task, p: &Promise, t: chrono::DateTime<Utc>) -> Task {
    let mut u = v.clone();
    u.state = TaskState::Active;
    u.nonce = nonce::generate(NONCE_LENGTH);
    u.consumer = p.consumer.clone();
    u.consumed = Some(t);
    u.deadline = p.deadline;
    u
}

/// A copy of the task with the updates specified in the commit applied.
fn update_ops_commit(v: &Task, m: &Commit) -> Task {
    let mut u = v.clone();
    u.nonce.clear();
    if !m.topic.is_empty() {
        u.topic = m.topic.clone();
    }
    if let Some(s) = m.state {
        u.state = s;
    }
    if let Some(s) = m.scheduled {
        u.scheduled = Some(s);
    }
    if let Some(p) = &m.payload {
        u.payload = Some(p.clone());
    }
    u
}

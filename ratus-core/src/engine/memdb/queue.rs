use std::time::Instant;

use chrono::{Duration, Utc};

use ratus_model::{Commit, Promise, Task};

use crate::error::{Error, Result};

use super::{snapshot, update_ops_commit, update_ops_consume, update_ops_recover, MemDbEngine};

impl MemDbEngine {
    /// Recover timed out tasks and delete expired tasks, then write a
    /// snapshot if one is due.
    pub(super) fn run_chore(&self) -> Result<()> {
        let n = Utc::now();
        let retention = Duration::from_std(self.config.retention_period)
            .map_err(|_| Error::Internal("retention period out of range".to_owned()))?;

        self.with_write(|table| {
            // Recover tasks that have timed out.
            for t in table.active_deadline_reached(n) {
                table.insert(update_ops_recover(&t));
            }

            // Delete completed tasks that have exceeded their retention period.
            for t in table.completed_consumed_before(n - retention) {
                table.remove(&t.id);
            }

            Ok(())
        })?;

        // Write a snapshot if at least the snapshot interval has elapsed
        // since the last one. The file is written outside the table lock.
        if let Some(path) = &self.config.snapshot_path {
            let due = {
                let mut saved = self
                    .saved
                    .lock()
                    .map_err(|_| Error::Internal("snapshot timestamp lock poisoned".to_owned()))?;
                match *saved {
                    Some(t) if t.elapsed() < self.config.snapshot_interval => false,
                    _ => {
                        *saved = Some(Instant::now());
                        true
                    }
                }
            };
            if due {
                let tasks: Vec<_> =
                    self.with_read(|table| Ok(table.iter().map(|t| (**t).clone()).collect()))?;
                let count = tasks.len();
                snapshot::save(tasks, path)?;
                tracing::debug!(path = %path.display(), count, "snapshot written");
            }
        }

        Ok(())
    }

    /// Claim the next available task in the topic based on the scheduled time.
    pub(super) fn run_poll(&self, topic: &str, promise: &Promise) -> Result<Task> {
        self.with_write(|table| {
            let n = Utc::now();
            let t = table
                .first_pending(topic)
                .ok_or_else(|| Error::NotFound("no task is available in the topic".to_owned()))?;

            // The earliest task in the topic may still be scheduled for the
            // future, in which case nothing is eligible.
            if t.scheduled.is_some_and(|s| s > n) {
                return Err(Error::NotFound(
                    "no task is available in the topic".to_owned(),
                ));
            }

            let u = update_ops_consume(&t, promise, n);
            table.insert(u.clone());
            Ok(u)
        })
    }

    /// Apply a set of updates to a task and return the updated task.
    pub(super) fn run_commit(&self, id: &str, m: &Commit) -> Result<Task> {
        self.with_write(|table| {
            let t = table
                .get(id)
                .ok_or_else(|| Error::NotFound("task not found".to_owned()))?;
            if !m.nonce.is_empty() && m.nonce != t.nonce {
                return Err(Error::Conflict("nonce does not match".to_owned()));
            }
            let u = update_ops_commit(t, m);
            table.insert(u.clone());
            Ok(u)
        })
    }
}

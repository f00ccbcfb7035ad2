use chrono::Utc;

use ratus_model::{Deleted, Promise, Task, TaskState};

use crate::error::{Error, Result};

use super::{update_ops_consume, update_ops_recover, MemDbEngine};

/// A promise in effect is represented as the claim fields of an active task.
fn project(t: &Task) -> Promise {
    Promise {
        id: t.id.clone(),
        consumer: t.consumer.clone(),
        deadline: t.deadline,
        timeout: String::new(),
    }
}

impl MemDbEngine {
    pub(super) fn run_list_promises(
        &self,
        topic: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Promise>> {
        self.with_read(|table| {
            Ok(table
                .active_in_topic(topic)
                .skip(offset)
                .take(limit)
                .map(|t| project(t))
                .collect())
        })
    }

    /// Deleting promises is equivalent to setting the states of the active
    /// tasks back to pending and clearing the nonce fields.
    pub(super) fn run_delete_promises(&self, topic: &str) -> Result<Deleted> {
        self.with_write(|table| {
            let active: Vec<_> = table.active_in_topic(topic).cloned().collect();
            let deleted = active.len() as i64;
            for t in active {
                table.insert(update_ops_recover(&t));
            }
            Ok(Deleted { deleted })
        })
    }

    pub(super) fn run_get_promise(&self, id: &str) -> Result<Promise> {
        self.with_read(|table| {
            let t = table
                .get(id)
                .ok_or_else(|| Error::NotFound("promise not found".to_owned()))?;
            if t.state != TaskState::Active {
                return Err(Error::NotFound("promise not found".to_owned()));
            }
            Ok(project(t))
        })
    }

    /// Claim the target task if it is in pending state.
    pub(super) fn run_insert_promise(&self, p: &Promise) -> Result<Task> {
        self.with_write(|table| {
            let t = table
                .get(&p.id)
                .ok_or_else(|| Error::NotFound("task not found".to_owned()))?;
            if t.state != TaskState::Pending {
                return Err(Error::Conflict(
                    "the target task is not in pending state".to_owned(),
                ));
            }
            let u = update_ops_consume(t, p, Utc::now());
            table.insert(u.clone());
            Ok(u)
        })
    }

    /// Claim the target task regardless of its current state.
    pub(super) fn run_upsert_promise(&self, p: &Promise) -> Result<Task> {
        self.with_write(|table| {
            let t = table
                .get(&p.id)
                .ok_or_else(|| Error::NotFound("task not found".to_owned()))?;
            let u = update_ops_consume(t, p, Utc::now());
            table.insert(u.clone());
            Ok(u)
        })
    }

    /// Deleting a promise is equivalent to setting the state of the target
    /// task back to pending and clearing the nonce field.
    pub(super) fn run_delete_promise(&self, id: &str) -> Result<Deleted> {
        self.with_write(|table| {
            let recovered = match table.get(id) {
                Some(t) if t.state == TaskState::Active => Some(update_ops_recover(t)),
                _ => None,
            };
            match recovered {
                Some(u) => {
                    table.insert(u);
                    Ok(Deleted { deleted: 1 })
                }
                None => Ok(Deleted { deleted: 0 }),
            }
        })
    }
}

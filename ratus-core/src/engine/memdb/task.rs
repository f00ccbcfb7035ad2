use ratus_model::{Deleted, Task, Updated};

use crate::error::{Error, Result};

use super::MemDbEngine;

impl MemDbEngine {
    pub(super) fn run_list_tasks(
        &self,
        topic: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>> {
        self.with_read(|table| {
            Ok(table
                .tasks_in_topic(topic)
                .skip(offset)
                .take(limit)
                .map(|t| (**t).clone())
                .collect())
        })
    }

    /// Insert a batch of tasks while ignoring existing ones. Inserts as many
    /// tasks as possible; existing IDs are skipped, not errors.
    pub(super) fn run_insert_tasks(&self, tasks: &[Task]) -> Result<Updated> {
        self.with_write(|table| {
            let mut created = 0;
            for t in tasks {
                if table.get(&t.id).is_none() {
                    table.insert(t.clone());
                    created += 1;
                }
            }
            Ok(Updated {
                created,
                updated: 0,
            })
        })
    }

    pub(super) fn run_upsert_tasks(&self, tasks: &[Task]) -> Result<Updated> {
        self.with_write(|table| {
            let mut v = Updated::default();
            for t in tasks {
                if table.get(&t.id).is_some() {
                    v.updated += 1;
                } else {
                    v.created += 1;
                }
                table.insert(t.clone());
            }
            Ok(v)
        })
    }

    pub(super) fn run_delete_tasks(&self, topic: &str) -> Result<Deleted> {
        self.with_write(|table| {
            let ids: Vec<String> = table.tasks_in_topic(topic).map(|t| t.id.clone()).collect();
            for id in &ids {
                table.remove(id);
            }
            Ok(Deleted {
                deleted: ids.len() as i64,
            })
        })
    }

    pub(super) fn run_get_task(&self, id: &str) -> Result<Task> {
        self.with_read(|table| {
            table
                .get(id)
                .map(|t| (**t).clone())
                .ok_or_else(|| Error::NotFound("task not found".to_owned()))
        })
    }

    pub(super) fn run_insert_task(&self, task: &Task) -> Result<Updated> {
        self.with_write(|table| {
            if table.get(&task.id).is_some() {
                return Err(Error::Conflict("task already exists".to_owned()));
            }
            table.insert(task.clone());
            Ok(Updated {
                created: 1,
                updated: 0,
            })
        })
    }

    pub(super) fn run_upsert_task(&self, task: &Task) -> Result<Updated> {
        self.with_write(|table| {
            let existed = table.get(&task.id).is_some();
            table.insert(task.clone());
            Ok(Updated {
                created: i64::from(!existed),
                updated: i64::from(existed),
            })
        })
    }

    pub(super) fn run_delete_task(&self, id: &str) -> Result<Deleted> {
        self.with_write(|table| {
            Ok(Deleted {
                deleted: i64::from(table.remove(id).is_some()),
            })
        })
    }
}

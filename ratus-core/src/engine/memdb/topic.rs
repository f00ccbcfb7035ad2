use ratus_model::{Deleted, Topic};

use crate::error::{Error, Result};

use super::table::TaskTable;
use super::MemDbEngine;

impl MemDbEngine {
    pub(super) fn run_list_topics(&self, limit: usize, offset: usize) -> Result<Vec<Topic>> {
        self.with_read(|table| {
            Ok(table
                .topics()
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|(name, count)| Topic {
                    name,
                    count: Some(count),
                })
                .collect())
        })
    }

    pub(super) fn run_delete_topics(&self) -> Result<Deleted> {
        let mut guard = self
            .table
            .write()
            .map_err(|_| Error::Internal("task table lock poisoned".to_owned()))?;
        let table = guard
            .as_mut()
            .ok_or_else(|| Error::ServiceUnavailable("storage engine is not open".to_owned()))?;

        // Return the number of deleted tasks, not the number of topics.
        let deleted = table.len() as i64;
        *table = TaskTable::default();
        Ok(Deleted { deleted })
    }

    pub(super) fn run_get_topic(&self, topic: &str) -> Result<Topic> {
        self.with_read(|table| {
            // Topics are not created manually, their existence depends
            // entirely on whether tasks currently carry the topic name.
            let count = table.tasks_in_topic(topic).count() as i64;
            if count == 0 {
                return Err(Error::NotFound("topic not found".to_owned()));
            }
            Ok(Topic {
                name: topic.to_owned(),
                count: Some(count),
            })
        })
    }
}

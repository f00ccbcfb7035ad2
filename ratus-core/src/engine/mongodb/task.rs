use bson::doc;
use futures::TryStreamExt;
use mongodb::error::ErrorKind;
use mongodb::options::{
    DeleteOptions, FindOneOptions, FindOptions, InsertManyOptions, ReplaceOptions,
};

use ratus_model::{Deleted, Task, Updated};

use crate::error::{Error, Result};

use super::document::TaskDocument;
use super::{
    driver_error, hint, is_duplicate_key, MongoDbEngine, OpResult, INDEX_ID, INDEX_TOPIC,
};

impl MongoDbEngine {
    pub(super) async fn run_list_tasks(
        &self,
        topic: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>> {
        let options = FindOptions::builder()
            .limit(limit as i64)
            .skip(offset as u64)
            .hint(hint(INDEX_TOPIC))
            .build();
        let cursor = self
            .tasks
            .find(doc! {"topic": topic}, options)
            .await
            .map_err(driver_error)?;
        let documents: Vec<TaskDocument> = cursor.try_collect().await.map_err(driver_error)?;
        documents.into_iter().map(Task::try_from).collect()
    }

    /// Insert tasks with an unordered write so the server continues past
    /// duplicate IDs, then count only the documents actually created.
    pub(super) async fn run_insert_tasks(&self, tasks: &[Task]) -> Result<Updated> {
        if tasks.is_empty() {
            return Ok(Updated::default());
        }
        let documents: Vec<TaskDocument> = tasks
            .iter()
            .map(TaskDocument::try_from)
            .collect::<Result<_>>()?;
        let options = InsertManyOptions::builder().ordered(false).build();
        match self.tasks.insert_many(documents, options).await {
            Ok(r) => Ok(Updated {
                created: r.inserted_ids.len() as i64,
                updated: 0,
            }),
            Err(e) => match duplicate_failures(&e) {
                Some(duplicates) => Ok(Updated {
                    created: tasks.len() as i64 - duplicates,
                    updated: 0,
                }),
                None => Err(driver_error(e)),
            },
        }
    }

    pub(super) async fn run_upsert_tasks(&self, tasks: &[Task]) -> Result<Updated> {
        if tasks.is_empty() {
            return Ok(Updated::default());
        }
        self.branch(
            &self.fallback_upsert_tasks,
            || self.upsert_tasks_replace(tasks),
            || self.upsert_tasks_delete_and_insert(tasks),
        )
        .await
    }

    /// Replace or insert each task keyed on its ID. Expected to work on
    /// unsharded collections and on collections sharded by the ID field.
    async fn upsert_tasks_replace(&self, tasks: &[Task]) -> OpResult<Updated> {
        let mut v = Updated::default();
        let replacements = tasks.iter().map(|t| async move {
            let d = TaskDocument::try_from(t)?;
            let options = ReplaceOptions::builder()
                .upsert(true)
                .hint(hint(INDEX_ID))
                .build();
            let r = self
                .tasks
                .replace_one(doc! {"_id": t.id.as_str()}, d, options)
                .await?;
            Ok::<_, super::OpError>(r)
        });
        for r in futures::future::try_join_all(replacements).await? {
            if r.upserted_id.is_some() {
                v.created += 1;
            } else {
                v.updated += r.modified_count as i64;
            }
        }
        Ok(v)
    }

    /// Delete tasks with the same IDs before inserting to avoid modifying
    /// shard key values, which sharded collections reject for replace
    /// operations. The number of deleted tasks is the number updated.
    async fn upsert_tasks_delete_and_insert(&self, tasks: &[Task]) -> OpResult<Updated> {
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let options = DeleteOptions::builder().hint(hint(INDEX_ID)).build();
        let r = self
            .tasks
            .delete_many(doc! {"_id": {"$in": ids}}, options)
            .await?;

        // Insert the tasks and ignore duplicate key errors caused by
        // concurrent writers racing the same IDs.
        self.run_insert_tasks(tasks).await?;

        Ok(Updated {
            created: tasks.len() as i64 - r.deleted_count as i64,
            updated: r.deleted_count as i64,
        })
    }

    pub(super) async fn run_get_task(&self, id: &str) -> Result<Task> {
        let options = FindOneOptions::builder()
            .allow_partial_results(true)
            .hint(hint(INDEX_ID))
            .build();
        match self
            .tasks
            .find_one(doc! {"_id": id}, options)
            .await
            .map_err(driver_error)?
        {
            Some(d) => d.try_into(),
            None => Err(Error::NotFound("task not found".to_owned())),
        }
    }

    pub(super) async fn run_insert_task(&self, task: &Task) -> Result<Updated> {
        let document = TaskDocument::try_from(task)?;
        if let Err(e) = self.tasks.insert_one(document, None).await {
            if is_duplicate_key(&e) {
                return Err(Error::Conflict("task already exists".to_owned()));
            }
            return Err(driver_error(e));
        }
        Ok(Updated {
            created: 1,
            updated: 0,
        })
    }

    pub(super) async fn run_upsert_task(&self, task: &Task) -> Result<Updated> {
        self.branch(
            &self.fallback_upsert_task,
            || async move { self.upsert_tasks_replace(std::slice::from_ref(task)).await },
            || async move {
                self.upsert_tasks_delete_and_insert(std::slice::from_ref(task)).await
            },
        )
        .await
    }

    pub(super) async fn run_delete_task(&self, id: &str) -> Result<Deleted> {
        let options = DeleteOptions::builder().hint(hint(INDEX_ID)).build();
        let r = self
            .tasks
            .delete_one(doc! {"_id": id}, options)
            .await
            .map_err(driver_error)?;
        Ok(Deleted {
            deleted: r.deleted_count as i64,
        })
    }
}

/// The number of duplicate-key failures in a bulk insert, or `None` if the
/// error carries anything other than duplicate-key write errors.
fn duplicate_failures(e: &mongodb::error::Error) -> Option<i64> {
    match e.kind.as_ref() {
        ErrorKind::BulkWrite(f) if f.write_concern_error.is_none() => {
            let errors = f.write_errors.as_deref().unwrap_or_default();
            if !errors.is_empty() && errors.iter().all(|w| w.code == 11000) {
                Some(errors.len() as i64)
            } else {
                None
            }
        }
        _ => None,
    }
}

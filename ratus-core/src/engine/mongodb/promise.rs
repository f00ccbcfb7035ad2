use bson::doc;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::{
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, ReturnDocument, UpdateOptions,
};

use ratus_model::{Deleted, Promise, Task, TaskState};

use crate::error::{Error, Result};

use super::document::PromiseDocument;
use super::{
    driver_error, hint, update_ops_consume, update_ops_recover, MongoDbEngine, OpResult,
    INDEX_ACTIVE_TOPIC, INDEX_ID,
};

fn filter_active_topic(topic: &str) -> bson::Document {
    doc! {
        "state": TaskState::Active.as_i32(),
        "topic": topic,
    }
}

impl MongoDbEngine {
    /// Promises in effect are represented as fields of the active tasks.
    pub(super) async fn run_list_promises(
        &self,
        topic: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Promise>> {
        let options = FindOptions::builder()
            .limit(limit as i64)
            .skip(offset as u64)
            .hint(hint(INDEX_ACTIVE_TOPIC))
            .build();
        let collection = self.tasks.clone_with_type::<PromiseDocument>();
        let cursor = collection
            .find(filter_active_topic(topic), options)
            .await
            .map_err(driver_error)?;
        let documents: Vec<PromiseDocument> =
            cursor.try_collect().await.map_err(driver_error)?;
        Ok(documents.into_iter().map(Promise::from).collect())
    }

    /// Deleting promises is equivalent to setting the states of the active
    /// tasks back to pending and clearing the nonce fields.
    pub(super) async fn run_delete_promises(&self, topic: &str) -> Result<Deleted> {
        let options = UpdateOptions::builder()
            .hint(hint(INDEX_ACTIVE_TOPIC))
            .build();
        let r = self
            .tasks
            .update_many(filter_active_topic(topic), update_ops_recover(), options)
            .await
            .map_err(driver_error)?;
        Ok(Deleted {
            deleted: r.modified_count as i64,
        })
    }

    pub(super) async fn run_get_promise(&self, id: &str) -> Result<Promise> {
        let filter = doc! {
            "_id": id,
            "state": TaskState::Active.as_i32(),
        };
        let options = FindOneOptions::builder().hint(hint(INDEX_ID)).build();
        let collection = self.tasks.clone_with_type::<PromiseDocument>();
        match collection
            .find_one(filter, options)
            .await
            .map_err(driver_error)?
        {
            Some(d) => Ok(d.into()),
            None => Err(Error::NotFound("promise not found".to_owned())),
        }
    }

    pub(super) async fn run_insert_promise(&self, promise: &Promise) -> Result<Task> {
        self.branch(
            &self.fallback_insert_promise,
            || self.insert_promise_atomic(promise),
            || self.insert_promise_optimistic(promise),
        )
        .await
    }

    /// Claim the pending target task with a single find-and-modify.
    /// Expected to work on unsharded collections and on collections sharded
    /// by the ID field.
    async fn insert_promise_atomic(&self, p: &Promise) -> OpResult<Task> {
        let filter = doc! {
            "_id": p.id.as_str(),
            "state": TaskState::Pending.as_i32(),
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .hint(hint(INDEX_ID))
            .build();
        match self
            .tasks
            .find_one_and_update(filter, update_ops_consume(p, Utc::now()), options)
            .await?
        {
            Some(d) => Ok(d.try_into()?),
            None => {
                // Distinguish a state mismatch from a missing task.
                if self.exists(doc! {"_id": p.id.as_str()}, INDEX_ID).await? {
                    Err(Error::Conflict("the target task is not in pending state".to_owned())
                        .into())
                } else {
                    Err(Error::NotFound("task not found".to_owned()).into())
                }
            }
        }
    }

    /// Peek at the target task, verify it is pending, then claim it with a
    /// full-key filter. A zero-row match means another consumer claimed it
    /// first; the claim is exclusive, so report a conflict.
    async fn insert_promise_optimistic(&self, p: &Promise) -> OpResult<Task> {
        let c = match self.peek(doc! {"_id": p.id.as_str()}, None, INDEX_ID).await? {
            Some(c) => c,
            None => return Err(Error::NotFound("task not found".to_owned()).into()),
        };
        if c.state != TaskState::Pending.as_i32() {
            return Err(
                Error::Conflict("the target task is not in pending state".to_owned()).into(),
            );
        }

        let filter = doc! {
            "_id": c.id,
            "topic": c.topic,
            "state": TaskState::Pending.as_i32(),
            "nonce": c.nonce,
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .hint(hint(INDEX_ID))
            .build();
        match self
            .tasks
            .find_one_and_update(filter, update_ops_consume(p, Utc::now()), options)
            .await?
        {
            Some(d) => Ok(d.try_into()?),
            None => Err(Error::Conflict("the target task is not in pending state".to_owned())
                .into()),
        }
    }

    pub(super) async fn run_upsert_promise(&self, promise: &Promise) -> Result<Task> {
        self.branch(
            &self.fallback_upsert_promise,
            || self.upsert_promise_atomic(promise),
            || self.upsert_promise_optimistic(promise),
        )
        .await
    }

    /// Claim the target task regardless of its state with a single
    /// find-and-modify keyed on the ID.
    async fn upsert_promise_atomic(&self, p: &Promise) -> OpResult<Task> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .hint(hint(INDEX_ID))
            .build();
        match self
            .tasks
            .find_one_and_update(
                doc! {"_id": p.id.as_str()},
                update_ops_consume(p, Utc::now()),
                options,
            )
            .await?
        {
            Some(d) => Ok(d.try_into()?),
            None => Err(Error::NotFound("task not found".to_owned()).into()),
        }
    }

    /// Peek at the target task and claim it with a full-key filter. A
    /// zero-row match means the task changed in between; the claim holds
    /// regardless of state, so retry immediately.
    async fn upsert_promise_optimistic(&self, p: &Promise) -> OpResult<Task> {
        loop {
            let c = match self.peek(doc! {"_id": p.id.as_str()}, None, INDEX_ID).await? {
                Some(c) => c,
                None => return Err(Error::NotFound("task not found".to_owned()).into()),
            };

            let filter = doc! {
                "_id": c.id,
                "topic": c.topic,
                "state": c.state,
                "nonce": c.nonce,
            };
            let options = FindOneAndUpdateOptions::builder()
                .return_document(ReturnDocument::After)
                .hint(hint(INDEX_ID))
                .build();
            match self
                .tasks
                .find_one_and_update(filter, update_ops_consume(p, Utc::now()), options)
                .await?
            {
                Some(d) => return Ok(d.try_into()?),
                None => continue,
            }
        }
    }

    /// Deleting a promise is equivalent to setting the state of the target
    /// task back to pending and clearing the nonce field.
    pub(super) async fn run_delete_promise(&self, id: &str) -> Result<Deleted> {
        let filter = doc! {
            "_id": id,
            "state": TaskState::Active.as_i32(),
        };
        let options = UpdateOptions::builder().hint(hint(INDEX_ID)).build();
        let r = self
            .tasks
            .update_one(filter, update_ops_recover(), options)
            .await
            .map_err(driver_error)?;
        Ok(Deleted {
            deleted: r.modified_count as i64,
        })
    }
}

use bson::doc;
use chrono::Utc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions};

use ratus_model::{Commit, Promise, Task};

use crate::error::{Error, Result};

use super::{
    driver_error, hint, query_ops_poll, update_ops_commit, update_ops_consume,
    update_ops_recover, MongoDbEngine, OpResult, INDEX_ACTIVE_DEADLINE, INDEX_ID,
    INDEX_PENDING_TOPIC_SCHEDULED,
};

impl MongoDbEngine {
    /// Recover tasks that have timed out. Deletion of expired tasks is
    /// handled by the TTL index and needs no code path here.
    pub(super) async fn run_chore(&self) -> Result<()> {
        let filter = doc! {
            "state": ratus_model::TaskState::Active.as_i32(),
            "deadline": {"$lt": bson::DateTime::from_chrono(Utc::now())},
        };
        let options = UpdateOptions::builder()
            .hint(hint(INDEX_ACTIVE_DEADLINE))
            .build();
        self.tasks
            .update_many(filter, update_ops_recover(), options)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    pub(super) async fn run_poll(&self, topic: &str, promise: &Promise) -> Result<Task> {
        self.branch(
            &self.fallback_poll,
            || self.poll_atomic(topic, promise),
            || self.poll_optimistic(topic, promise),
        )
        .await
    }

    /// Secure the next task in the topic with a single find-and-modify.
    /// Expected to work on unsharded collections and on collections sharded
    /// by the topic field.
    async fn poll_atomic(&self, topic: &str, promise: &Promise) -> OpResult<Task> {
        let t = Utc::now();
        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! {"scheduled": 1})
            .return_document(ReturnDocument::After)
            .hint(hint(INDEX_PENDING_TOPIC_SCHEDULED))
            .build();
        match self
            .tasks
            .find_one_and_update(query_ops_poll(topic, t), update_ops_consume(promise, t), options)
            .await?
        {
            Some(d) => Ok(d.try_into()?),
            None => Err(Error::NotFound("no task is available in the topic".to_owned()).into()),
        }
    }

    /// Peek at the next candidate, then claim it with a filter carrying all
    /// identifying fields. A zero-row match means another consumer secured
    /// the candidate first; retry immediately to secure the next one.
    async fn poll_optimistic(&self, topic: &str, promise: &Promise) -> OpResult<Task> {
        loop {
            let t = Utc::now();
            let filter = query_ops_poll(topic, t);
            let c = match self
                .peek(
                    filter.clone(),
                    Some(doc! {"scheduled": 1}),
                    INDEX_PENDING_TOPIC_SCHEDULED,
                )
                .await?
            {
                Some(c) => c,
                None => {
                    return Err(
                        Error::NotFound("no task is available in the topic".to_owned()).into(),
                    )
                }
            };

            let mut filter = filter;
            filter.insert("_id", c.id);
            filter.insert("nonce", c.nonce);
            let options = FindOneAndUpdateOptions::builder()
                .return_document(ReturnDocument::After)
                .hint(hint(INDEX_ID))
                .build();
            match self
                .tasks
                .find_one_and_update(filter, update_ops_consume(promise, t), options)
                .await?
            {
                Some(d) => return Ok(d.try_into()?),
                None => continue,
            }
        }
    }

    pub(super) async fn run_commit(&self, id: &str, m: &Commit) -> Result<Task> {
        self.branch(
            &self.fallback_commit,
            || self.commit_atomic(id, m),
            || self.commit_optimistic(id, m),
        )
        .await
    }

    /// Apply the commit with a single find-and-modify keyed on the ID and,
    /// when supplied, the nonce. Expected to work on unsharded collections
    /// and on collections sharded by the ID field.
    async fn commit_atomic(&self, id: &str, m: &Commit) -> OpResult<Task> {
        let mut filter = doc! {"_id": id};
        if !m.nonce.is_empty() {
            filter.insert("nonce", m.nonce.as_str());
        }
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .hint(hint(INDEX_ID))
            .build();
        match self
            .tasks
            .find_one_and_update(filter, update_ops_commit(m)?, options)
            .await?
        {
            Some(d) => Ok(d.try_into()?),
            None => {
                // Distinguish a nonce mismatch from a missing task.
                if !m.nonce.is_empty() && self.exists(doc! {"_id": id}, INDEX_ID).await? {
                    Err(Error::Conflict("nonce does not match".to_owned()).into())
                } else {
                    Err(Error::NotFound("task not found".to_owned()).into())
                }
            }
        }
    }

    /// Peek at the task to check the nonce, then apply the commit with a
    /// full-key filter. A zero-row match means the task was modified in
    /// between; commits are never retried, so report a conflict.
    async fn commit_optimistic(&self, id: &str, m: &Commit) -> OpResult<Task> {
        let c = match self.peek(doc! {"_id": id}, None, INDEX_ID).await? {
            Some(c) => c,
            None => return Err(Error::NotFound("task not found".to_owned()).into()),
        };
        if !m.nonce.is_empty() && m.nonce != c.nonce {
            return Err(Error::Conflict("nonce does not match".to_owned()).into());
        }

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
            .find_one_and_update(filter, update_ops_commit(m)?, options)
            .await?
        {
            Some(d) => Ok(d.try_into()?),
            None => Err(Error::Conflict("the task was modified concurrently".to_owned()).into()),
        }
    }
}

use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::options::{AggregateOptions, CountOptions, DeleteOptions};

use ratus_model::{Deleted, Topic};

use crate::error::{Error, Result};

use super::document::TopicDocument;
use super::{driver_error, hint, MongoDbEngine, INDEX_ID, INDEX_TOPIC};

impl MongoDbEngine {
    /// List topics with an aggregation rather than the distinct command to
    /// support pagination. The group stage can use a DISTINCT_SCAN plan
    /// that returns one document per index key value.
    pub(super) async fn run_list_topics(&self, limit: usize, offset: usize) -> Result<Vec<Topic>> {
        let pipeline = [
            doc! {"$group": {"_id": "$topic"}},
            doc! {"$skip": offset as i64},
            doc! {"$limit": limit as i64},
        ];
        let options = AggregateOptions::builder().hint(hint(INDEX_TOPIC)).build();
        let cursor = self
            .tasks
            .aggregate(pipeline, options)
            .await
            .map_err(driver_error)?;
        let documents: Vec<Document> = cursor.try_collect().await.map_err(driver_error)?;
        documents
            .into_iter()
            .map(|d| {
                bson::from_document::<TopicDocument>(d)
                    .map(Topic::from)
                    .map_err(|e| Error::Internal(format!("invalid topic document: {e}")))
            })
            .collect()
    }

    pub(super) async fn run_delete_topics(&self) -> Result<Deleted> {
        let options = DeleteOptions::builder().hint(hint(INDEX_ID)).build();
        let r = self
            .tasks
            .delete_many(doc! {}, options)
            .await
            .map_err(driver_error)?;

        // Return the number of deleted tasks, not the number of topics.
        Ok(Deleted {
            deleted: r.deleted_count as i64,
        })
    }

    pub(super) async fn run_get_topic(&self, topic: &str) -> Result<Topic> {
        let options = CountOptions::builder().hint(hint(INDEX_TOPIC)).build();
        let n = self
            .tasks
            .count_documents(doc! {"topic": topic}, options)
            .await
            .map_err(driver_error)?;

        // Topics are not created manually, their existence depends entirely
        // on whether tasks currently carry the topic name.
        if n == 0 {
            return Err(Error::NotFound("topic not found".to_owned()));
        }
        Ok(Topic {
            name: topic.to_owned(),
            count: Some(n as i64),
        })
    }

    pub(super) async fn run_delete_topic(&self, topic: &str) -> Result<Deleted> {
        let options = DeleteOptions::builder().hint(hint(INDEX_TOPIC)).build();
        let r = self
            .tasks
            .delete_many(doc! {"topic": topic}, options)
            .await
            .map_err(driver_error)?;
        Ok(Deleted {
            deleted: r.deleted_count as i64,
        })
    }
}

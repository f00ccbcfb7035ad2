//! BSON document types backing the task collection.
//!
//! The wire model uses chrono timestamps and JSON payloads; the collection
//! stores native BSON datetimes (required by the TTL index) and BSON
//! payload values. Conversions are explicit in both directions.

use bson::{Bson, DateTime};
use serde::{Deserialize, Serialize};

use ratus_model::{Promise, Task, TaskState, Topic};

use crate::error::Error;

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct TaskDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub topic: String,
    pub state: i32,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub producer: String,
    #[serde(default)]
    pub consumer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Bson>,
}

impl TryFrom<&Task> for TaskDocument {
    type Error = Error;

    fn try_from(t: &Task) -> Result<Self, Self::Error> {
        let payload = match &t.payload {
            Some(v) => Some(Bson::try_from(v.clone()).map_err(|e| {
                Error::BadRequest(format!("payload cannot be represented in storage: {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            id: t.id.clone(),
            topic: t.topic.clone(),
            state: t.state.as_i32(),
            nonce: t.nonce.clone(),
            producer: t.producer.clone(),
            consumer: t.consumer.clone(),
            produced: t.produced.map(DateTime::from_chrono),
            scheduled: t.scheduled.map(DateTime::from_chrono),
            consumed: t.consumed.map(DateTime::from_chrono),
            deadline: t.deadline.map(DateTime::from_chrono),
            payload,
        })
    }
}

impl TryFrom<TaskDocument> for Task {
    type Error = Error;

    fn try_from(d: TaskDocument) -> Result<Self, Self::Error> {
        let state = TaskState::try_from(d.state)
            .map_err(|v| Error::Internal(format!("invalid task state {v} in storage")))?;
        Ok(Self {
            id: d.id,
            topic: d.topic,
            state,
            nonce: d.nonce,
            producer: d.producer,
            consumer: d.consumer,
            produced: d.produced.map(DateTime::to_chrono),
            scheduled: d.scheduled.map(DateTime::to_chrono),
            consumed: d.consumed.map(DateTime::to_chrono),
            deadline: d.deadline.map(DateTime::to_chrono),
            payload: d.payload.map(Into::into),
            defer: String::new(),
        })
    }
}

/// Projection carrying the identifying fields used by the optimistic paths.
#[derive(Debug, Deserialize)]
pub(super) struct PeekDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub nonce: String,
}

/// Projection of the claim fields of an active task.
#[derive(Debug, Deserialize)]
pub(super) struct PromiseDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub consumer: String,
    #[serde(default)]
    pub deadline: Option<DateTime>,
}

impl From<PromiseDocument> for Promise {
    fn from(d: PromiseDocument) -> Self {
        Self {
            id: d.id,
            consumer: d.consumer,
            deadline: d.deadline.map(DateTime::to_chrono),
            timeout: String::new(),
        }
    }
}

/// Result row of the topic listing aggregation.
#[derive(Debug, Deserialize)]
pub(super) struct TopicDocument {
    #[serde(rename = "_id")]
    pub name: String,
}

impl From<TopicDocument> for Topic {
    fn from(d: TopicDocument) -> Self {
        // For performance reasons the aggregated results do not include the
        // number of tasks under each topic.
        Self {
            name: d.name,
            count: None,
        }
    }
}

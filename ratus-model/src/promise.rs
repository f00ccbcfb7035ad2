use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-bounded claim made by a consumer to execute a task.
///
/// Promises are not stored independently: a promise in effect is a projection
/// of the claim fields of an active task. An empty ID denotes a wildcard
/// promise targeting the next eligible task in a topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Promise {
    /// Unique ID of the target task.
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Identifier of the consumer instance making the claim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub consumer: String,

    /// Time by which a commit must arrive before the claim lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Timeout duration for executing the task, to be normalized into the
    /// deadline. Cleared during normalization.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
}

/// List envelope for promise collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Promises {
    #[serde(default)]
    pub data: Vec<Promise>,
}

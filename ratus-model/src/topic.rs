use serde::{Deserialize, Serialize};

/// A label that groups tasks for polling.
///
/// Topics are not stored entities: a topic exists exactly as long as tasks
/// carry its name. The count is omitted where computing it would be
/// disproportionate, such as in topic listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    /// Name of the topic.
    pub name: String,

    /// Number of tasks currently in the topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

/// List envelope for topic collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topics {
    #[serde(default)]
    pub data: Vec<Topic>,
}

/// Result of an insert or upsert operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Updated {
    /// Number of tasks that were newly created.
    pub created: i64,
    /// Number of existing tasks that were replaced.
    pub updated: i64,
}

/// Result of a delete operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    /// Number of tasks that were deleted.
    pub deleted: i64,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskState;

/// A delta applied to a task upon acknowledgement of its execution.
///
/// All fields are optional; an empty commit sets the state of the target
/// task to completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// If set, must match the task's current nonce or the commit fails with
    /// a conflict.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,

    /// Moves the task to another topic.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,

    /// Target state of the task; defaults to completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,

    /// Reschedules the task to a specific time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<DateTime<Utc>>,

    /// Replaces the payload of the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Duration relative to the commit time, to be normalized into the
    /// scheduled time. Cleared during normalization.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub defer: String,
}

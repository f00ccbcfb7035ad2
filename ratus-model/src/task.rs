use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// State of a task in its lifecycle.
///
/// States are serialized as integers on the wire and in storage: pending (0),
/// active (1), completed (2), archived (3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// The task is ready to be executed or is waiting to be executed in the
    /// future.
    #[default]
    Pending,
    /// The task is being processed by a consumer. Active tasks that have
    /// passed their deadlines will be reset to pending by the chore loop.
    /// Consumers should commit with a pending state to retry later.
    Active,
    /// The task has completed its execution. Completed tasks are deleted
    /// automatically after the retention period has expired.
    Completed,
    /// The task is stored as an archive and will never expire.
    Archived,
}

impl TaskState {
    pub fn as_i32(self) -> i32 {
        match self {
            TaskState::Pending => 0,
            TaskState::Active => 1,
            TaskState::Completed => 2,
            TaskState::Archived => 3,
        }
    }
}

impl TryFrom<i32> for TaskState {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(TaskState::Pending),
            1 => Ok(TaskState::Active),
            2 => Ok(TaskState::Completed),
            3 => Ok(TaskState::Archived),
            _ => Err(v),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

impl Serialize for TaskState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i32::deserialize(deserializer)?;
        TaskState::try_from(v).map_err(|v| D::Error::custom(format!("invalid task state {v}")))
    }
}

/// The unit of asynchronous work.
///
/// A task's ID is unique across the entire task store; the topic is a label
/// that groups tasks for polling, not a namespace. All timestamps carry
/// millisecond resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique ID of the task.
    #[serde(rename = "_id", default)]
    pub id: String,

    /// Topic that the task currently belongs to.
    #[serde(default)]
    pub topic: String,

    /// Current state of the task.
    #[serde(default)]
    pub state: TaskState,

    /// Nonce set when the task enters the active state, cleared by every
    /// state-changing commit and by recovery. The basis of optimistic
    /// concurrency control.
    #[serde(default)]
    pub nonce: String,

    /// Identifier of the producer instance that created the task.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub producer: String,

    /// Identifier of the consumer instance that claimed the task.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub consumer: String,

    /// Time when the task was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced: Option<DateTime<Utc>>,

    /// Time when the task is scheduled to be executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<DateTime<Utc>>,

    /// Time when the task was claimed by a consumer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed: Option<DateTime<Utc>>,

    /// Time by which a commit must arrive before the task is recovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Opaque descriptor of the work to be performed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Duration relative to the time the task is accepted, to be normalized
    /// into the scheduled time. Cleared during normalization.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub defer: String,
}

/// List envelope for task collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tasks {
    #[serde(default)]
    pub data: Vec<Task>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_integers() {
        for s in [
            TaskState::Pending,
            TaskState::Active,
            TaskState::Completed,
            TaskState::Archived,
        ] {
            assert_eq!(TaskState::try_from(s.as_i32()), Ok(s));
        }
        assert_eq!(TaskState::try_from(4), Err(4));
        assert_eq!(TaskState::try_from(-1), Err(-1));
    }

    #[test]
    fn state_rejects_out_of_range_values_on_the_wire() {
        assert!(serde_json::from_str::<TaskState>("2").is_ok());
        assert!(serde_json::from_str::<TaskState>("9").is_err());
    }

    #[test]
    fn task_id_uses_the_primary_key_field_name() {
        let t: Task = serde_json::from_str(r#"{"_id":"1","topic":"test"}"#).unwrap();
        assert_eq!(t.id, "1");
        assert_eq!(t.state, TaskState::Pending);

        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["_id"], "1");
        assert_eq!(v["state"], 0);
        assert_eq!(v["nonce"], "");
        assert!(v.get("payload").is_none());
    }
}

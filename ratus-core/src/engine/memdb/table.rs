use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use ratus_model::{Task, TaskState};

/// Encode a timestamp in milliseconds as a big-endian byte key.
///
/// The sign bit is flipped so that when truncated to an unsigned integer of
/// the same size, the maximum negative value becomes 0 and the maximum
/// positive value becomes the maximum unsigned value. Lexicographic byte
/// order then equals chronological order across negative and positive times.
pub(crate) fn encode_millis(t: DateTime<Utc>) -> [u8; 8] {
    ((t.timestamp_millis() ^ i64::MIN) as u64).to_be_bytes()
}

fn key_topic(topic: &str, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(topic.len() + id.len() + 1);
    k.extend_from_slice(topic.as_bytes());
    k.push(0);
    k.extend_from_slice(id.as_bytes());
    k
}

fn key_topic_time(topic: &str, t: DateTime<Utc>, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(topic.len() + id.len() + 9);
    k.extend_from_slice(topic.as_bytes());
    k.push(0);
    k.extend_from_slice(&encode_millis(t));
    k.extend_from_slice(id.as_bytes());
    k
}

fn key_time(t: DateTime<Utc>, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(id.len() + 8);
    k.extend_from_slice(&encode_millis(t));
    k.extend_from_slice(id.as_bytes());
    k
}

fn topic_prefix(topic: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(topic.len() + 1);
    k.extend_from_slice(topic.as_bytes());
    k.push(0);
    k
}

fn scan_prefix<'a>(
    index: &'a BTreeMap<Vec<u8>, String>,
    prefix: Vec<u8>,
) -> impl Iterator<Item = &'a String> + 'a {
    index
        .range(prefix.clone()..)
        .take_while(move |(k, _)| k.starts_with(&prefix))
        .map(|(_, id)| id)
}

/// Indexed in-memory task container.
///
/// The primary store maps IDs to immutable `Arc<Task>` values; secondary
/// indexes map composite byte keys back to IDs. Partial indexes only contain
/// entries for tasks in the relevant state, and keys embed the task ID as a
/// tiebreaker so equal timestamps never collide. Each index uses an explicit
/// key-extractor function instead of field reflection, preserving the
/// multi-field, partial, and sortable semantics.
#[derive(Default)]
pub(crate) struct TaskTable {
    by_id: HashMap<String, Arc<Task>>,
    by_topic: BTreeMap<Vec<u8>, String>,
    pending_topic_scheduled: BTreeMap<Vec<u8>, String>,
    active_deadline: BTreeMap<Vec<u8>, String>,
    active_topic: BTreeMap<Vec<u8>, String>,
    completed_consumed: BTreeMap<Vec<u8>, String>,
}

impl TaskTable {
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Task>> {
        self.by_id.get(id)
    }

    /// Insert a task, replacing any existing task with the same ID and
    /// keeping all indexes consistent. Callers hand over ownership; stored
    /// values are never mutated in place.
    pub fn insert(&mut self, task: Task) {
        self.unindex(&task.id);
        let t = Arc::new(task);
        self.index(&t);
        self.by_id.insert(t.id.clone(), t);
    }

    /// Remove a task by ID, returning the removed value.
    pub fn remove(&mut self, id: &str) -> Option<Arc<Task>> {
        self.unindex(id);
        self.by_id.remove(id)
    }

    fn index(&mut self, t: &Arc<Task>) {
        self.by_topic.insert(key_topic(&t.topic, &t.id), t.id.clone());
        match t.state {
            TaskState::Pending => {
                if let Some(s) = t.scheduled {
                    self.pending_topic_scheduled
                        .insert(key_topic_time(&t.topic, s, &t.id), t.id.clone());
                }
            }
            TaskState::Active => {
                if let Some(d) = t.deadline {
                    self.active_deadline.insert(key_time(d, &t.id), t.id.clone());
                }
                self.active_topic.insert(key_topic(&t.topic, &t.id), t.id.clone());
            }
            TaskState::Completed => {
                if let Some(c) = t.consumed {
                    self.completed_consumed.insert(key_time(c, &t.id), t.id.clone());
                }
            }
            TaskState::Archived => {}
        }
    }

    fn unindex(&mut self, id: &str) {
        let Some(t) = self.by_id.get(id).cloned() else {
            return;
        };
        self.by_topic.remove(&key_topic(&t.topic, &t.id));
        match t.state {
            TaskState::Pending => {
                if let Some(s) = t.scheduled {
                    self.pending_topic_scheduled
                        .remove(&key_topic_time(&t.topic, s, &t.id));
                }
            }
            TaskState::Active => {
                if let Some(d) = t.deadline {
                    self.active_deadline.remove(&key_time(d, &t.id));
                }
                self.active_topic.remove(&key_topic(&t.topic, &t.id));
            }
            TaskState::Completed => {
                if let Some(c) = t.consumed {
                    self.completed_consumed.remove(&key_time(c, &t.id));
                }
            }
            TaskState::Archived => {}
        }
    }

    /// All tasks, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.by_id.values()
    }

    /// Tasks in a topic, ordered by ID bytes.
    pub fn tasks_in_topic<'a>(&'a self, topic: &str) -> impl Iterator<Item = &'a Arc<Task>> + 'a {
        scan_prefix(&self.by_topic, topic_prefix(topic)).filter_map(move |id| self.by_id.get(id))
    }

    /// Active tasks in a topic, ordered by ID bytes.
    pub fn active_in_topic<'a>(&'a self, topic: &str) -> impl Iterator<Item = &'a Arc<Task>> + 'a {
        scan_prefix(&self.active_topic, topic_prefix(topic)).filter_map(move |id| self.by_id.get(id))
    }

    /// The pending task in the topic with the smallest scheduled time.
    pub fn first_pending(&self, topic: &str) -> Option<Arc<Task>> {
        scan_prefix(&self.pending_topic_scheduled, topic_prefix(topic))
            .next()
            .and_then(|id| self.by_id.get(id).cloned())
    }

    /// Active tasks whose deadline is at or before the given time, in
    /// deadline order.
    pub fn active_deadline_reached(&self, now: DateTime<Utc>) -> Vec<Arc<Task>> {
        self.collect_time_index(&self.active_deadline, now)
    }

    /// Completed tasks whose consumed time is at or before the given cutoff,
    /// in consumed order.
    pub fn completed_consumed_before(&self, cutoff: DateTime<Utc>) -> Vec<Arc<Task>> {
        self.collect_time_index(&self.completed_consumed, cutoff)
    }

    fn collect_time_index(
        &self,
        index: &BTreeMap<Vec<u8>, String>,
        upper: DateTime<Utc>,
    ) -> Vec<Arc<Task>> {
        let bound = encode_millis(upper);
        index
            .iter()
            .take_while(|(k, _)| k[..8] <= bound[..])
            .filter_map(|(_, id)| self.by_id.get(id).cloned())
            .collect()
    }

    /// Distinct topics with their task counts, ordered by topic name bytes.
    pub fn topics(&self) -> Vec<(String, i64)> {
        let mut v: Vec<(String, i64)> = Vec::new();
        for id in self.by_topic.values() {
            let Some(t) = self.by_id.get(id) else { continue };
            match v.last_mut() {
                Some((name, count)) if *name == t.topic => *count += 1,
                _ => v.push((t.topic.clone(), 1)),
            }
        }
        v
    }
}

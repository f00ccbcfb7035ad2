//! Validation and defaulting of externally supplied tasks, promises,
//! commits, and pagination options.
//!
//! These functions run before any engine call and are the rules that keep
//! the state machine sound. Failures surface as [`Error::BadRequest`].

use chrono::{DateTime, Duration, Utc};

use ratus_model::{Commit, Promise, Task, Tasks, TaskState, DEFAULT_LIMIT, DEFAULT_TIMEOUT};

use crate::error::{Error, Result};

/// Validate a task and fill in default values, reconciling it with the ID
/// and topic path parameters when present.
pub fn normalize_task(t: &mut Task, id: &str, topic: &str) -> Result<()> {
    if t.id.is_empty() {
        t.id = id.to_owned();
    }
    if t.id.is_empty() {
        return Err(Error::BadRequest("task ID must not be empty".to_owned()));
    }
    if !id.is_empty() && t.id != id {
        return Err(Error::BadRequest(
            "task ID is inconsistent with the path parameter".to_owned(),
        ));
    }

    if t.topic.is_empty() && !topic.is_empty() {
        t.topic = topic.to_owned();
    }
    if t.topic.is_empty() {
        return Err(Error::BadRequest("topic must not be empty".to_owned()));
    }

    // State range is enforced by the TaskState type at deserialization.

    let n = Utc::now();
    if t.produced.is_none() {
        t.produced = Some(n);
    }

    if !t.defer.is_empty() && t.scheduled.is_none() {
        t.scheduled = Some(add_duration(n, &t.defer)?);
    }
    if t.scheduled.is_none() {
        t.scheduled = Some(n);
    }

    // Clear the defer field after converting to an absolute timestamp.
    t.defer.clear();

    Ok(())
}

/// Validate and normalize every task in a list against the topic path
/// parameter. Empty lists are permitted.
pub fn normalize_tasks(ts: &mut Tasks, topic: &str) -> Result<()> {
    for t in &mut ts.data {
        normalize_task(t, "", topic)?;
    }
    Ok(())
}

/// Validate a promise and normalize its timeout into an absolute deadline.
pub fn normalize_promise(p: &mut Promise, id: &str) -> Result<()> {
    if !id.is_empty() && p.id.is_empty() {
        p.id = id.to_owned();
    }
    if !id.is_empty() && p.id != id {
        return Err(Error::BadRequest(
            "promise ID is inconsistent with the path parameter".to_owned(),
        ));
    }

    if p.deadline.is_none() {
        let timeout = if p.timeout.is_empty() {
            DEFAULT_TIMEOUT
        } else {
            p.timeout.as_str()
        };
        p.deadline = Some(add_duration(Utc::now(), timeout)?);
    }

    // Clear the timeout field after converting to an absolute timestamp.
    p.timeout.clear();

    Ok(())
}

/// Validate a commit and fill in default values. An empty commit completes
/// the target task.
pub fn normalize_commit(m: &mut Commit) -> Result<()> {
    if m.state.is_none() {
        m.state = Some(TaskState::Completed);
    }

    if !m.defer.is_empty() && m.scheduled.is_none() {
        m.scheduled = Some(add_duration(Utc::now(), &m.defer)?);
    }

    // Clear the defer field after converting to an absolute timestamp.
    m.defer.clear();

    Ok(())
}

/// Validate pagination options against the configured maximums and return
/// the effective (limit, offset) pair. A limit of zero selects the default
/// limit, capped by the maximum.
pub fn normalize_pagination(
    limit: i64,
    offset: i64,
    max_limit: i64,
    max_offset: i64,
) -> Result<(usize, usize)> {
    // The hard-coded default might be greater than the maximum limit,
    // always use the smaller of the two numbers as the default limit.
    let limit = if limit == 0 {
        DEFAULT_LIMIT.min(max_limit)
    } else {
        limit
    };

    if limit < 0 {
        return Err(Error::BadRequest("limit must not be negative".to_owned()));
    }
    if offset < 0 {
        return Err(Error::BadRequest("offset must not be negative".to_owned()));
    }
    if limit > max_limit {
        return Err(Error::BadRequest(format!(
            "exceeded maximum allowed limit of {max_limit}"
        )));
    }
    if offset > max_offset {
        return Err(Error::BadRequest(format!(
            "exceeded maximum allowed offset of {max_offset}"
        )));
    }

    Ok((limit as usize, offset as usize))
}

fn add_duration(t: DateTime<Utc>, s: &str) -> Result<DateTime<Utc>> {
    let d = humantime::parse_duration(s)
        .map_err(|e| Error::BadRequest(format!("invalid duration {s:?}: {e}")))?;
    let d = Duration::from_std(d)
        .map_err(|_| Error::BadRequest(format!("duration {s:?} is out of range")))?;
    Ok(t + d)
}

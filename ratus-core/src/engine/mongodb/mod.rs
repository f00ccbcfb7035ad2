//! MongoDB storage engine.
//!
//! Every mutating operation has two implementations. The atomic path issues
//! a single conditional find-and-modify, which is only correct when the
//! collection is unsharded or sharded on the key the filter carries. The
//! optimistic path first peeks at the candidate document, then appends all
//! identifying fields (ID, topic, state, nonce) to the filter of a second
//! find-and-modify, falling back to application-level compare-and-set. A
//! per-operation latch selects the branch and is promoted one-way when the
//! server rejects an atomic update on a sharded collection.

mod document;
mod promise;
mod queue;
mod task;
mod topic;

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime as ChronoDateTime, Utc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, FindOneOptions, Hint, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use ratus_model::{Commit, Promise, Task, TaskState, NONCE_LENGTH};

use crate::error::{Error, Result};
use crate::nonce;

use super::Engine;

use self::document::{PeekDocument, TaskDocument};

// Index names, shared between index creation and query hints.
pub(super) const INDEX_ID: &str = "_id_";
pub(super) const INDEX_TOPIC: &str = "topic_hashed";
pub(super) const INDEX_PENDING_TOPIC_SCHEDULED: &str = "topic_1_scheduled_1";
pub(super) const INDEX_ACTIVE_DEADLINE: &str = "deadline_1";
pub(super) const INDEX_ACTIVE_TOPIC: &str = "topic_1";
pub(super) const INDEX_COMPLETED_CONSUMED: &str = "consumed_1";

/// MongoDB server error codes that reject atomic updates on sharded
/// collections and therefore promote the fallback latch:
/// 61 is "query for sharded findAndModify must contain the shard key",
/// 31025 is "shard key update is not allowed without the full shard key".
const FALLBACK_ERROR_CODES: [i32; 2] = [61, 31025];

const DUPLICATE_KEY_ERROR_CODE: i32 = 11000;

/// Configuration for the MongoDB storage engine.
#[derive(Debug, Clone)]
pub struct MongoDbConfig {
    /// Connection URI of the deployment to connect to.
    pub uri: String,
    /// Name of the database to use.
    pub database: String,
    /// Name of the collection that stores tasks.
    pub collection: String,
    /// Retention period for completed tasks, applied via a TTL index.
    pub retention_period: Duration,
    /// Disable automatic index creation on startup.
    pub disable_index_creation: bool,
    /// Disable transparent fallbacks for unsupported operations.
    pub disable_auto_fallback: bool,
    /// Disable atomic polling and always use optimistic locking.
    pub disable_atomic_poll: bool,
}

impl Default for MongoDbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".to_owned(),
            database: "ratus".to_owned(),
            collection: "tasks".to_owned(),
            retention_period: Duration::from_secs(72 * 60 * 60),
            disable_index_creation: false,
            disable_auto_fallback: false,
            disable_atomic_poll: false,
        }
    }
}

/// Storage engine backed by a MongoDB collection.
pub struct MongoDbEngine {
    config: MongoDbConfig,
    database: Database,
    tasks: Collection<TaskDocument>,

    // Per-operation branch latches: -1 = atomic forced, 0 = atomic with
    // automatic fallback, 1 = optimistic forced. Promotion from 0 to 1 is
    // one-way for the lifetime of the engine.
    fallback_poll: AtomicI32,
    fallback_commit: AtomicI32,
    fallback_upsert_tasks: AtomicI32,
    fallback_upsert_task: AtomicI32,
    fallback_insert_promise: AtomicI32,
    fallback_upsert_promise: AtomicI32,
}

/// Error raised while attempting one branch of a dual-path operation.
/// Driver errors are inspected for the fallback codes before being sealed
/// into the public taxonomy; domain errors pass through untouched.
pub(super) enum OpError {
    Domain(Error),
    Driver(mongodb::error::Error),
}

impl From<Error> for OpError {
    fn from(e: Error) -> Self {
        OpError::Domain(e)
    }
}

impl From<mongodb::error::Error> for OpError {
    fn from(e: mongodb::error::Error) -> Self {
        OpError::Driver(e)
    }
}

pub(super) type OpResult<T> = std::result::Result<T, OpError>;

pub(super) fn seal(e: OpError) -> Error {
    match e {
        OpError::Domain(e) => e,
        OpError::Driver(e) => driver_error(e),
    }
}

pub(super) fn driver_error(e: mongodb::error::Error) -> Error {
    Error::Internal(format!("mongodb: {e}"))
}

/// Collect the server error codes carried by a driver error.
fn error_codes(e: &mongodb::error::Error) -> Vec<i32> {
    match e.kind.as_ref() {
        ErrorKind::Command(c) => vec![c.code],
        ErrorKind::Write(WriteFailure::WriteError(w)) => vec![w.code],
        ErrorKind::Write(WriteFailure::WriteConcernError(w)) => vec![w.code],
        ErrorKind::BulkWrite(f) => f
            .write_errors
            .iter()
            .flatten()
            .map(|w| w.code)
            .collect(),
        _ => Vec::new(),
    }
}

fn has_fallback_code(e: &mongodb::error::Error) -> bool {
    error_codes(e)
        .iter()
        .any(|c| FALLBACK_ERROR_CODES.contains(c))
}

pub(super) fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    let codes = error_codes(e);
    !codes.is_empty() && codes.iter().all(|c| *c == DUPLICATE_KEY_ERROR_CODE)
}

impl MongoDbEngine {
    /// Create a new engine instance. Initialization that requires I/O
    /// beyond resolving the connection string happens in `open`.
    pub async fn new(config: MongoDbConfig) -> Result<Self> {
        let options = ClientOptions::parse(&config.uri)
            .await
            .map_err(driver_error)?;
        let client = Client::with_options(options).map_err(driver_error)?;
        let database = client.database(&config.database);
        let tasks = database.collection::<TaskDocument>(&config.collection);

        let g = Self {
            config,
            database,
            tasks,
            fallback_poll: AtomicI32::new(0),
            fallback_commit: AtomicI32::new(0),
            fallback_upsert_tasks: AtomicI32::new(0),
            fallback_upsert_task: AtomicI32::new(0),
            fallback_insert_promise: AtomicI32::new(0),
            fallback_upsert_promise: AtomicI32::new(0),
        };

        if g.config.disable_auto_fallback {
            g.set_fallback(-1);
        }
        if g.config.disable_atomic_poll {
            g.fallback_poll.store(1, Ordering::SeqCst);
        }

        Ok(g)
    }

    /// Set all branch latches to the given value.
    pub fn set_fallback(&self, v: i32) {
        self.fallback_poll.store(v, Ordering::SeqCst);
        self.fallback_commit.store(v, Ordering::SeqCst);
        self.fallback_upsert_tasks.store(v, Ordering::SeqCst);
        self.fallback_upsert_task.store(v, Ordering::SeqCst);
        self.fallback_insert_promise.store(v, Ordering::SeqCst);
        self.fallback_upsert_promise.store(v, Ordering::SeqCst);
    }

    /// Decide whether to execute the preferred or the fallback branch based
    /// on the latch, promoting the latch when the preferred branch fails
    /// with one of the pre-defined sharding errors.
    pub(super) async fn branch<T, P, PF, F, FF>(
        &self,
        flag: &AtomicI32,
        preferred: P,
        fallback: F,
    ) -> Result<T>
    where
        P: FnOnce() -> PF,
        PF: std::future::Future<Output = OpResult<T>>,
        F: FnOnce() -> FF,
        FF: std::future::Future<Output = OpResult<T>>,
    {
        if flag.load(Ordering::SeqCst) > 0 {
            return fallback().await.map_err(seal);
        }
        match preferred().await {
            Ok(v) => Ok(v),
            Err(OpError::Domain(e)) => Err(e),
            Err(OpError::Driver(e)) => {
                if flag.load(Ordering::SeqCst) >= 0 && has_fallback_code(&e) {
                    tracing::warn!(
                        "atomic update rejected by the sharded collection, \
                         switching to optimistic updates for this operation"
                    );
                    flag.store(1, Ordering::SeqCst);
                    return fallback().await.map_err(seal);
                }
                Err(driver_error(e))
            }
        }
    }

    /// Read the identifying fields of the first document matching the
    /// filter, used by the optimistic paths to build full-key filters.
    pub(super) async fn peek(
        &self,
        filter: Document,
        sort: Option<Document>,
        hint: &str,
    ) -> OpResult<Option<PeekDocument>> {
        let options = FindOneOptions::builder()
            .allow_partial_results(true)
            .sort(sort)
            .projection(doc! {"_id": 1, "topic": 1, "state": 1, "nonce": 1})
            .hint(Hint::Name(hint.to_owned()))
            .build();
        let collection = self.tasks.clone_with_type::<PeekDocument>();
        Ok(collection.find_one(filter, options).await?)
    }

    /// Whether a document matching the filter exists.
    pub(super) async fn exists(&self, filter: Document, hint: &str) -> OpResult<bool> {
        Ok(self.peek(filter, None, hint).await?.is_some())
    }

    async fn create_indexes(&self) -> Result<()> {
        tokio::try_join!(self.create_queue_indexes(), self.create_ttl_index())?;
        Ok(())
    }

    async fn create_queue_indexes(&self) -> Result<()> {
        self.tasks
            .create_indexes(
                [
                    IndexModel::builder()
                        .keys(doc! {"topic": "hashed"})
                        .options(IndexOptions::builder().name(INDEX_TOPIC.to_owned()).build())
                        .build(),
                    IndexModel::builder()
                        .keys(doc! {"topic": 1, "scheduled": 1})
                        .options(
                            IndexOptions::builder()
                                .name(INDEX_PENDING_TOPIC_SCHEDULED.to_owned())
                                .partial_filter_expression(filter_state(TaskState::Pending))
                                .build(),
                        )
                        .build(),
                    IndexModel::builder()
                        .keys(doc! {"deadline": 1})
                        .options(
                            IndexOptions::builder()
                                .name(INDEX_ACTIVE_DEADLINE.to_owned())
                                .partial_filter_expression(filter_state(TaskState::Active))
                                .build(),
                        )
                        .build(),
                    IndexModel::builder()
                        .keys(doc! {"topic": 1})
                        .options(
                            IndexOptions::builder()
                                .name(INDEX_ACTIVE_TOPIC.to_owned())
                                .partial_filter_expression(filter_state(TaskState::Active))
                                .build(),
                        )
                        .build(),
                ],
                None,
            )
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    /// Create the TTL index that deletes completed tasks past their
    /// retention period. If an index with a different expiry already exists,
    /// update it in place with the collMod command instead.
    async fn create_ttl_index(&self) -> Result<()> {
        let keys = doc! {"consumed": 1};
        let model = IndexModel::builder()
            .keys(keys.clone())
            .options(
                IndexOptions::builder()
                    .name(INDEX_COMPLETED_CONSUMED.to_owned())
                    .partial_filter_expression(filter_state(TaskState::Completed))
                    .expire_after(self.config.retention_period)
                    .build(),
            )
            .build();

        let err = match self.tasks.create_index(model, None).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        let conflict = matches!(
            err.kind.as_ref(),
            ErrorKind::Command(c) if c.code_name == "IndexOptionsConflict"
        );
        if !conflict {
            return Err(driver_error(err));
        }

        self.database
            .run_command(
                doc! {
                    "collMod": self.tasks.name(),
                    "index": {
                        "keyPattern": keys,
                        "expireAfterSeconds": self.config.retention_period.as_secs() as i64,
                    },
                },
                None,
            )
            .await
            .map_err(driver_error)?;
        Ok(())
    }
}

#[async_trait]
impl Engine for MongoDbEngine {
    /// Connect lazily: the first operation establishes the connection, so a
    /// temporarily unavailable deployment does not fail startup. Index
    /// creation is the only eager initialization.
    async fn open(&self) -> Result<()> {
        if !self.config.disable_index_creation {
            self.create_indexes().await?;
        }
        Ok(())
    }

    /// The driver tears down its connection pool when the last clone of the
    /// client is dropped.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.tasks.drop(None).await.map_err(driver_error)?;
        self.close().await
    }

    async fn ready(&self) -> Result<()> {
        self.database
            .run_command(doc! {"ping": 1}, None)
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("mongodb: {e}")))?;
        Ok(())
    }

    async fn chore(&self) -> Result<()> {
        self.run_chore().await
    }

    async fn poll(&self, topic: &str, promise: &Promise) -> Result<Task> {
        self.run_poll(topic, promise).await
    }

    async fn commit(&self, id: &str, commit: &Commit) -> Result<Task> {
        self.run_commit(id, commit).await
    }

    async fn list_topics(&self, limit: usize, offset: usize) -> Result<Vec<ratus_model::Topic>> {
        self.run_list_topics(limit, offset).await
    }

    async fn delete_topics(&self) -> Result<ratus_model::Deleted> {
        self.run_delete_topics().await
    }

    async fn get_topic(&self, topic: &str) -> Result<ratus_model::Topic> {
        self.run_get_topic(topic).await
    }

    async fn delete_topic(&self, topic: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_topic(topic).await
    }

    async fn list_tasks(&self, topic: &str, limit: usize, offset: usize) -> Result<Vec<Task>> {
        self.run_list_tasks(topic, limit, offset).await
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<ratus_model::Updated> {
        self.run_insert_tasks(tasks).await
    }

    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<ratus_model::Updated> {
        self.run_upsert_tasks(tasks).await
    }

    async fn delete_tasks(&self, topic: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_topic(topic).await
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        self.run_get_task(id).await
    }

    async fn insert_task(&self, task: &Task) -> Result<ratus_model::Updated> {
        self.run_insert_task(task).await
    }

    async fn upsert_task(&self, task: &Task) -> Result<ratus_model::Updated> {
        self.run_upsert_task(task).await
    }

    async fn delete_task(&self, id: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_task(id).await
    }

    async fn list_promises(
        &self,
        topic: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Promise>> {
        self.run_list_promises(topic, limit, offset).await
    }

    async fn delete_promises(&self, topic: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_promises(topic).await
    }

    async fn get_promise(&self, id: &str) -> Result<Promise> {
        self.run_get_promise(id).await
    }

    async fn insert_promise(&self, promise: &Promise) -> Result<Task> {
        self.run_insert_promise(promise).await
    }

    async fn upsert_promise(&self, promise: &Promise) -> Result<Task> {
        self.run_upsert_promise(promise).await
    }

    async fn delete_promise(&self, id: &str) -> Result<ratus_model::Deleted> {
        self.run_delete_promise(id).await
    }
}

pub(super) fn filter_state(state: TaskState) -> Document {
    doc! {"state": state.as_i32()}
}

/// Query operators selecting the next available task in a topic.
pub(super) fn query_ops_poll(topic: &str, t: ChronoDateTime<Utc>) -> Document {
    doc! {
        "state": TaskState::Pending.as_i32(),
        "topic": topic,
        "scheduled": {"$lte": bson::DateTime::from_chrono(t)},
    }
}

/// Update operators resetting tasks to pending and clearing the nonce to
/// invalidate subsequent commits.
pub(super) fn update_ops_recover() -> Document {
    doc! {"$set": {
        "state": TaskState::Pending.as_i32(),
        "nonce": "",
    }}
}

/// Update operators claiming a task for the given promise.
pub(super) fn update_ops_consume(p: &Promise, t: ChronoDateTime<Utc>) -> Document {
    doc! {"$set": {
        "state": TaskState::Active.as_i32(),
        "nonce": nonce::generate(NONCE_LENGTH),
        "consumer": p.consumer.as_str(),
        "consumed": bson::DateTime::from_chrono(t),
        "deadline": p.deadline.map(bson::DateTime::from_chrono),
    }}
}

/// Update operators applying a commit to a task.
pub(super) fn update_ops_commit(m: &Commit) -> Result<Document> {
    let mut s = doc! {"nonce": ""};
    if !m.topic.is_empty() {
        s.insert("topic", m.topic.as_str());
    }
    if let Some(state) = m.state {
        s.insert("state", state.as_i32());
    }
    if let Some(t) = m.scheduled {
        s.insert("scheduled", bson::DateTime::from_chrono(t));
    }
    if let Some(p) = &m.payload {
        let v = bson::Bson::try_from(p.clone()).map_err(|e| {
            Error::BadRequest(format!("payload cannot be represented in storage: {e}"))
        })?;
        s.insert("payload", v);
    }
    Ok(doc! {"$set": s})
}

pub(super) fn hint(name: &str) -> Hint {
    Hint::Name(name.to_owned())
}

use std::collections::HashSet;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use uuid::Uuid;

use scheduler_core::{Result, SchedulerError, Task, TaskFilter, TaskStatus, TaskStore, DEFAULT_LEASE_MS};

const COLLECTION_NAME: &str = "tasks";

/// Thin wrapper over a `mongodb::Collection<Task>`. Construct once per
/// process via [`MongoTaskStore::new`] (which also lays down the indexes the
/// claim protocol depends on); clone freely, the underlying driver handle is
/// already reference-counted.
#[derive(Clone)]
pub struct MongoTaskStore {
    collection: Collection<Task>,
}

impl MongoTaskStore {
    /// Open the `tasks` collection in `db` and ensure its indexes exist.
    ///
    /// The claim query filters on `status` and `scheduled_at` together, so
    /// that compound index is load-bearing rather than an optimization.
    /// `id` gets its own unique index; MongoDB's native `_id` is left to the
    /// driver's default `ObjectId` since nothing here queries by it.
    pub async fn new(db: &Database) -> anyhow::Result<Self> {
        let collection = db.collection::<Task>(COLLECTION_NAME);
        let store = Self { collection };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Wrap an already-open collection without touching its indexes, for
    /// tests that provision indexes once for a shared fixture.
    pub fn from_collection(collection: Collection<Task>) -> Self {
        Self { collection }
    }

    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let status_scheduled = IndexModel::builder()
            .keys(doc! { "status": 1, "scheduled_at": 1 })
            .build();
        let unique_id = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection
            .create_indexes([status_scheduled, unique_id])
            .await?;
        Ok(())
    }
}

fn status_bson(status: TaskStatus) -> Bson {
    bson::to_bson(&status).expect("TaskStatus always serializes")
}

fn id_bson(id: Uuid) -> Bson {
    bson::to_bson(&id).expect("Uuid always serializes")
}

fn datetime_bson(at: DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_chrono(at))
}

fn worker_name_bson(worker_name: Option<&str>) -> Bson {
    match worker_name {
        Some(name) => Bson::String(name.to_string()),
        None => Bson::Null,
    }
}

fn filter_doc(filter: &TaskFilter) -> Document {
    let mut doc = Document::new();
    if let Some(id) = filter.id() {
        doc.insert("id", id_bson(id));
    }
    if let Some(name) = filter.name() {
        doc.insert("name", name);
    }
    if let Some(status) = filter.status() {
        doc.insert("status", status_bson(status));
    }
    doc
}

fn store_err(err: mongodb::error::Error) -> SchedulerError {
    SchedulerError::Store(err.into())
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn insert(&self, task: Task) -> Result<Task> {
        self.collection.insert_one(&task).await.map_err(store_err)?;
        Ok(task)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        self.collection
            .find_one(doc! { "id": id_bson(id) })
            .await
            .map_err(store_err)
    }

    async fn find_one(&self, filter: &TaskFilter) -> Result<Option<Task>> {
        self.collection
            .find_one(filter_doc(filter))
            .await
            .map_err(store_err)
    }

    async fn save(&self, task: &Task) -> Result<()> {
        self.collection
            .replace_one(doc! { "id": id_bson(task.id) }, task)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// The one operation that needs a pipeline update rather than a plain
    /// `$set`: `timeout_at` is `now + min(timeout_ms, DEFAULT_LEASE_MS)`
    /// (§4.D), and `timeout_ms` lives on the very document being matched, so
    /// it has to be computed server-side from `$timeout_ms` rather than
    /// read back in a second round trip that would race another claimer.
    async fn claim_one(
        &self,
        registered_names: &HashSet<String>,
        now: DateTime<Utc>,
        worker_name: Option<&str>,
    ) -> Result<Option<Task>> {
        if registered_names.is_empty() {
            return Ok(None);
        }
        let names: Vec<Bson> = registered_names
            .iter()
            .map(|n| Bson::String(n.clone()))
            .collect();
        let query = doc! {
            "status": status_bson(TaskStatus::Pending),
            "scheduled_at": { "$lte": datetime_bson(now) },
            "name": { "$in": names },
        };

        let now_bson = datetime_bson(now);
        let lease_ms = doc! {
            "$min": [
                { "$ifNull": ["$timeout_ms", DEFAULT_LEASE_MS] },
                DEFAULT_LEASE_MS,
            ]
        };
        let pipeline = vec![doc! {
            "$set": {
                "status": status_bson(TaskStatus::InProgress),
                "started_running_at": now_bson.clone(),
                "timeout_at": { "$add": [now_bson.clone(), lease_ms] },
                "worker_name": worker_name_bson(worker_name),
                "updated_at": now_bson,
            }
        }];

        self.collection
            .find_one_and_update(query, pipeline)
            .sort(doc! { "scheduled_at": 1 })
            .return_document(ReturnDocument::After)
            .await
            .map_err(store_err)
    }

    async fn sweep_one_timed_out(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let query = doc! {
            "status": status_bson(TaskStatus::InProgress),
            "timeout_at": { "$lte": datetime_bson(now) },
        };
        let update = doc! {
            "$set": {
                "status": status_bson(TaskStatus::TimedOut),
                "finished_running_at": datetime_bson(now),
                "updated_at": datetime_bson(now),
            }
        };

        self.collection
            .find_one_and_update(query, update)
            .sort(doc! { "timeout_at": 1 })
            .return_document(ReturnDocument::After)
            .await
            .map_err(store_err)
    }

    async fn cancel(&self, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Option<Task>> {
        let mut query = filter_doc(filter);
        query.insert("status", status_bson(TaskStatus::Pending));

        let update = doc! {
            "$set": {
                "status": status_bson(TaskStatus::Cancelled),
                "cancelled_at": datetime_bson(now),
                "finished_running_at": datetime_bson(now),
                "updated_at": datetime_bson(now),
            }
        };

        self.collection
            .find_one_and_update(query, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(store_err)
    }

    async fn delete_many(&self, filter: &TaskFilter) -> Result<u64> {
        let result = self
            .collection
            .delete_many(filter_doc(filter))
            .await
            .map_err(store_err)?;
        Ok(result.deleted_count)
    }
}

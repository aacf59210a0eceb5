use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::filter::TaskFilter;
use crate::task::Task;

/// Thin, atomic-where-it-matters wrappers around the document store (§4.B).
///
/// Only `claim_one`, `sweep_one_timed_out`, and `cancel` need the store's
/// conditional-update primitive (`findOneAndUpdate`-equivalent) — they are
/// the operations that change a record's status contingent on its current
/// value under concurrent workers. `insert`/`find_by_id`/`find_one`/`save`
/// have no such contention: by invariant 2, only the worker holding a task's
/// lease ever saves it.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: Task) -> Result<Task>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>>;

    async fn find_one(&self, filter: &TaskFilter) -> Result<Option<Task>>;

    /// Persist a task a caller already exclusively owns (post-claim).
    async fn save(&self, task: &Task) -> Result<()>;

    /// Atomically claim the next pending, due task whose name is in
    /// `registered_names`. Returns the task as claimed (status already
    /// `in_progress`, lease fields stamped), or `None` if nothing matched.
    async fn claim_one(
        &self,
        registered_names: &HashSet<String>,
        now: DateTime<Utc>,
        worker_name: Option<&str>,
    ) -> Result<Option<Task>>;

    /// Atomically move one `in_progress` task whose `timeout_at <= now` to
    /// `timed_out`. Returns the swept task, or `None` if nothing matched.
    async fn sweep_one_timed_out(&self, now: DateTime<Utc>) -> Result<Option<Task>>;

    /// Atomically cancel the `pending` task matching `filter`. Returns the
    /// cancelled task, or `None` if nothing matched (including: matched but
    /// was not `pending`).
    async fn cancel(&self, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Option<Task>>;

    /// Test-only bulk delete.
    async fn delete_many(&self, filter: &TaskFilter) -> Result<u64>;
}

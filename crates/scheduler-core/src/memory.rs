//! An in-process `TaskStore`, grounded in this codebase's in-memory
//! `TestJobManager` pattern: a lock-guarded collection standing in for the
//! document store so the state machine, claim, sweeper, and poll-loop logic
//! can be exercised deterministically without a live database.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::filter::TaskFilter;
use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};

/// Insertion order stands in for the store's natural `_id` ordering, which
/// is what the claim protocol's tie-break (§4.D) falls back to.
#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<Vec<Task>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: Task) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;
        tasks.push(task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        let tasks = self.tasks.lock().await;
        Ok(tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn find_one(&self, filter: &TaskFilter) -> Result<Option<Task>> {
        let tasks = self.tasks.lock().await;
        Ok(tasks.iter().find(|t| filter.matches(t)).cloned())
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
        }
        Ok(())
    }

    async fn claim_one(
        &self,
        registered_names: &HashSet<String>,
        now: DateTime<Utc>,
        worker_name: Option<&str>,
    ) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        let candidate = tasks.iter_mut().find(|t| {
            t.status == TaskStatus::Pending
                && t.scheduled_at <= now
                && registered_names.contains(&t.name)
        });

        let Some(task) = candidate else {
            return Ok(None);
        };

        task.status = TaskStatus::InProgress;
        task.started_running_at = Some(now);
        task.timeout_at = Some(now + chrono::Duration::milliseconds(task.lease_ms()));
        task.worker_name = worker_name.map(str::to_string);
        task.updated_at = now;

        Ok(Some(task.clone()))
    }

    async fn sweep_one_timed_out(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        let candidate = tasks.iter_mut().find(|t| {
            t.status == TaskStatus::InProgress && t.timeout_at.map(|at| at <= now).unwrap_or(false)
        });

        let Some(task) = candidate else {
            return Ok(None);
        };

        task.status = TaskStatus::TimedOut;
        task.finished_running_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn cancel(&self, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        let candidate = tasks
            .iter_mut()
            .find(|t| filter.matches(t) && t.status == TaskStatus::Pending);

        let Some(task) = candidate else {
            return Ok(None);
        };

        task.status = TaskStatus::Cancelled;
        task.cancelled_at = Some(now);
        task.finished_running_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn delete_many(&self, filter: &TaskFilter) -> Result<u64> {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|t| !filter.matches(t));
        Ok((before - tasks.len()) as u64)
    }
}

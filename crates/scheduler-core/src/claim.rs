//! The claim protocol (§4.D): one atomic conditional update per attempt,
//! gated by the process-local handler registry.

use tracing::debug;

use crate::clock::ClockRef;
use crate::error::Result;
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;
use crate::task::Task;

/// Attempt to claim one pending, due task whose name is registered locally.
/// Returns `None` if there was nothing to claim — not an error.
pub async fn claim_next(
    store: &dyn TaskStore,
    registry: &HandlerRegistry,
    clock: &ClockRef,
    worker_name: Option<&str>,
) -> Result<Option<Task>> {
    let names = registry.names().await;
    if names.is_empty() {
        return Ok(None);
    }

    let now = clock.now();
    let claimed = store.claim_one(&names, now, worker_name).await?;

    if let Some(task) = &claimed {
        debug!(task_id = %task.id, task_name = %task.name, "claimed task");
    }

    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fixed_clock;
    use crate::memory::MemoryStore;
    use crate::registry::BoxedHandler;
    use std::sync::Arc;

    fn noop_handler() -> BoxedHandler {
        Arc::new(|_params, _ctx| Box::pin(async move { Ok(serde_json::Value::Null) }))
    }

    #[tokio::test]
    async fn empty_registry_claims_nothing() {
        let store = MemoryStore::new();
        let registry = HandlerRegistry::new();
        let clock = fixed_clock(chrono::Utc::now());

        store
            .insert(Task::builder().name("x").scheduled_at(clock.now()).build())
            .await
            .unwrap();

        let claimed = claim_next(&store, &registry, &clock, None).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn claims_registered_due_task() {
        let store = MemoryStore::new();
        let registry = HandlerRegistry::new();
        registry.register_handler("getAnswer", noop_handler()).await;
        let clock = fixed_clock(chrono::Utc::now());

        store
            .insert(Task::builder().name("getAnswer").scheduled_at(clock.now()).build())
            .await
            .unwrap();

        let claimed = claim_next(&store, &registry, &clock, Some("worker-1"))
            .await
            .unwrap();
        let claimed = claimed.expect("task should be claimed");
        assert_eq!(claimed.worker_name.as_deref(), Some("worker-1"));
    }
}

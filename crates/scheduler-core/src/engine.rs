//! The execution engine (§4.E): dispatches a claimed task to its handler
//! under an optional deadline, records the terminal transition, and enqueues
//! any follow-up occurrence.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::clock::ClockRef;
use crate::error::Result;
use crate::registry::{HandlerRegistry, TaskContext};
use crate::store::TaskStore;
use crate::task::{Task, TaskError, TaskStatus};

/// Run one claimed task to a terminal state, persist it, and enqueue any
/// follow-up. Returns the terminal task, or `None` if the task's name had
/// no registered handler (defense-in-depth — a worker should not have
/// claimed it in the first place).
pub async fn execute(
    store: &dyn TaskStore,
    registry: &HandlerRegistry,
    clock: &ClockRef,
    mut task: Task,
) -> Result<Option<Task>> {
    let now = clock.now();

    // Step 1: scheduling-timeout re-check.
    if let Some(scheduling_timeout_at) = task.scheduling_timeout_at {
        if now > scheduling_timeout_at {
            task.status = TaskStatus::SchedulingTimedOut;
            task.finished_running_at = Some(now);
            task.updated_at = now;
            store.save(&task).await?;
            info!(task_id = %task.id, task_name = %task.name, "scheduling timeout");
            enqueue_followup(store, &task).await?;
            return Ok(Some(task));
        }
    }

    // Step 2: handler dispatch.
    let Some(handler) = registry.get(&task.name).await else {
        warn!(task_id = %task.id, task_name = %task.name, "no handler registered, abandoning claim");
        return Ok(None);
    };

    // Step 3: run with optional timeout.
    let ctx = TaskContext::new(&task, clock.clone());
    let outcome = match task.timeout_ms {
        Some(timeout_ms) if timeout_ms <= 0 => Err(crate::registry::HandlerError::new(format!(
            "Task timed out after {timeout_ms} ms"
        ))),
        Some(timeout_ms) => {
            let future = handler(task.params.clone(), ctx.clone());
            match tokio::time::timeout(Duration::from_millis(timeout_ms as u64), future).await {
                Ok(result) => result,
                Err(_) => Err(crate::registry::HandlerError::new(format!(
                    "Task timed out after {timeout_ms} ms"
                ))),
            }
        }
        None => handler(task.params.clone(), ctx.clone()).await,
    };

    ctx.drain_into(&mut task).await;

    // Step 4: terminal transition.
    let now = clock.now();
    task.finished_running_at = Some(now);
    task.updated_at = now;
    match outcome {
        Ok(value) => {
            task.status = TaskStatus::Succeeded;
            task.result = Some(value);
            info!(task_id = %task.id, task_name = %task.name, "task succeeded");
        }
        Err(err) => {
            task.status = TaskStatus::Failed;
            task.error = Some(TaskError {
                message: err.message,
                stack: err.stack,
            });
            error!(task_id = %task.id, task_name = %task.name, "task failed");
        }
    }
    store.save(&task).await?;

    // Step 5: follow-up.
    enqueue_followup(store, &task).await?;

    Ok(Some(task))
}

/// Shared by the engine's terminal-transition follow-up (§4.E step 5) and
/// the sweeper's non-retry branch (§4.F): if the handler overrode
/// `next_scheduled_at`, use it; else if `repeat_after_ms` is set, derive the
/// next occurrence from it; else do nothing.
pub(crate) async fn enqueue_followup(store: &dyn TaskStore, task: &Task) -> Result<()> {
    let next_scheduled_at = match (task.next_scheduled_at, task.repeat_after_ms) {
        (Some(at), _) => Some(at),
        (None, Some(repeat_after_ms)) => {
            Some(task.scheduled_at + chrono::Duration::milliseconds(repeat_after_ms))
        }
        (None, None) => None,
    };

    if let Some(next_scheduled_at) = next_scheduled_at {
        let followup = task.build_followup(next_scheduled_at);
        store.insert(followup).await?;
    }

    Ok(())
}

//! The timeout sweeper (§4.F): reclaims leases past `timeout_at`, creating a
//! retry when one is owed, otherwise running the same follow-up logic as
//! the execution engine's terminal transition.

use tracing::info;

use crate::clock::ClockRef;
use crate::engine::enqueue_followup;
use crate::error::Result;
use crate::store::TaskStore;
use crate::task::Task;

/// Sweep every currently-expired lease in one pass, returning the swept
/// tasks (post-sweep, i.e. already `timed_out`). Safe to call concurrently
/// from any number of workers — each record transitions at most once
/// because the underlying update requires `status = in_progress`.
pub async fn expire_timed_out_tasks(store: &dyn TaskStore, clock: &ClockRef) -> Result<Vec<Task>> {
    let mut swept = Vec::new();

    loop {
        let now = clock.now();
        let Some(task) = store.sweep_one_timed_out(now).await? else {
            break;
        };

        info!(task_id = %task.id, task_name = %task.name, "swept timed-out task");

        if task.retry_on_timeout_count > 0 {
            let retry = task.build_retry(now);
            store.insert(retry).await?;
        } else {
            enqueue_followup(store, &task).await?;
        }

        swept.push(task);
    }

    Ok(swept)
}

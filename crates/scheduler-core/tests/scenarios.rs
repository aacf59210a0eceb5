//! End-to-end scenarios and cross-cutting property checks that span more
//! than one component, exercised through the public `Scheduler` façade.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use scheduler_core::{
    fixed_clock, MemoryStore, PollConfig, ScheduleOptions, Scheduler, Task, TaskFilter, TaskStatus,
    TaskStore,
};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
}

fn scheduler_at(now: chrono::DateTime<Utc>) -> Scheduler {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
    Scheduler::with_clock(store, fixed_clock(now))
}

#[tokio::test]
async fn scenario_1_basic_execute() {
    let scheduler = scheduler_at(t0());
    scheduler
        .register_handler(
            "getAnswer",
            Arc::new(|_params, _ctx| Box::pin(async move { Ok(serde_json::json!(42)) })),
        )
        .await;

    let task = scheduler
        .schedule(
            "getAnswer",
            t0(),
            serde_json::json!({"q": "calc"}),
            ScheduleOptions::default(),
        )
        .await
        .unwrap();

    scheduler.poll(&PollConfig::default()).await.unwrap();

    let reloaded = task_by_id(&scheduler, task.id).await;
    assert_eq!(reloaded.status, TaskStatus::Succeeded);
    assert_eq!(reloaded.result, Some(serde_json::json!(42)));
    assert_eq!(reloaded.params, serde_json::json!({"q": "calc"}));
}

#[tokio::test]
async fn scenario_2_repeat_via_repeat_after_ms() {
    let scheduler = scheduler_at(t0());
    scheduler
        .register_handler(
            "getAnswer",
            Arc::new(|_params, _ctx| Box::pin(async move { Ok(serde_json::json!(42)) })),
        )
        .await;

    let original = scheduler
        .schedule(
            "getAnswer",
            t0(),
            serde_json::json!({"q": "calc"}),
            ScheduleOptions {
                repeat_after_ms: Some(5000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    scheduler.poll(&PollConfig::default()).await.unwrap();

    let reloaded = task_by_id(&scheduler, original.id).await;
    assert_eq!(reloaded.status, TaskStatus::Succeeded);

    let successor = find_pending(&scheduler, "getAnswer").await;
    assert_eq!(successor.original_task_id, Some(original.id));
    assert_eq!(successor.name, "getAnswer");
    assert_eq!(successor.scheduled_at, t0() + chrono::Duration::milliseconds(5000));
}

#[tokio::test]
async fn scenario_5_lease_expiry_and_retry() {
    let scheduler = scheduler_at(t0());

    let task = Task::builder()
        .name("getAnswer")
        .scheduled_at(t0())
        .status(TaskStatus::InProgress)
        .started_running_at(t0() - chrono::Duration::seconds(700))
        .timeout_at(t0() - chrono::Duration::seconds(1))
        .retry_on_timeout_count(2)
        .build();
    scheduler.store().insert(task.clone()).await.unwrap();

    scheduler.expire_timed_out_tasks(None).await.unwrap();

    let swept = task_by_id(&scheduler, task.id).await;
    assert_eq!(swept.status, TaskStatus::TimedOut);

    let retry = find_pending(&scheduler, "getAnswer").await;
    assert_eq!(retry.scheduled_at, t0());
    assert_eq!(retry.retry_on_timeout_count, 1);
    assert!(retry.started_running_at.is_none());
    assert!(retry.finished_running_at.is_none());
    assert!(retry.worker_name.is_none());
    assert!(retry.timeout_at.is_none());
    assert!(retry.error.is_none());
    assert_eq!(
        retry.scheduling_timeout_at,
        Some(t0() + chrono::Duration::milliseconds(scheduler_core::DEFAULT_SCHEDULING_TIMEOUT_MS))
    );
}

#[tokio::test]
async fn scenario_7_name_filter_leaves_unhandled_pending() {
    let scheduler = scheduler_at(t0());
    scheduler
        .register_handler(
            "handledJob",
            Arc::new(|_params, _ctx| Box::pin(async move { Ok(serde_json::Value::Null) })),
        )
        .await;

    let handled = scheduler
        .schedule("handledJob", t0(), serde_json::Value::Null, ScheduleOptions::default())
        .await
        .unwrap();
    let unhandled = scheduler
        .schedule("unhandledJob", t0(), serde_json::Value::Null, ScheduleOptions::default())
        .await
        .unwrap();

    scheduler.poll(&PollConfig { parallel: 10, ..Default::default() }).await.unwrap();

    assert_eq!(task_by_id(&scheduler, handled.id).await.status, TaskStatus::Succeeded);

    let still_pending = task_by_id(&scheduler, unhandled.id).await;
    assert_eq!(still_pending.status, TaskStatus::Pending);
    assert!(still_pending.started_running_at.is_none());
    assert!(still_pending.timeout_at.is_none());
    assert!(still_pending.worker_name.is_none());
}

/// P2: under N concurrent pollers, each pending-and-due record reaches
/// `in_progress` under exactly one worker.
#[tokio::test]
async fn p2_atomic_claim_under_concurrent_workers() {
    let store = Arc::new(MemoryStore::new());
    let clock = fixed_clock(t0());
    let registry = Arc::new(scheduler_core::HandlerRegistry::new());
    registry
        .register_handler(
            "x",
            Arc::new(|_params, _ctx| Box::pin(async move { Ok(serde_json::Value::Null) })),
        )
        .await;

    let task_count = 20;
    let mut ids = HashSet::new();
    for _ in 0..task_count {
        let task = store
            .insert(Task::builder().name("x").scheduled_at(t0()).build())
            .await
            .unwrap();
        ids.insert(task.id);
    }

    let worker_count = 4;
    let mut handles = Vec::new();
    for w in 0..worker_count {
        let store = Arc::clone(&store);
        let registry = Arc::clone(&registry);
        let clock = clock.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                match scheduler_core::claim::claim_next(
                    store.as_ref(),
                    registry.as_ref(),
                    &clock,
                    Some(&format!("worker-{w}")),
                )
                .await
                .unwrap()
                {
                    Some(task) => claimed.push(task.id),
                    None => break,
                }
            }
            claimed
        }));
    }

    let mut all_claimed = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.await.unwrap());
    }

    // Every task claimed exactly once, and every task got claimed.
    let mut seen = HashSet::new();
    for id in &all_claimed {
        assert!(seen.insert(*id), "task {id} claimed more than once");
    }
    assert_eq!(seen, ids);
}

async fn task_by_id(scheduler: &Scheduler, id: uuid::Uuid) -> Task {
    scheduler
        .store()
        .find_by_id(id)
        .await
        .unwrap()
        .expect("task should exist")
}

async fn find_pending(scheduler: &Scheduler, name: &str) -> Task {
    scheduler
        .store()
        .find_one(&TaskFilter::by_name(name).and_status(TaskStatus::Pending))
        .await
        .unwrap()
        .expect("pending task should exist")
}

//! End-to-end scenarios against a real MongoDB instance, provisioned with
//! `testcontainers_modules`. Ignored by default since they need a Docker
//! daemon; run with `cargo test -- --ignored`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mongodb::Client;
use scheduler_core::{
    fixed_clock, HandlerRegistry, PollConfig, ScheduleOptions, Scheduler, Task, TaskFilter,
    TaskStatus, TaskStore,
};
use scheduler_mongodb::MongoTaskStore;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::mongo::Mongo;

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
}

async fn start_store() -> (testcontainers::ContainerAsync<Mongo>, MongoTaskStore) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let container = Mongo::default().start().await.expect("start mongo container");
    let port = container.get_host_port_ipv4(27017).await.expect("mongo port");
    let uri = format!("mongodb://127.0.0.1:{port}/");
    let client = Client::with_uri_str(&uri).await.expect("connect to mongo");
    let db = client.database("scheduler_test");
    let store = MongoTaskStore::new(&db).await.expect("provision indexes");
    (container, store)
}

#[tokio::test]
#[ignore]
async fn scenario_1_basic_execute_against_mongo() {
    let (_container, store) = start_store().await;
    let store: Arc<dyn TaskStore> = Arc::new(store);
    let scheduler = Scheduler::with_clock(store, fixed_clock(t0()));

    scheduler
        .register_handler(
            "getAnswer",
            Arc::new(|_params, _ctx| Box::pin(async move { Ok(serde_json::json!(42)) })),
        )
        .await;

    let task = scheduler
        .schedule("getAnswer", t0(), serde_json::json!({"q": "calc"}), ScheduleOptions::default())
        .await
        .unwrap();

    scheduler.poll(&PollConfig::default()).await.unwrap();

    let reloaded = scheduler.store().find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, TaskStatus::Succeeded);
    assert_eq!(reloaded.result, Some(serde_json::json!(42)));
}

#[tokio::test]
#[ignore]
async fn scenario_2_repeat_against_mongo() {
    let (_container, store) = start_store().await;
    let store: Arc<dyn TaskStore> = Arc::new(store);
    let scheduler = Scheduler::with_clock(store, fixed_clock(t0()));

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
            serde_json::Value::Null,
            ScheduleOptions { repeat_after_ms: Some(5000), ..Default::default() },
        )
        .await
        .unwrap();

    scheduler.poll(&PollConfig::default()).await.unwrap();

    let successor = scheduler
        .store()
        .find_one(&TaskFilter::by_name("getAnswer").and_status(TaskStatus::Pending))
        .await
        .unwrap()
        .expect("successor should be enqueued");
    assert_eq!(successor.original_task_id, Some(original.id));
    assert_eq!(successor.scheduled_at, t0() + chrono::Duration::milliseconds(5000));
}

/// P2 against real MongoDB: `find_one_and_update` is the only thing standing
/// between concurrent workers and a double claim.
#[tokio::test]
#[ignore]
async fn p2_atomic_claim_under_concurrent_workers_against_mongo() {
    let (_container, store) = start_store().await;
    let store = Arc::new(store);
    let clock = fixed_clock(t0());
    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register_handler("x", Arc::new(|_params, _ctx| Box::pin(async move { Ok(serde_json::Value::Null) })))
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

    let mut seen = HashSet::new();
    for id in &all_claimed {
        assert!(seen.insert(*id), "task {id} claimed more than once");
    }
    assert_eq!(seen, ids);
}

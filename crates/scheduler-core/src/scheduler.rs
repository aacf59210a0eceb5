//! The Scheduler API (§4.H): the façade a client program actually holds —
//! thin wrappers over the repository plus the poll loop's singleton guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::clock::{system_clock, ClockRef};
use crate::engine;
use crate::error::Result;
use crate::filter::TaskFilter;
use crate::poll::{self, PollConfig, PollLoop};
use crate::registry::{BoxedHandler, HandlerRegistry, HandlerTree};
use crate::store::TaskStore;
use crate::sweeper;
use crate::task::{Task, DEFAULT_SCHEDULING_TIMEOUT_MS};

/// Recognized keys of `schedule`'s options argument (§4.H): `repeat_after_ms`
/// is modeled as a field here rather than the dynamic "fourth argument is
/// either a number or an options record" the source accepts — Rust's static
/// typing removes the ambiguity outright.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub repeat_after_ms: Option<i64>,
    pub timeout_ms: Option<i64>,
    pub retry_on_timeout_count: Option<i32>,
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    registry: HandlerRegistry,
    clock: ClockRef,
    poll_loop: PollLoop,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            clock: system_clock(),
            poll_loop: PollLoop::new(),
        }
    }

    pub fn with_clock(store: Arc<dyn TaskStore>, clock: ClockRef) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            clock,
            poll_loop: PollLoop::new(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub async fn register_handler(&self, name: impl Into<String>, handler: BoxedHandler) {
        self.registry.register_handler(name, handler).await;
    }

    pub async fn register_handlers(&self, tree: HandlerTree, prefix: Option<&str>) {
        self.registry.register_handlers(tree, prefix).await;
    }

    pub async fn remove_all_handlers(&self) {
        self.registry.remove_all_handlers().await;
    }

    /// Create a new `pending` record. `scheduling_timeout_at` defaults to
    /// `scheduled_at + DEFAULT_SCHEDULING_TIMEOUT_MS`.
    pub async fn schedule(
        &self,
        name: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        params: serde_json::Value,
        options: ScheduleOptions,
    ) -> Result<Task> {
        let mut builder = Task::builder()
            .name(name.into())
            .params(params)
            .scheduled_at(scheduled_at)
            .scheduling_timeout_at(
                scheduled_at + chrono::Duration::milliseconds(DEFAULT_SCHEDULING_TIMEOUT_MS),
            );

        if let Some(repeat_after_ms) = options.repeat_after_ms {
            builder = builder.repeat_after_ms(repeat_after_ms);
        }
        if let Some(timeout_ms) = options.timeout_ms {
            builder = builder.timeout_ms(timeout_ms);
        }
        if let Some(retry_on_timeout_count) = options.retry_on_timeout_count {
            builder = builder.retry_on_timeout_count(retry_on_timeout_count);
        }

        let now = self.clock.now();
        let task = builder.created_at(now).updated_at(now).build();
        self.store.insert(task).await
    }

    /// Cancel the `pending` task matching `filter`. `filter` can never be
    /// empty (see `TaskFilter`), so the "null filter matches everything"
    /// hazard cannot arise here. `get_current_time` overrides this instance's
    /// clock for this call only (§4.A/§6), falling back to it when absent.
    pub async fn cancel_task(
        &self,
        filter: TaskFilter,
        get_current_time: Option<ClockRef>,
    ) -> Result<Option<Task>> {
        let clock = get_current_time.unwrap_or_else(|| Arc::clone(&self.clock));
        let now = clock.now();
        self.store.cancel(&filter, now).await
    }

    /// Exposed §4.F for direct testing and for operators who want to drive
    /// sweeps out of band from `startPolling`. `get_current_time` overrides
    /// this instance's clock for this call only.
    pub async fn expire_timed_out_tasks(&self, get_current_time: Option<ClockRef>) -> Result<Vec<Task>> {
        let clock = get_current_time.unwrap_or_else(|| Arc::clone(&self.clock));
        sweeper::expire_timed_out_tasks(self.store.as_ref(), &clock).await
    }

    /// Exposed §4.E for direct testing. `get_current_time` overrides this
    /// instance's clock for this call only.
    pub async fn execute(&self, task: Task, get_current_time: Option<ClockRef>) -> Result<Option<Task>> {
        let clock = get_current_time.unwrap_or_else(|| Arc::clone(&self.clock));
        engine::execute(self.store.as_ref(), &self.registry, &clock, task).await
    }

    /// Execute one batch: claim up to `config.parallel` tasks and run them
    /// to completion before returning. `config.get_current_time`, if set,
    /// overrides this instance's clock for this call only.
    pub async fn poll(&self, config: &PollConfig) -> Result<usize> {
        let clock = config
            .get_current_time
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.clock));
        poll::poll(
            self.store.as_ref(),
            &self.registry,
            &clock,
            config.parallel.max(1),
            config.worker_name.as_deref(),
        )
        .await
    }

    /// Start the singleton poll loop. Repeated calls while already running
    /// return the existing cancel handle. `config.get_current_time`, if set,
    /// overrides this instance's clock for the lifetime of the loop.
    pub async fn start_polling(&self, config: PollConfig) -> CancellationToken {
        let clock = config
            .get_current_time
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.clock));
        self.poll_loop
            .start(Arc::clone(&self.store), self.registry.clone(), clock, config)
            .await
    }

    pub fn is_polling(&self) -> bool {
        self.poll_loop.is_running()
    }
}

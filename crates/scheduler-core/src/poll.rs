//! The poll loop (§4.G): a singleton-per-process ticker that sweeps, then
//! drains claimable work to empty, then sleeps `interval` before repeating.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::claim::claim_next;
use crate::clock::ClockRef;
use crate::engine::execute;
use crate::error::Result;
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval_ms: i64,
    pub parallel: usize,
    pub worker_name: Option<String>,
    /// Per-call clock override (§4.A/§6's `getCurrentTime?`). `None` means
    /// fall back to whichever clock the owning `Scheduler` was built with.
    pub get_current_time: Option<ClockRef>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            parallel: 1,
            worker_name: None,
            get_current_time: None,
        }
    }
}

/// One batch: claim up to `parallel` tasks, execute them concurrently, and
/// await completion before returning. Returns the number of tasks claimed
/// (0 means nothing was due).
pub async fn poll(
    store: &dyn TaskStore,
    registry: &HandlerRegistry,
    clock: &ClockRef,
    parallel: usize,
    worker_name: Option<&str>,
) -> Result<usize> {
    let mut claimed = Vec::with_capacity(parallel.max(1));
    for _ in 0..parallel.max(1) {
        match claim_next(store, registry, clock, worker_name).await? {
            Some(task) => claimed.push(task),
            None => break,
        }
    }

    let count = claimed.len();
    let executions = claimed
        .into_iter()
        .map(|task| execute(store, registry, clock, task));
    futures::future::join_all(executions)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    Ok(count)
}

/// The process-local singleton guard behind `startPolling`/`cancel()`.
/// Repeated `start` calls while already running return the existing
/// cancellation handle instead of spawning a second ticker.
pub struct PollLoop {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<CancellationToken>>,
}

impl Default for PollLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl PollLoop {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(
        &self,
        store: Arc<dyn TaskStore>,
        registry: HandlerRegistry,
        clock: ClockRef,
        config: PollConfig,
    ) -> CancellationToken {
        let mut guard = self.handle.lock().await;
        if self.running.load(Ordering::SeqCst) {
            if let Some(existing) = guard.as_ref() {
                return existing.clone();
            }
        }

        let token = CancellationToken::new();
        *guard = Some(token.clone());
        self.running.store(true, Ordering::SeqCst);
        drop(guard);

        let running_flag = Arc::clone(&self.running);
        let loop_token = token.clone();
        let interval = Duration::from_millis(config.interval_ms.max(0) as u64);
        let parallel = config.parallel.max(1);
        let worker_name = config.worker_name.clone();

        tokio::spawn(async move {
            loop {
                if loop_token.is_cancelled() {
                    break;
                }

                if let Err(err) = crate::sweeper::expire_timed_out_tasks(store.as_ref(), &clock).await {
                    error!(error = %err, "sweep tick failed");
                }

                loop {
                    match poll(store.as_ref(), &registry, &clock, parallel, worker_name.as_deref()).await {
                        Ok(0) => break,
                        Ok(_) => continue,
                        Err(err) => {
                            error!(error = %err, "poll tick failed");
                            break;
                        }
                    }
                }

                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            running_flag.store(false, Ordering::SeqCst);
        });

        token
    }
}

//! The handler registry (§4.C) and the narrow, owned handle (§9 design
//! note) a handler uses to log, record side effects, and override its next
//! occurrence, grounded in this codebase's `BoxedHandler`/`JobRegistry`
//! shape.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::clock::ClockRef;
use crate::task::{LogEntry, SideEffect, Task};

#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
    pub stack: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            stack: Some(format!("{err:?}")),
        }
    }
}

pub type HandlerResult = std::result::Result<serde_json::Value, HandlerError>;
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A registered handler: `(params, task_handle) -> value | failure`.
pub type BoxedHandler = Arc<dyn Fn(serde_json::Value, TaskContext) -> BoxFuture<HandlerResult> + Send + Sync>;

#[derive(Default)]
struct TaskContextInner {
    logs: Vec<LogEntry>,
    side_effects: Vec<SideEffect>,
    next_scheduled_at: Option<DateTime<Utc>>,
}

/// The mutable handle passed to a handler as its second argument, in place
/// of an implicit `this` receiver. Exposes only append-log,
/// record-side-effect, set-next-scheduled-at, and read access to the task's
/// own fields — not the full record.
#[derive(Clone)]
pub struct TaskContext {
    id: Uuid,
    name: String,
    params: serde_json::Value,
    clock: ClockRef,
    inner: Arc<Mutex<TaskContextInner>>,
}

impl TaskContext {
    pub(crate) fn new(task: &Task, clock: ClockRef) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            params: task.params.clone(),
            clock,
            inner: Arc::new(Mutex::new(TaskContextInner::default())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &serde_json::Value {
        &self.params
    }

    pub async fn log(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.logs.push(LogEntry {
            timestamp: self.clock.now(),
            message: message.into(),
            extra: None,
        });
    }

    pub async fn log_with_extra(&self, message: impl Into<String>, extra: serde_json::Value) {
        let mut inner = self.inner.lock().await;
        inner.logs.push(LogEntry {
            timestamp: self.clock.now(),
            message: message.into(),
            extra: Some(extra),
        });
    }

    pub async fn record_side_effect(
        &self,
        name: impl Into<String>,
        params: serde_json::Value,
        result: serde_json::Value,
        start: DateTime<Utc>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.side_effects.push(SideEffect {
            start,
            end: self.clock.now(),
            name: name.into(),
            params,
            result,
        });
    }

    pub async fn set_next_scheduled_at(&self, at: DateTime<Utc>) {
        self.inner.lock().await.next_scheduled_at = Some(at);
    }

    /// Drain accumulated logs/side-effects/override back onto the owning
    /// task record. Called by the execution engine after the handler
    /// future resolves.
    pub(crate) async fn drain_into(&self, task: &mut Task) {
        let mut inner = self.inner.lock().await;
        task.logs.append(&mut inner.logs);
        task.side_effects.append(&mut inner.side_effects);
        if let Some(at) = inner.next_scheduled_at.take() {
            task.next_scheduled_at = Some(at);
        }
    }
}

/// A nested mapping used by `register_handlers` to bulk-register a tree of
/// handlers under dotted names (§4.C).
pub enum HandlerTree {
    Leaf(BoxedHandler),
    Branch(HashMap<String, HandlerTree>),
}

/// Process-local map from dotted task name to handler. Not persisted;
/// multiple workers may register different subsets of names.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, BoxedHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_handler(&self, name: impl Into<String>, handler: BoxedHandler) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    pub async fn register_handlers(&self, tree: HandlerTree, prefix: Option<&str>) {
        self.register_handlers_inner(tree, prefix.map(str::to_string)).await;
    }

    /// Owned-`prefix` recursive helper. The public `register_handlers` takes
    /// `Option<&str>` for ergonomics, but recursing through borrowed locals
    /// across an `.await` point needs a lifetime the boxed future can't
    /// express cleanly, so the walk itself is done over owned `String`s.
    fn register_handlers_inner<'a>(
        &'a self,
        tree: HandlerTree,
        prefix: Option<String>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match tree {
                HandlerTree::Leaf(handler) => {
                    if let Some(prefix) = prefix {
                        self.register_handler(prefix, handler).await;
                    }
                }
                HandlerTree::Branch(branch) => {
                    for (key, child) in branch {
                        let dotted = match &prefix {
                            Some(p) => format!("{p}.{key}"),
                            None => key,
                        };
                        self.register_handlers_inner(child, Some(dotted)).await;
                    }
                }
            }
        })
    }

    pub async fn remove_all_handlers(&self) {
        self.handlers.write().await.clear();
    }

    pub async fn names(&self) -> HashSet<String> {
        self.handlers.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<BoxedHandler> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }
}

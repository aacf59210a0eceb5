use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// The default lease window granted at claim when `timeout_ms` is unset or
/// exceeds it, and the default scheduling-timeout window.
pub const DEFAULT_LEASE_MS: i64 = 10 * 60 * 1000;
pub const DEFAULT_SCHEDULING_TIMEOUT_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    SchedulingTimedOut,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl TaskStatus {
    /// Terminal statuses never transition further (invariant 1).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::TimedOut
                | TaskStatus::SchedulingTimedOut
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub message: String,
    pub stack: Option<String>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideEffect {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub name: String,
    pub params: serde_json::Value,
    pub result: serde_json::Value,
}

/// One scheduled occurrence. See `SPEC_FULL.md` §3 for the full field
/// semantics and the invariants this type is required to uphold across its
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct Task {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub name: String,

    #[builder(default = serde_json::Value::Null)]
    pub params: serde_json::Value,

    pub scheduled_at: DateTime<Utc>,

    #[builder(default, setter(strip_option))]
    pub scheduling_timeout_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub timeout_ms: Option<i64>,

    #[builder(default, setter(strip_option))]
    pub timeout_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub started_running_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub finished_running_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub cancelled_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub worker_name: Option<String>,

    #[builder(default)]
    pub status: TaskStatus,

    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,

    #[builder(default, setter(strip_option))]
    pub error: Option<TaskError>,

    #[builder(default, setter(strip_option))]
    pub repeat_after_ms: Option<i64>,

    #[builder(default, setter(strip_option))]
    pub next_scheduled_at: Option<DateTime<Utc>>,

    #[builder(default)]
    pub retry_on_timeout_count: i32,

    #[builder(default, setter(strip_option))]
    pub previous_task_id: Option<Uuid>,

    #[builder(default, setter(strip_option))]
    pub original_task_id: Option<Uuid>,

    #[builder(default)]
    pub logs: Vec<LogEntry>,

    #[builder(default)]
    pub side_effects: Vec<SideEffect>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The lease window a claim would grant this task, per §4.D:
    /// `min(timeout_ms, DEFAULT_LEASE_MS)`.
    pub fn lease_ms(&self) -> i64 {
        self.timeout_ms
            .map(|ms| ms.min(DEFAULT_LEASE_MS))
            .unwrap_or(DEFAULT_LEASE_MS)
    }

    /// Build the follow-up record for a repeat (invariant 5): inherits
    /// `name`, `params`, `repeat_after_ms`, `timeout_ms`; links
    /// `previous_task_id` to self and `original_task_id` transitively.
    pub fn build_followup(&self, next_scheduled_at: DateTime<Utc>) -> Task {
        Task::builder()
            .name(self.name.clone())
            .params(self.params.clone())
            .scheduled_at(next_scheduled_at)
            .scheduling_timeout_at(next_scheduled_at + chrono::Duration::milliseconds(DEFAULT_SCHEDULING_TIMEOUT_MS))
            .timeout_ms(self.timeout_ms.unwrap_or_default())
            .repeat_after_ms(self.repeat_after_ms.unwrap_or_default())
            .previous_task_id(self.id)
            .original_task_id(self.original_task_id.unwrap_or(self.id))
            .build()
    }

    /// Build the retry record a sweeper inserts on lease expiry (§4.F).
    /// Deliberately does **not** set `previous_task_id` / `original_task_id`
    /// — see `DESIGN.md` for why that asymmetry with repeats is preserved.
    pub fn build_retry(&self, now: DateTime<Utc>) -> Task {
        Task::builder()
            .name(self.name.clone())
            .params(self.params.clone())
            .scheduled_at(self.scheduled_at)
            .scheduling_timeout_at(now + chrono::Duration::milliseconds(DEFAULT_SCHEDULING_TIMEOUT_MS))
            .timeout_ms(self.timeout_ms.unwrap_or_default())
            .repeat_after_ms(self.repeat_after_ms.unwrap_or_default())
            .retry_on_timeout_count(self.retry_on_timeout_count - 1)
            .build()
    }
}

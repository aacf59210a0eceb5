//! Durable, distributed task-scheduler core.
//!
//! Clients `schedule` named tasks to run at or after a wall-clock time; one
//! or more worker processes atomically claim due tasks via [`TaskStore`],
//! execute user-registered handlers, persist results, and enqueue follow-up
//! occurrences. The storage substrate is any [`TaskStore`] implementation
//! offering atomic conditional updates; `scheduler-mongodb` is the reference
//! adapter.

pub mod claim;
pub mod clock;
pub mod engine;
pub mod error;
pub mod filter;
pub mod memory;
pub mod poll;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod sweeper;
pub mod task;

pub use clock::{fixed_clock, system_clock, Clock, ClockRef, FixedClock, SystemClock};
pub use error::{Result, SchedulerError};
pub use filter::TaskFilter;
pub use memory::MemoryStore;
pub use poll::{poll, PollConfig, PollLoop};
pub use registry::{BoxedHandler, HandlerError, HandlerRegistry, HandlerResult, HandlerTree, TaskContext};
pub use scheduler::{ScheduleOptions, Scheduler};
pub use store::TaskStore;
pub use task::{
    LogEntry, SideEffect, Task, TaskError, TaskStatus, DEFAULT_LEASE_MS, DEFAULT_SCHEDULING_TIMEOUT_MS,
};

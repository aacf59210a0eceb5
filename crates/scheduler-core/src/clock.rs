//! Time indirection. Nothing in this crate reads the wall clock directly;
//! every entry point threads a [`ClockRef`] through instead, falling back to
//! [`SystemClock`] when the caller supplies none.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A source of "now". Implementations must be cheap and side-effect-free.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl fmt::Debug for dyn Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clock(now={})", self.now())
    }
}

/// Shared handle to a [`Clock`], cloned freely across workers and ticks.
pub type ClockRef = Arc<dyn Clock>;

/// The default clock: reads [`Utc::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a single instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn system_clock() -> ClockRef {
    Arc::new(SystemClock)
}

pub fn fixed_clock(at: DateTime<Utc>) -> ClockRef {
    Arc::new(FixedClock(at))
}

//! MongoDB-backed [`TaskStore`](scheduler_core::TaskStore), the reference
//! storage adapter. Claim, sweep, and cancel all go through
//! `find_one_and_update` so the state transition a worker observes is
//! exactly the one MongoDB committed, never a read-then-write race.

mod store;

pub use store::MongoTaskStore;

//! Worker pool consuming the task queue.
//!
//! Each worker loops dequeue → [`Orchestrator::process`] → ack/nack, holding
//! one job at a time. While a job runs, a [`LeaseHeartbeat`] keeps its lease
//! alive so that long jobs are not redelivered to another worker.
//!
//! [`Orchestrator::process`]: crate::orchestrator::Orchestrator::process

pub mod heartbeat;
pub mod pool;

pub use heartbeat::LeaseHeartbeat;
pub use pool::WorkerPool;

//! Worker pools and the bounded queues that connect them
//!
//! Every pipeline stage runs as a [`WorkerPool`]: a fixed set of threads
//! executing the same [`Stage`] loop body against one shared input queue.

mod queue;
mod worker;

pub use queue::{PopError, QueueError, WorkQueue};
pub use worker::{Emission, PoolError, Stage, Worker, WorkerPool, QUEUE_SLOTS_PER_WORKER};

//! Background job execution.
//!
//! A [`WorkerPool`] runs N worker threads. Each one:
//! - dequeues a delivery from the job channel (bounded wait, so shutdown is
//!   observed within `dequeue_wait`)
//! - claims the job in the record store (PENDING -> STARTED)
//! - runs the injected compute with panic and timeout containment
//! - records SUCCESS or FAILURE, conditional on still holding the claim
//! - acks or releases the delivery

mod guard;
pub mod pool;

pub use pool::{
    POISON_REASON, Processed, Settlement, WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerPoolStats,
};

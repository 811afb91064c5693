//! Infrastructure layer: record stores, broker-backed channels, the job
//! coordinator and the worker pool.

pub mod coordinator;
pub mod store;
pub mod transport;
pub mod workers;

pub use coordinator::{CoordinatorError, JobCoordinator, PollOptions};
pub use store::{InMemoryJobRecordStore, JobRecordStore, StoreError};
pub use workers::{Processed, Settlement, WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerPoolStats};

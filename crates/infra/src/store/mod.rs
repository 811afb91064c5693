//! Job Record Store boundary.
//!
//! Keyed storage for job records. The only shared mutable resource of the
//! job system: the coordinator creates records, workers advance them.
//!
//! ## Consistency contract
//!
//! - `put` never overwrites: one record per id
//! - `update` applies the mutator atomically per key; a mutator that returns
//!   an error leaves the stored record untouched
//! - Reads observe the latest committed write for the same id, even across
//!   processes (backend's responsibility)

use std::sync::Arc;

use thiserror::Error;

use jobrelay_core::{JobId, JobRecord, TransitionError};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use in_memory::InMemoryJobRecordStore;
#[cfg(feature = "redis")]
pub use redis_store::{RedisJobRecordStore, RedisStoreConfig};

/// Mutation applied to a record inside [`JobRecordStore::update`].
///
/// May be invoked more than once when the backend retries an optimistic
/// transaction, always on a fresh copy of the stored record.
pub type RecordMutator<'a> = dyn FnMut(&mut JobRecord) -> Result<(), TransitionError> + 'a;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("job record already exists: {0}")]
    AlreadyExists(JobId),

    #[error("job record not found: {0}")]
    NotFound(JobId),

    #[error("update rejected: {0}")]
    Rejected(#[from] TransitionError),

    #[error("record serialization failed: {0}")]
    Serialization(String),
}

/// Durable per-job record storage.
pub trait JobRecordStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    fn put(&self, record: JobRecord) -> Result<(), StoreError>;

    /// Load a record. `Ok(None)` means never written or evicted.
    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Atomically read-modify-write one record and return the committed value.
    fn update(&self, id: JobId, mutator: &mut RecordMutator<'_>) -> Result<JobRecord, StoreError>;

    /// Delete a record. Returns whether it existed.
    fn remove(&self, id: JobId) -> Result<bool, StoreError>;
}

impl<S> JobRecordStore for Arc<S>
where
    S: JobRecordStore + ?Sized,
{
    fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        (**self).put(record)
    }

    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        (**self).get(id)
    }

    fn update(&self, id: JobId, mutator: &mut RecordMutator<'_>) -> Result<JobRecord, StoreError> {
        (**self).update(id, mutator)
    }

    fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        (**self).remove(id)
    }
}

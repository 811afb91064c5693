//! In-memory job record store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jobrelay_core::{JobId, JobRecord};

use super::{JobRecordStore, RecordMutator, StoreError};

/// `RwLock<HashMap>` store. `update` runs under the write lock, which makes
/// it atomic per key (and, more coarsely, across keys).
#[derive(Debug)]
pub struct InMemoryJobRecordStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryJobRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("record store lock poisoned".to_string())
}

impl JobRecordStore for InMemoryJobRecordStore {
    fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }

    fn update(&self, id: JobId, mutator: &mut RecordMutator<'_>) -> Result<JobRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let current = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Mutate a copy so a rejected transition leaves the record untouched.
        let mut next = current.clone();
        mutator(&mut next)?;
        *current = next.clone();
        Ok(next)
    }

    fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(&id).is_some())
    }
}

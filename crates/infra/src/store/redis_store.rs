//! Redis-backed job record store (durable, shared across processes).
//!
//! - **Layout**: one JSON string per job at `<key_prefix>:<job_id>`
//! - **Create**: `SET NX` so an id is never written twice
//! - **Update**: `WATCH` / `MULTI` / `EXEC` optimistic transaction; the
//!   mutator is re-run on a fresh read whenever another writer got in first
//! - **Retention**: every write (re)sets the record TTL when one is configured

use std::time::Duration;

use tracing::{instrument, warn};

use jobrelay_core::{JobId, JobRecord};

use super::{JobRecordStore, RecordMutator, StoreError};

const DEFAULT_KEY_PREFIX: &str = "jobrelay:job";

/// Default record retention (one day).
const DEFAULT_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g. "redis://localhost:6379").
    pub url: String,
    pub key_prefix: String,
    /// Record time-to-live; `None` keeps records forever.
    pub ttl: Option<Duration>,
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl: Some(Duration::from_secs(DEFAULT_TTL_SECS)),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct RedisJobRecordStore {
    client: redis::Client,
    key_prefix: String,
    ttl_secs: Option<u64>,
}

impl RedisJobRecordStore {
    pub fn new(config: RedisStoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            key_prefix: config.key_prefix,
            // Redis rejects EX 0.
            ttl_secs: config.ttl.map(|ttl| ttl.as_secs().max(1)),
        })
    }

    fn key(&self, id: JobId) -> String {
        format!("{}:{}", self.key_prefix, id)
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        self.client
            .get_connection()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn set_cmd(&self, key: &str, payload: &str, condition: &str) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload).arg(condition);
        if let Some(secs) = self.ttl_secs {
            cmd.arg("EX").arg(secs);
        }
        cmd
    }
}

fn encode(record: &JobRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(raw: &str) -> Result<JobRecord, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn command_error(op: &str, e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(format!("{op} failed: {e}"))
}

impl JobRecordStore for RedisJobRecordStore {
    #[instrument(skip(self, record), fields(job_id = %record.id), err)]
    fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        let payload = encode(&record)?;
        let key = self.key(record.id);
        let mut conn = self.connection()?;

        // Nil reply means NX refused the write.
        let reply: Option<String> = self
            .set_cmd(&key, &payload, "NX")
            .query(&mut conn)
            .map_err(|e| command_error("SET NX", e))?;

        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::AlreadyExists(record.id)),
        }
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(id))
            .query(&mut conn)
            .map_err(|e| command_error("GET", e))?;

        raw.as_deref().map(decode).transpose()
    }

    #[instrument(skip(self, mutator), fields(job_id = %id), err)]
    fn update(&self, id: JobId, mutator: &mut RecordMutator<'_>) -> Result<JobRecord, StoreError> {
        let key = self.key(id);
        let mut conn = self.connection()?;
        let mut result: Option<Result<JobRecord, StoreError>> = None;

        redis::transaction(&mut conn, &[key.as_str()], |con, pipe| {
            let raw: Option<String> = redis::cmd("GET").arg(&key).query(con)?;

            let current = match raw.as_deref().map(decode) {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    result = Some(Err(e));
                    return Ok(Some(()));
                }
                None => {
                    result = Some(Err(StoreError::NotFound(id)));
                    return Ok(Some(()));
                }
            };

            let mut next = current.clone();
            if let Err(e) = mutator(&mut next) {
                result = Some(Err(StoreError::Rejected(e)));
                return Ok(Some(()));
            }
            if next == current {
                result = Some(Ok(next));
                return Ok(Some(()));
            }

            let payload = match encode(&next) {
                Ok(p) => p,
                Err(e) => {
                    result = Some(Err(e));
                    return Ok(Some(()));
                }
            };

            pipe.add_command(self.set_cmd(&key, &payload, "XX")).ignore();
            // Nil from EXEC: a watched key changed, run the closure again.
            let committed: Option<()> = pipe.query(con)?;
            if committed.is_some() {
                result = Some(Ok(next));
            } else {
                warn!(job_id = %id, "record changed concurrently; retrying update");
            }
            Ok(committed)
        })
        .map_err(|e| command_error("transaction", e))?;

        result.unwrap_or_else(|| Err(StoreError::Unavailable("transaction produced no result".to_string())))
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(id))
            .query(&mut conn)
            .map_err(|e| command_error("DEL", e))?;
        Ok(removed > 0)
    }
}

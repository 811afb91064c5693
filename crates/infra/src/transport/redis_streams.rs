//! Redis Streams-backed job channel (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams (XADD/XREADGROUP) to provide:
//! - **Durable delivery**: entries persist until acknowledged
//! - **Competing consumers**: all workers join one consumer group, so each
//!   entry is handed to a single worker
//! - **Crash recovery**: entries left pending longer than the visibility
//!   timeout are XCLAIMed by the next worker that asks for work
//!
//! ## Layout
//!
//! - **Stream key**: `jobrelay:jobs`, fields `job_id` and `payload` (JSON `JobMessage`)
//! - **Consumer group**: `jobrelay.workers`
//! - **Consumers**: one per worker thread (e.g. `worker-host-0`)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redis::Value;
use tracing::{debug, instrument, warn};

use jobrelay_channel::{ChannelError, Delivery, DeliveryTag, JobChannel, JobMessage};

/// Default stream key for job messages
const DEFAULT_STREAM_KEY: &str = "jobrelay:jobs";

/// Default consumer group shared by all workers
const DEFAULT_GROUP: &str = "jobrelay.workers";

/// Default pending entry timeout (entries idle longer than this are redelivered)
const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 60_000;

/// How many pending entries to inspect per dequeue when looking for stale work
const PENDING_SCAN_COUNT: usize = 10;

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    /// Redis connection URL (e.g. "redis://localhost:6379").
    pub url: String,
    pub stream_key: String,
    pub group: String,
    pub visibility_timeout: Duration,
}

impl RedisStreamsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            group: DEFAULT_GROUP.to_string(),
            visibility_timeout: Duration::from_millis(DEFAULT_VISIBILITY_TIMEOUT_MS),
        }
    }

    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = key.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct RedisStreamsChannel {
    client: Arc<redis::Client>,
    stream_key: String,
    group: String,
    visibility_timeout_ms: u64,
    group_ready: AtomicBool,
}

impl RedisStreamsChannel {
    pub fn new(config: RedisStreamsConfig) -> Result<Self, ChannelError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| ChannelError::Unavailable(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: config.stream_key,
            group: config.group,
            visibility_timeout_ms: millis(config.visibility_timeout),
            group_ready: AtomicBool::new(false),
        })
    }

    fn connection(&self) -> Result<redis::Connection, ChannelError> {
        self.client
            .get_connection()
            .map_err(|e| ChannelError::Unavailable(e.to_string()))
    }

    /// Ensure the consumer group exists (idempotent).
    ///
    /// Created from ID "0" with MKSTREAM, so entries added before the first
    /// worker started are still delivered.
    fn ensure_consumer_group(&self, conn: &mut redis::Connection) -> Result<(), ChannelError> {
        if self.group_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(conn);

        match created {
            Ok(_) => {}
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(command_error("XGROUP CREATE", e)),
        }

        self.group_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Extended XPENDING over entries idle for at least the visibility
    /// timeout, oldest first. The `IDLE` filter needs Redis 6.2.
    fn pending_scan(&self) -> redis::Cmd {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(&self.stream_key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.visibility_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(PENDING_SCAN_COUNT);
        cmd
    }

    /// Take over one entry another consumer left pending for too long.
    fn claim_stale(
        &self,
        conn: &mut redis::Connection,
        consumer: &str,
    ) -> Result<Option<Delivery>, ChannelError> {
        // Extended XPENDING: [id, owner, idle_ms, times_delivered] per entry.
        let pending: Vec<(String, String, u64, u64)> = self
            .pending_scan()
            .query(conn)
            .map_err(|e| command_error("XPENDING", e))?;

        for (id, owner, idle_ms, times_delivered) in pending {
            if idle_ms < self.visibility_timeout_ms {
                continue;
            }

            // Empty reply: another consumer claimed it first.
            let claimed: Value = redis::cmd("XCLAIM")
                .arg(&self.stream_key)
                .arg(&self.group)
                .arg(consumer)
                .arg(self.visibility_timeout_ms)
                .arg(&id)
                .query(conn)
                .map_err(|e| command_error("XCLAIM", e))?;

            for entry in into_bulk(claimed)? {
                match parse_entry(entry) {
                    Ok(Some((entry_id, message))) => {
                        debug!(
                            consumer,
                            previous_owner = %owner,
                            entry_id = %entry_id,
                            job_id = %message.job_id,
                            "claimed stale pending entry"
                        );
                        return Ok(Some(Delivery {
                            message,
                            tag: DeliveryTag::new(entry_id),
                            delivery_count: u32::try_from(times_delivered + 1).unwrap_or(u32::MAX),
                        }));
                    }
                    Ok(None) => self.ack_ids(conn, &[id.as_str()])?,
                    Err(e) => {
                        warn!(entry_id = %id, error = %e, "dropping unreadable stream entry");
                        self.ack_ids(conn, &[id.as_str()])?;
                    }
                }
            }
        }

        Ok(None)
    }

    /// Read one never-delivered entry, blocking up to `wait`.
    fn read_new(
        &self,
        conn: &mut redis::Connection,
        consumer: &str,
        wait: Duration,
    ) -> Result<Option<Delivery>, ChannelError> {
        // BLOCK 0 would wait forever.
        let block_ms = millis(wait).max(1);

        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(conn)
            .map_err(|e| command_error("XREADGROUP", e))?;

        for entry in stream_entries(reply)? {
            match parse_entry(entry) {
                Ok(Some((entry_id, message))) => {
                    return Ok(Some(Delivery {
                        message,
                        tag: DeliveryTag::new(entry_id),
                        delivery_count: 1,
                    }));
                }
                Ok(None) => {}
                Err(e) => warn!(consumer, error = %e, "skipping unreadable stream entry"),
            }
        }

        Ok(None)
    }

    /// Acknowledge and delete entries.
    fn ack_ids(&self, conn: &mut redis::Connection, ids: &[&str]) -> Result<(), ChannelError> {
        if ids.is_empty() {
            return Ok(());
        }

        let _: (u64, u64) = redis::pipe()
            .cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(ids)
            .cmd("XDEL")
            .arg(&self.stream_key)
            .arg(ids)
            .query(conn)
            .map_err(|e| command_error("XACK", e))?;

        Ok(())
    }
}

impl JobChannel for RedisStreamsChannel {
    #[instrument(
        skip(self, message),
        fields(stream_key = %self.stream_key, job_id = %message.job_id),
        err
    )]
    fn enqueue(&self, message: JobMessage) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;

        let mut conn = self.connection()?;

        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*") // Auto-generate entry ID
            .arg("job_id")
            .arg(message.job_id.to_string())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| command_error("XADD", e))?;

        Ok(())
    }

    fn dequeue(&self, consumer: &str, wait: Duration) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.connection()?;
        self.ensure_consumer_group(&mut conn)?;

        if let Some(delivery) = self.claim_stale(&mut conn, consumer)? {
            return Ok(Some(delivery));
        }

        self.read_new(&mut conn, consumer, wait)
    }

    #[instrument(skip(self, delivery), fields(entry_id = %delivery.tag, job_id = %delivery.job_id()), err)]
    fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut conn = self.connection()?;
        self.ack_ids(&mut conn, &[delivery.tag.as_str()])
    }

    fn release(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        // Streams have no negative ack: the entry stays pending and is
        // reclaimed once it has been idle for the visibility timeout.
        debug!(entry_id = %delivery.tag, job_id = %delivery.job_id(), "released entry stays pending");
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn command_error(op: &str, e: redis::RedisError) -> ChannelError {
    ChannelError::Unavailable(format!("{op} failed: {e}"))
}

fn into_bulk(value: Value) -> Result<Vec<Value>, ChannelError> {
    match value {
        Value::Bulk(items) => Ok(items),
        Value::Nil => Ok(Vec::new()),
        other => Err(ChannelError::Serialization(format!("unexpected reply: {other:?}"))),
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(data) => Some(String::from_utf8_lossy(data).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// Flatten an XREADGROUP reply: `[[stream_key, [entry, ...]], ...]`.
fn stream_entries(reply: Value) -> Result<Vec<Value>, ChannelError> {
    let mut entries = Vec::new();
    for stream in into_bulk(reply)? {
        let mut parts = into_bulk(stream)?.into_iter();
        let _stream_key = parts.next();
        if let Some(list) = parts.next() {
            entries.extend(into_bulk(list)?);
        }
    }
    Ok(entries)
}

/// Parse one stream entry: `[entry_id, [field1, value1, field2, value2, ...]]`.
///
/// `Ok(None)` for entries whose body was deleted while still pending.
fn parse_entry(entry: Value) -> Result<Option<(String, JobMessage)>, ChannelError> {
    let mut parts = match entry {
        Value::Nil => return Ok(None),
        other => into_bulk(other)?.into_iter(),
    };

    let entry_id = parts
        .next()
        .as_ref()
        .and_then(as_string)
        .ok_or_else(|| ChannelError::Serialization("entry without id".to_string()))?;

    let fields = match parts.next() {
        None | Some(Value::Nil) => return Ok(None),
        Some(fields) => into_bulk(fields)?,
    };

    let payload = fields
        .chunks(2)
        .find_map(|pair| match pair {
            [key, value] if as_string(key).as_deref() == Some("payload") => as_string(value),
            _ => None,
        })
        .ok_or_else(|| ChannelError::Serialization(format!("entry {entry_id} has no payload")))?;

    let message: JobMessage = serde_json::from_str(&payload)
        .map_err(|e| ChannelError::Serialization(format!("entry {entry_id}: {e}")))?;

    Ok(Some((entry_id, message)))
}

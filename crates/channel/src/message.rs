//! Message envelope carried by the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobrelay_core::{JobArgs, JobId};

/// What a submitter hands to the channel: the job id and a copy of its args.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub args: JobArgs,
    pub enqueued_at: DateTime<Utc>,
}

impl JobMessage {
    pub fn new(job_id: JobId, args: JobArgs) -> Self {
        Self {
            job_id,
            args,
            enqueued_at: Utc::now(),
        }
    }
}

/// Backend-specific handle used to ack or release a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed to one consumer.
///
/// Stays owed to the channel until acked; an unacked delivery is handed out
/// again after the backend's visibility timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: JobMessage,
    pub tag: DeliveryTag,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

impl Delivery {
    pub fn job_id(&self) -> JobId {
        self.message.job_id
    }

    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }
}

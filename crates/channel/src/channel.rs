//! Job channel abstraction (mechanics only).
//!
//! A channel is a **work queue**, not a broadcast bus: every message goes to
//! exactly one of the competing consumers.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a message stays owed until acked. If the consumer
//!   crashes (or releases it), the message is handed out again and
//!   `Delivery::delivery_count` goes up. Consumers must detect duplicates via
//!   the job id.
//! - **No cross-producer ordering**: FIFO per producer is best-effort and the
//!   job system never relies on it.
//!
//! ## Blocking
//!
//! `dequeue` suspends the caller for at most `wait`. Workers call it in a
//! loop so they can notice shutdown between waits.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::message::{Delivery, JobMessage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The broker could not be reached or refused the command.
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    /// The channel is at capacity.
    #[error("channel is full ({capacity} messages)")]
    Full { capacity: usize },

    /// The channel was shut down.
    #[error("channel closed")]
    Closed,

    #[error("message serialization failed: {0}")]
    Serialization(String),
}

/// Competing-consumer job channel.
///
/// Implementations must be safe to share across threads: any number of
/// submitters enqueue while any number of workers dequeue.
pub trait JobChannel: Send + Sync {
    /// Append a message. Returns once the backend accepted it.
    fn enqueue(&self, message: JobMessage) -> Result<(), ChannelError>;

    /// Wait up to `wait` for the next message for `consumer`.
    fn dequeue(&self, consumer: &str, wait: Duration) -> Result<Option<Delivery>, ChannelError>;

    /// Mark a delivery as processed; it is never handed out again.
    fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Give a delivery back so it is redelivered later.
    fn release(&self, delivery: &Delivery) -> Result<(), ChannelError>;
}

impl<C> JobChannel for Arc<C>
where
    C: JobChannel + ?Sized,
{
    fn enqueue(&self, message: JobMessage) -> Result<(), ChannelError> {
        (**self).enqueue(message)
    }

    fn dequeue(&self, consumer: &str, wait: Duration) -> Result<Option<Delivery>, ChannelError> {
        (**self).dequeue(consumer, wait)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        (**self).ack(delivery)
    }

    fn release(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        (**self).release(delivery)
    }
}

//! Channel Transport: durable handoff of jobs from submitters to workers.

pub mod channel;
pub mod in_memory;
pub mod message;

pub use channel::{ChannelError, JobChannel};
pub use in_memory::{InMemoryChannel, InMemoryChannelConfig};
pub use message::{Delivery, DeliveryTag, JobMessage};

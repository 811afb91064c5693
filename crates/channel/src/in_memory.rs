//! In-memory job channel for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::channel::{ChannelError, JobChannel};
use crate::message::{Delivery, DeliveryTag, JobMessage};

const TAG_PREFIX: &str = "mem-";

/// Released deliveries back off up to `redelivery_delay * 2^MAX_BACKOFF_SHIFT`.
const MAX_BACKOFF_SHIFT: u32 = 10;

#[derive(Debug, Clone)]
pub struct InMemoryChannelConfig {
    /// Maximum number of ready + in-flight messages (`None` = unbounded).
    pub capacity: Option<usize>,
    /// How long a delivery may stay unacked before it is handed out again.
    pub visibility_timeout: Duration,
    /// How long a delivery released on its first handout stays hidden.
    /// Doubles with every further delivery, capped at `visibility_timeout`.
    pub redelivery_delay: Duration,
}

impl Default for InMemoryChannelConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            visibility_timeout: Duration::from_secs(30),
            redelivery_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct Queued {
    message: JobMessage,
    deliveries: u32,
}

#[derive(Debug)]
struct InFlight {
    queued: Queued,
    /// `None` when the visibility timeout is too large to represent.
    visible_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Queued>,
    in_flight: HashMap<u64, InFlight>,
    next_tag: u64,
    closed: bool,
}

impl State {
    fn depth(&self) -> usize {
        self.ready.len() + self.in_flight.len()
    }

    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at.is_some_and(|at| at <= now))
            .map(|(tag, _)| *tag)
            .collect();

        for tag in expired {
            if let Some(f) = self.in_flight.remove(&tag) {
                self.ready.push_back(f.queued);
            }
        }
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.in_flight.values().filter_map(|f| f.visible_at).min()
    }
}

/// In-process work queue.
///
/// - Mutex + condvar; no IO
/// - Competing consumers: one delivery per message until it is acked,
///   released, or its visibility timeout lapses
/// - Not durable across process restarts (use Redis Streams for that)
#[derive(Debug)]
pub struct InMemoryChannel {
    state: Mutex<State>,
    available: Condvar,
    config: InMemoryChannelConfig,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::with_config(InMemoryChannelConfig::default())
    }

    pub fn with_config(config: InMemoryChannelConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: Condvar::new(),
            config,
        }
    }

    /// Stop accepting and handing out messages. Blocked consumers wake up
    /// with [`ChannelError::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.available.notify_all();
    }

    /// Messages waiting to be handed out.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Messages handed out and not yet acked.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ChannelError> {
        self.state.lock().map_err(|_| poisoned())
    }

    /// Hidden time after a release of a message delivered `deliveries` times.
    fn release_delay(&self, deliveries: u32) -> Duration {
        let shift = deliveries.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.config
            .redelivery_delay
            .saturating_mul(1 << shift)
            .min(self.config.visibility_timeout)
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ChannelError {
    ChannelError::Unavailable("channel lock poisoned".to_string())
}

fn parse_tag(tag: &DeliveryTag) -> Option<u64> {
    tag.as_str().strip_prefix(TAG_PREFIX)?.parse().ok()
}

impl JobChannel for InMemoryChannel {
    fn enqueue(&self, message: JobMessage) -> Result<(), ChannelError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if let Some(capacity) = self.config.capacity {
            if state.depth() >= capacity {
                return Err(ChannelError::Full { capacity });
            }
        }

        state.ready.push_back(Queued {
            message,
            deliveries: 0,
        });
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    fn dequeue(&self, consumer: &str, wait: Duration) -> Result<Option<Delivery>, ChannelError> {
        // No deadline when `wait` is too large to represent.
        let deadline = Instant::now().checked_add(wait);
        let mut state = self.lock()?;

        loop {
            if state.closed {
                return Err(ChannelError::Closed);
            }

            let now = Instant::now();
            state.requeue_expired(now);

            if let Some(mut queued) = state.ready.pop_front() {
                queued.deliveries += 1;
                state.next_tag += 1;
                let tag = state.next_tag;

                let delivery = Delivery {
                    message: queued.message.clone(),
                    tag: DeliveryTag::new(format!("{TAG_PREFIX}{tag}")),
                    delivery_count: queued.deliveries,
                };
                state.in_flight.insert(
                    tag,
                    InFlight {
                        queued,
                        visible_at: now.checked_add(self.config.visibility_timeout),
                    },
                );

                debug!(
                    consumer,
                    job_id = %delivery.job_id(),
                    delivery_count = delivery.delivery_count,
                    "dequeued job"
                );
                return Ok(Some(delivery));
            }

            if deadline.is_some_and(|at| now >= at) {
                return Ok(None);
            }

            // Wake for whichever comes first: the caller's deadline or an
            // in-flight message becoming visible again.
            let wake = match (deadline, state.next_visible_at()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            state = match wake {
                Some(at) => {
                    self.available
                        .wait_timeout(state, at.saturating_duration_since(now))
                        .map_err(|_| poisoned())?
                        .0
                }
                None => self.available.wait(state).map_err(|_| poisoned())?,
            };
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let Some(tag) = parse_tag(&delivery.tag) else {
            return Ok(());
        };

        let mut state = self.lock()?;
        if state.in_flight.remove(&tag).is_none() {
            // Visibility lapsed first; the message was already requeued.
            debug!(job_id = %delivery.job_id(), tag = %delivery.tag, "late ack ignored");
        }
        Ok(())
    }

    fn release(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let Some(tag) = parse_tag(&delivery.tag) else {
            return Ok(());
        };

        let mut state = self.lock()?;
        if let Some(f) = state.in_flight.get_mut(&tag) {
            let delay = self.release_delay(f.queued.deliveries);
            f.visible_at = Instant::now().checked_add(delay);
        }
        drop(state);

        self.available.notify_all();
        Ok(())
    }
}

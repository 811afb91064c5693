//! Job Coordinator: the submitting side's façade over the job system.
//!
//! `submit` is the only mutating entry point. It writes the PENDING record
//! first and enqueues second, so a worker never dequeues a job whose record
//! is missing. An enqueue failure removes the record again before the error
//! is returned.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};

use jobrelay_channel::{JobChannel, JobMessage};
use jobrelay_core::{JobArgs, JobId, JobRecord, JobState, Outcome};

use crate::store::{JobRecordStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    #[error("result of job {id} not ready (state {state})")]
    ResultNotReady { id: JobId, state: JobState },
}

impl From<StoreError> for CoordinatorError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => CoordinatorError::UnknownJob(id),
            other => CoordinatorError::StoreUnavailable(other.to_string()),
        }
    }
}

/// How `poll_result` re-reads a job.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Give up after this long.
    pub timeout: Duration,
    /// Pause between reads.
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(100),
        }
    }
}

impl PollOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

#[derive(Debug, Clone)]
pub struct JobCoordinator<S, C> {
    store: S,
    channel: C,
}

impl<S, C> JobCoordinator<S, C>
where
    S: JobRecordStore,
    C: JobChannel,
{
    pub fn new(store: S, channel: C) -> Self {
        Self { store, channel }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Create a job and hand it to the workers. Returns without waiting for
    /// execution.
    pub fn submit(&self, args: JobArgs) -> Result<JobId, CoordinatorError> {
        let record = JobRecord::new(args.clone());
        let id = record.id;

        self.store.put(record)?;

        if let Err(err) = self.channel.enqueue(JobMessage::new(id, args)) {
            match self.store.remove(id) {
                Ok(_) => warn!(job_id = %id, error = %err, "enqueue failed; submission rolled back"),
                Err(rollback) => error!(
                    job_id = %id,
                    error = %err,
                    rollback_error = %rollback,
                    "enqueue failed and rollback failed; record left pending"
                ),
            }
            return Err(CoordinatorError::TransportUnavailable(err.to_string()));
        }

        debug!(job_id = %id, "job submitted");
        Ok(id)
    }

    pub fn status(&self, id: JobId) -> Result<JobState, CoordinatorError> {
        Ok(self.record(id)?.state)
    }

    /// Terminal outcome, or `ResultNotReady` while the job is still pending
    /// or running.
    pub fn result(&self, id: JobId) -> Result<Outcome, CoordinatorError> {
        let record = self.record(id)?;
        match record.outcome {
            Some(outcome) if record.state.is_terminal() => Ok(outcome),
            _ => Err(CoordinatorError::ResultNotReady {
                id,
                state: record.state,
            }),
        }
    }

    /// Full record, for diagnostics.
    pub fn record(&self, id: JobId) -> Result<JobRecord, CoordinatorError> {
        self.store.get(id)?.ok_or(CoordinatorError::UnknownJob(id))
    }

    /// Re-issue `result` every `interval` until the job is terminal or
    /// `timeout` elapses. On timeout the last observed state is reported in
    /// `ResultNotReady`.
    pub fn poll_result(&self, id: JobId, options: PollOptions) -> Result<Outcome, CoordinatorError> {
        // A timeout too large to represent never expires.
        let deadline = Instant::now().checked_add(options.timeout);

        loop {
            match self.result(id) {
                Err(CoordinatorError::ResultNotReady { state, .. }) => {
                    let remaining = match deadline {
                        Some(at) => at.saturating_duration_since(Instant::now()),
                        None => Duration::MAX,
                    };
                    if remaining.is_zero() {
                        return Err(CoordinatorError::ResultNotReady { id, state });
                    }
                    thread::sleep(options.interval.min(remaining));
                }
                other => return other,
            }
        }
    }
}

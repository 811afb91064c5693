//! Error model for the pure job layer.

use std::time::Duration;

use thiserror::Error;

use crate::id::JobId;
use crate::job::JobState;

/// A string could not be parsed as a [`JobId`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid job id: {0}")]
pub struct InvalidJobId(pub String);

/// A requested state-machine move was refused.
///
/// Records are left untouched when a transition is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The job already reached SUCCESS or FAILURE.
    #[error("job {id} is already terminal ({state})")]
    AlreadyTerminal { id: JobId, state: JobState },

    /// The move is not an edge of the state machine.
    #[error("job {id} cannot move from {from} to {to}")]
    Illegal { id: JobId, from: JobState, to: JobState },

    /// The caller's claim was superseded by a later claim on the same job.
    #[error("job {id} is held by attempt {current}, not attempt {attempt}")]
    StaleAttempt { id: JobId, current: u32, attempt: u32 },
}

/// Failure raised by a [`Compute`](crate::Compute) capability.
///
/// Never propagated to callers of the job system: workers turn it into a
/// FAILURE outcome whose reason is this error's display text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("compute failed: {0}")]
    Failed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("compute timed out after {0:?}")]
    Timeout(Duration),

    #[error("compute panicked: {0}")]
    Panicked(String),
}

impl ComputeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

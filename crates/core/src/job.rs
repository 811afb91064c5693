//! Job record and lifecycle state machine.
//!
//! ```text
//! PENDING --(claim)--> STARTED --(complete Ok)--> SUCCESS
//!                         \----(complete Err)--> FAILURE
//! ```
//!
//! SUCCESS and FAILURE are terminal. A stale STARTED claim may be taken over
//! by another worker (state stays STARTED, `attempt` increases); a move never
//! goes backward.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ComputeError, TransitionError};
use crate::id::JobId;

/// Input parameters supplied by the submitter.
///
/// Opaque to the job system and passed to compute unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobArgs(BTreeMap<String, String>);

impl JobArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for JobArgs {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self(value)
    }
}

impl From<HashMap<String, String>> for JobArgs {
    fn from(value: HashMap<String, String>) -> Self {
        Self(value.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Persisted and queued, not yet picked up.
    Pending,
    /// Claimed by a worker.
    Started,
    /// Compute returned an output.
    Success,
    /// Compute failed (or the job was abandoned).
    Failure,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    /// Position along the lifecycle; never decreases for a given job.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Started => 1,
            JobState::Success | JobState::Failure => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Started => "STARTED",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success { output: JsonValue },
    Failure { reason: String },
}

impl Outcome {
    pub fn success(output: JsonValue) -> Self {
        Self::Success { output }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// The terminal state this outcome puts a job in.
    pub fn state(&self) -> JobState {
        match self {
            Outcome::Success { .. } => JobState::Success,
            Outcome::Failure { .. } => JobState::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn output(&self) -> Option<&JsonValue> {
        match self {
            Outcome::Success { output } => Some(output),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { reason } => Some(reason),
        }
    }
}

impl From<Result<JsonValue, ComputeError>> for Outcome {
    fn from(value: Result<JsonValue, ComputeError>) -> Self {
        match value {
            Ok(output) => Outcome::success(output),
            Err(err) => Outcome::failure(err.to_string()),
        }
    }
}

/// What a worker should do with a delivered job after trying to claim it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// The caller now owns the job and must run it as `attempt`.
    Run { attempt: u32, reclaimed: bool },
    /// Another worker holds a fresh claim.
    InFlight { worker: Option<String> },
    /// Nothing left to do.
    Finished(JobState),
}

/// Persisted job metadata and result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub args: JobArgs,
    pub state: JobState,
    /// Present only once the job is terminal.
    pub outcome: Option<Outcome>,
    /// Number of claims taken so far (0 while pending).
    pub attempt: u32,
    /// Worker holding the latest claim.
    pub worker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a pending record with a freshly allocated id.
    pub fn new(args: JobArgs) -> Self {
        Self::with_id(JobId::new(), args)
    }

    pub fn with_id(id: JobId, args: JobArgs) -> Self {
        Self {
            id,
            args,
            state: JobState::Pending,
            outcome: None,
            attempt: 0,
            worker: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Try to take ownership of the job for `worker`.
    ///
    /// A STARTED job whose claim is older than `stale_after` is assumed to
    /// belong to a crashed worker and is taken over.
    pub fn claim(&mut self, worker: &str, now: DateTime<Utc>, stale_after: Duration) -> ClaimDecision {
        match self.state {
            JobState::Pending => {
                self.take_claim(worker, now);
                ClaimDecision::Run {
                    attempt: self.attempt,
                    reclaimed: false,
                }
            }
            JobState::Started if self.claim_is_stale(now, stale_after) => {
                self.take_claim(worker, now);
                ClaimDecision::Run {
                    attempt: self.attempt,
                    reclaimed: true,
                }
            }
            JobState::Started => ClaimDecision::InFlight {
                worker: self.worker.clone(),
            },
            state => ClaimDecision::Finished(state),
        }
    }

    /// Record the outcome of `attempt`. Write-once.
    pub fn complete(
        &mut self,
        attempt: u32,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let to = outcome.state();
        match self.state {
            state if state.is_terminal() => Err(TransitionError::AlreadyTerminal { id: self.id, state }),
            JobState::Started if self.attempt != attempt => Err(TransitionError::StaleAttempt {
                id: self.id,
                current: self.attempt,
                attempt,
            }),
            JobState::Started => {
                self.finish(outcome, now);
                Ok(())
            }
            from => Err(TransitionError::Illegal { id: self.id, from, to }),
        }
    }

    /// Fail a job that can no longer be delivered, whatever worker holds it.
    ///
    /// Returns `false` when the job was already terminal (left untouched).
    pub fn abandon(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.finish(Outcome::failure(reason), now);
        true
    }

    /// STARTED under a claim younger than `stale_after`.
    pub fn has_live_claim(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.state == JobState::Started && !self.claim_is_stale(now, stale_after)
    }

    fn take_claim(&mut self, worker: &str, now: DateTime<Utc>) {
        self.state = JobState::Started;
        self.attempt += 1;
        self.worker = Some(worker.to_string());
        self.started_at = Some(now);
    }

    fn claim_is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.started_at {
            // A clock running backwards yields a negative delta: not stale.
            Some(started) => (now - started).to_std().is_ok_and(|held| held >= stale_after),
            None => true,
        }
    }

    fn finish(&mut self, outcome: Outcome, now: DateTime<Utc>) {
        self.state = outcome.state();
        self.outcome = Some(outcome);
        self.finished_at = Some(now);
    }
}

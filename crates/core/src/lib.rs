//! `jobrelay-core`: job model building blocks.
//!
//! This crate contains the **pure** pieces of the job system (no IO):
//! identifiers, the job record and its state machine, outcomes, and the
//! compute capability injected into workers.

pub mod compute;
pub mod error;
pub mod id;
pub mod job;

pub use compute::{Compute, FnCompute};
pub use error::{ComputeError, InvalidJobId, TransitionError};
pub use id::JobId;
pub use job::{ClaimDecision, JobArgs, JobRecord, JobState, Outcome};

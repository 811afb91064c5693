//! The opaque computation a worker performs for each job.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::ComputeError;
use crate::job::JobArgs;

/// A pluggable unit of work, injected into workers at construction time.
///
/// Implementations are built once per worker process and shared by every
/// worker thread, so any expensive state (models, lookup tables, clients)
/// lives inside the implementor rather than being rebuilt per job.
///
/// Errors and panics are contained by the worker and recorded as a FAILURE
/// outcome.
pub trait Compute: Send + Sync {
    fn compute(&self, args: &JobArgs) -> Result<JsonValue, ComputeError>;
}

impl<C> Compute for Arc<C>
where
    C: Compute + ?Sized,
{
    fn compute(&self, args: &JobArgs) -> Result<JsonValue, ComputeError> {
        (**self).compute(args)
    }
}

/// Adapter turning a closure into a [`Compute`].
pub struct FnCompute<F>(F);

impl<F> FnCompute<F>
where
    F: Fn(&JobArgs) -> Result<JsonValue, ComputeError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Compute for FnCompute<F>
where
    F: Fn(&JobArgs) -> Result<JsonValue, ComputeError> + Send + Sync,
{
    fn compute(&self, args: &JobArgs) -> Result<JsonValue, ComputeError> {
        (self.0)(args)
    }
}

impl<F> core::fmt::Debug for FnCompute<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FnCompute")
    }
}

//! Containment for the compute call: panics and hangs become `ComputeError`s.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;

use jobrelay_core::{Compute, ComputeError, JobArgs};

/// Run `compute` on `args`, never unwinding into the caller.
///
/// With a timeout the call runs on its own thread; a call that overruns is
/// reported as `Timeout` and left to finish (or hang) detached.
pub(crate) fn run_compute(
    compute: &Arc<dyn Compute>,
    args: &JobArgs,
    timeout: Option<Duration>,
) -> Result<JsonValue, ComputeError> {
    let Some(limit) = timeout else {
        return call_guarded(compute.as_ref(), args);
    };

    let (tx, rx) = mpsc::sync_channel(1);
    let compute = Arc::clone(compute);
    let args = args.clone();

    thread::Builder::new()
        .name("jobrelay-compute".to_string())
        .spawn(move || {
            // Receiver is gone when the call overran; nothing to report to.
            let _ = tx.send(call_guarded(compute.as_ref(), &args));
        })
        .map_err(|e| ComputeError::failed(format!("could not start compute thread: {e}")))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ComputeError::Timeout(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(ComputeError::Panicked(
            "compute thread exited without a result".to_string(),
        )),
    }
}

fn call_guarded(compute: &dyn Compute, args: &JobArgs) -> Result<JsonValue, ComputeError> {
    panic::catch_unwind(AssertUnwindSafe(|| compute.compute(args)))
        .unwrap_or_else(|payload| Err(ComputeError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

use std::sync::Arc;

use jobrelay_infra::CoordinatorError;

use crate::app::errors;
use crate::app::services::{AppServices, SharedCoordinator};

/// Run a coordinator call on the blocking pool.
///
/// Store and channel calls block (Redis round-trips, channel locks), so they
/// never run on the async executor threads. Coordinator errors are mapped to
/// their HTTP responses.
pub async fn with_coordinator<T, F>(services: &Arc<AppServices>, f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce(&SharedCoordinator) -> Result<T, CoordinatorError> + Send + 'static,
    T: Send + 'static,
{
    let services = services.clone();
    match tokio::task::spawn_blocking(move || f(services.coordinator())).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(errors::coordinator_error_to_response(err)),
        Err(err) => Err(errors::join_error_to_response(err)),
    }
}

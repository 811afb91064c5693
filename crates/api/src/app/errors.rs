use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use jobrelay_infra::CoordinatorError;

pub fn coordinator_error_to_response(err: CoordinatorError) -> axum::response::Response {
    match err {
        CoordinatorError::TransportUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "transport_unavailable", msg)
        }
        CoordinatorError::StoreUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        CoordinatorError::UnknownJob(id) => {
            json_error(StatusCode::NOT_FOUND, "unknown_job", format!("no job with id {id}"))
        }
        CoordinatorError::ResultNotReady { id, state } => (
            StatusCode::ACCEPTED,
            axum::Json(json!({
                "job_id": id.to_string(),
                "state": state,
            })),
        )
            .into_response(),
    }
}

/// A blocking task died before producing a response.
pub fn join_error_to_response(err: tokio::task::JoinError) -> axum::response::Response {
    tracing::error!(error = %err, "blocking task failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "request handler failed")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

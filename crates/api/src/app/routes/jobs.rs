use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use jobrelay_core::JobState;
use jobrelay_infra::CoordinatorError;

use crate::app::dto;
use crate::app::routes::common::with_coordinator;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job))
        .route("/:job_id", get(get_job))
        .route("/:job_id/status", get(get_job_status))
        .route("/:job_id/result", get(get_job_result))
}

pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitJobRequest>,
) -> axum::response::Response {
    match with_coordinator(&services, move |c| c.submit(body.args)).await {
        Ok(id) => Json(dto::SubmitJobResponse { job_id: id.to_string() }).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match with_coordinator(&services, move |c| c.record(id)).await {
        Ok(record) => Json(record).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match with_coordinator(&services, move |c| c.status(id)).await {
        Ok(state) => Json(dto::JobStatusResponse {
            job_id: id.to_string(),
            state,
        })
        .into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_job_result(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // Not-ready is a normal answer here, not an error.
    let result = with_coordinator(&services, move |c| match c.result(id) {
        Ok(outcome) => Ok(Ok(outcome)),
        Err(CoordinatorError::ResultNotReady { state, .. }) => Ok(Err(state)),
        Err(err) => Err(err),
    })
    .await;

    match result {
        Ok(Ok(outcome)) => Json(dto::JobResultResponse::from_outcome(id, outcome)).into_response(),
        Ok(Err(state)) => (StatusCode::ACCEPTED, Json(not_ready(id, state))).into_response(),
        Err(resp) => resp,
    }
}

fn not_ready(id: jobrelay_core::JobId, state: JobState) -> dto::JobStatusResponse {
    dto::JobStatusResponse {
        job_id: id.to_string(),
        state,
    }
}

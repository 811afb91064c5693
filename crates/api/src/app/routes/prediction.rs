//! Product categorization endpoints: form upload plus plain-text status and
//! result lookups.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};

use crate::app::routes::common::with_coordinator;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/prediction", get(no_endpoint))
        .route("/prediction/", get(no_endpoint))
        .route("/prediction/echo", get(echo))
        .route("/prediction/uploader", post(upload))
        .route("/prediction/task_status/:task_id", get(task_status))
        .route("/prediction/task_result/:task_id", get(task_result))
}

pub async fn no_endpoint() -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "no_endpoint", "no endpoint specified")
}

pub async fn echo() -> &'static str {
    "Hello! FINALMENTE!"
}

pub async fn upload(
    Extension(services): Extension<Arc<AppServices>>,
    Form(form): Form<dto::UploaderForm>,
) -> axum::response::Response {
    tracing::info!(item_a = %form.item_a, item_b = %form.item_b, "categorization requested");

    let args = form.into_args();
    match with_coordinator(&services, move |c| c.submit(args)).await {
        Ok(id) => Json(dto::TaskIdResponse { task_id: id.to_string() }).into_response(),
        Err(resp) => resp,
    }
}

pub async fn task_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(task_id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&task_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match with_coordinator(&services, move |c| c.status(id)).await {
        Ok(state) => format!("Status of the Task {state}").into_response(),
        Err(resp) => resp,
    }
}

pub async fn task_result(
    Extension(services): Extension<Arc<AppServices>>,
    Path(task_id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&task_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match with_coordinator(&services, move |c| c.result(id)).await {
        Ok(outcome) => format!("Result of the Task {}", dto::outcome_text(&outcome)).into_response(),
        Err(resp) => resp,
    }
}

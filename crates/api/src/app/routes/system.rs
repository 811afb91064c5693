use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};
use serde_json::json;

use crate::app::services::AppServices;

/// Liveness plus a snapshot of the embedded workers.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "backend": services.backend(),
        "workers": services.worker_count(),
        "worker_stats": services.worker_stats(),
    }))
}

use axum::Router;

pub mod common;
pub mod jobs;
pub mod prediction;
pub mod system;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/jobs", jobs::router())
        .merge(prediction::router())
}

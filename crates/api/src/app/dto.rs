use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobrelay_core::{JobArgs, JobId, JobState, Outcome};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub args: JobArgs,
}

/// Form posted to `/prediction/uploader`.
#[derive(Debug, Deserialize)]
pub struct UploaderForm {
    #[serde(default = "default_item_a")]
    pub item_a: String,
    #[serde(default = "default_item_b")]
    pub item_b: String,
}

fn default_item_a() -> String {
    "Jyoti".to_string()
}

fn default_item_b() -> String {
    "Yadav".to_string()
}

impl UploaderForm {
    pub fn into_args(self) -> JobArgs {
        JobArgs::new().with("item_a", self.item_a).with("item_b", self.item_b)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct TaskIdResponse {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub state: JobState,
}

#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub job_id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl JobResultResponse {
    pub fn from_outcome(id: JobId, outcome: Outcome) -> Self {
        let state = outcome.state();
        let (output, failure_reason) = match outcome {
            Outcome::Success { output } => (Some(output), None),
            Outcome::Failure { reason } => (None, Some(reason)),
        };

        Self {
            job_id: id.to_string(),
            state,
            output,
            failure_reason,
        }
    }
}

// -------------------------
// Helpers
// -------------------------

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse().map_err(|e: jobrelay_core::InvalidJobId| {
        errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_job_id", e.to_string())
    })
}

/// Human-readable result text: the category for categorizer output, the
/// reason for failures.
pub fn outcome_text(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success { output } => match output.get("category").and_then(JsonValue::as_str) {
            Some(category) => category.to_string(),
            None => output.to_string(),
        },
        Outcome::Failure { reason } => reason.clone(),
    }
}

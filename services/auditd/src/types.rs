use axum::{http::StatusCode, Json};
use auditlog::{EventStatus, Inclusion, RecordReceipt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize)]
pub struct RecordEventRequest {
    pub caller: String,
    pub operation: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub status: EventStatus,
    /// Defaults to the time the request reached the log
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecordEventResponse {
    pub event_id: Uuid,
    pub seq: i64,
    pub receipt: RecordReceipt,
    /// Set when the event is in the tree but its snapshot write failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VerifyRequest {
    pub data: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyResponse {
    pub included: bool,
    pub detail: Inclusion,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

pub type ApiFailure = (StatusCode, Json<ApiError>);

pub type ApiResult<T> = Result<T, ApiFailure>;

pub fn api_error(status: StatusCode, e: impl std::fmt::Display) -> ApiFailure {
    (status, Json(ApiError { error: e.to_string() }))
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::redact::Redactor;
use crate::{AuditError, Result};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failure { code: u16 },
}

/// One privileged API invocation: who did what, when, with what result
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: Uuid,
    pub caller: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub status: EventStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AuditEvent {
    /// New event with a fresh id; `params` pass through `redactor` first
    pub fn new(
        caller: impl Into<String>,
        operation: impl Into<String>,
        params: serde_json::Value,
        status: EventStatus,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        redactor: &dyn Redactor,
    ) -> Self {
        let operation = operation.into();
        let params = redactor.redact(&operation, params);
        Self {
            id: Uuid::new_v4(),
            caller: caller.into(),
            operation,
            params,
            status,
            started_at,
            duration_ms,
        }
    }

    /// The opaque string the tree stores
    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AuditError::Serialization(e.to_string()))
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| AuditError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::FieldRedactor;
    use serde_json::json;

    #[test]
    fn test_payload_roundtrip_keeps_redaction() {
        let redactor = FieldRedactor::new(["password"]);
        let event = AuditEvent::new(
            "user:42",
            "createUser",
            json!({"email": "a@b.c", "password": "hunter2"}),
            EventStatus::Success,
            Utc::now(),
            12,
            &redactor,
        );

        let payload = event.to_payload().unwrap();
        assert!(!payload.contains("hunter2"));

        let back = AuditEvent::from_payload(&payload).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.params["password"], json!("[REDACTED]"));
    }

    #[test]
    fn test_failure_status_serializes_code() {
        let status = EventStatus::Failure { code: 403 };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v, json!({"outcome": "failure", "code": 403}));
    }
}

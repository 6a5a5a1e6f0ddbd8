use std::sync::atomic::Ordering;

use auditlog::{AuditError, AuditEvent, RecordReceipt};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::{error, warn};

use crate::journal::{append_payload, delete_payload};
use crate::log_exec::with_log_mut_blocking;
use crate::state::SharedState;
use crate::types::{api_error, ApiFailure, ApiResult, RecordEventRequest, RecordEventResponse};

/// What became of a journaled event once the tree was asked to take it
#[derive(Debug)]
enum Settled {
    Accepted(RecordReceipt),
    /// In the tree; its snapshot write is pending
    Pending { receipt: RecordReceipt, warning: String },
    /// Not in the tree; the journal row has to go
    Refused(ApiFailure),
    /// In the tree but no receipt came back
    RecordedWithoutReceipt(ApiFailure),
}

fn settle(outcome: auditlog::Result<RecordReceipt>) -> Settled {
    match outcome {
        Ok(receipt) => Settled::Accepted(receipt),
        Err(AuditError::Persistence {
            recorded: true,
            receipt: Some(receipt),
            source,
        }) => Settled::Pending {
            receipt: *receipt,
            warning: format!("snapshot write pending: {source}"),
        },
        Err(e @ AuditError::Persistence { recorded: true, .. }) => Settled::RecordedWithoutReceipt(
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
        ),
        Err(e @ AuditError::Persistence { .. }) => {
            Settled::Refused(api_error(StatusCode::SERVICE_UNAVAILABLE, e))
        }
        Err(e) => Settled::Refused(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// Redact, journal and record one event. The journal row is committed first,
/// so the journal is never behind the tree; a refused event's row is removed.
pub async fn post_event(
    State(state): State<SharedState>,
    Json(req): Json<RecordEventRequest>,
) -> ApiResult<(StatusCode, Json<RecordEventResponse>)> {
    if state.journal_fenced.load(Ordering::SeqCst) {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "journal holds an unrecorded event; restart to replay it",
        ));
    }

    let event = AuditEvent::new(
        req.caller,
        req.operation,
        req.params,
        req.status,
        req.started_at.unwrap_or_else(Utc::now),
        req.duration_ms,
        state.redactor.as_ref(),
    );
    let payload = event
        .to_payload()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    // Held across the journal insert so journal order matches tree order
    let guard = state.log.clone().write_owned().await;

    let seq = append_payload(&state.pg_pool, event.id, &payload)
        .await
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;

    let (guard, outcome) = match with_log_mut_blocking(guard, move |log| log.record(&payload)).await
    {
        Ok(done) => done,
        Err(e) => {
            // The tree may or may not hold the event; only a replay can tell
            state.journal_fenced.store(true, Ordering::SeqCst);
            error!(event_id = %event.id, seq, error = %e, "record task failed");
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e));
        }
    };

    let (status, receipt, warning) = match settle(outcome) {
        Settled::Accepted(receipt) => (StatusCode::CREATED, receipt, None),
        Settled::Pending { receipt, warning } => {
            warn!(event_id = %event.id, seq, warning = warning.as_str(), "event recorded, snapshot pending");
            (StatusCode::ACCEPTED, receipt, Some(warning))
        }
        Settled::RecordedWithoutReceipt(failure) => return Err(failure),
        Settled::Refused(failure) => {
            if let Err(e) = delete_payload(&state.pg_pool, event.id).await {
                state.journal_fenced.store(true, Ordering::SeqCst);
                error!(event_id = %event.id, seq, error = %e, "refused event left in journal; writes fenced");
            }
            return Err(failure);
        }
    };
    drop(guard);

    Ok((
        status,
        Json(RecordEventResponse {
            event_id: event.id,
            seq,
            receipt,
            warning,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditlog::{SealedTree, StoreError};

    fn receipt(sealed: Option<SealedTree>) -> RecordReceipt {
        RecordReceipt {
            root_hash: "r1".into(),
            tree_index: 1,
            leaf_index: 0,
            sealed,
        }
    }

    fn offline() -> StoreError {
        StoreError::Unavailable("disk full".into())
    }

    #[test]
    fn test_pending_keeps_rollover_in_receipt() {
        let sealed = SealedTree {
            tree_index: 0,
            root_hash: "r0".into(),
        };
        let outcome = Err(AuditError::Persistence {
            recorded: true,
            receipt: Some(Box::new(receipt(Some(sealed.clone())))),
            source: offline(),
        });
        match settle(outcome) {
            Settled::Pending { receipt, warning } => {
                assert_eq!(receipt.sealed, Some(sealed));
                assert_eq!(receipt.tree_index, 1);
                assert!(warning.contains("disk full"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unrecorded_event_is_refused() {
        let outcome = Err(AuditError::Persistence {
            recorded: false,
            receipt: None,
            source: offline(),
        });
        match settle(outcome) {
            Settled::Refused((status, _)) => assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("unexpected: {other:?}"),
        }

        let outcome = Err(AuditError::Structural("append to full leaf".into()));
        match settle(outcome) {
            Settled::Refused((status, _)) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_clean_record_is_accepted() {
        match settle(Ok(receipt(None))) {
            Settled::Accepted(r) => assert_eq!(r.root_hash, "r1"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

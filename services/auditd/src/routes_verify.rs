use auditlog::{audit_chain, AuditLogSnapshot, ChainReport, Checkpoint, SnapshotStore};
use axum::{extract::State, http::StatusCode, Json};

use crate::log_exec::with_log_blocking;
use crate::state::SharedState;
use crate::types::{api_error, ApiResult, VerifyRequest, VerifyResponse};

pub async fn post_verify(
    State(state): State<SharedState>,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<Json<VerifyResponse>> {
    let detail = with_log_blocking(state.log.clone(), move |log| log.verify_detailed(&req.data))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    Ok(Json(VerifyResponse {
        included: detail.is_verified(),
        detail,
    }))
}

pub async fn get_root(State(state): State<SharedState>) -> Json<Checkpoint> {
    Json(state.log.read().await.checkpoint())
}

pub async fn get_snapshots(
    State(state): State<SharedState>,
) -> ApiResult<Json<Vec<AuditLogSnapshot>>> {
    let snapshots = with_log_blocking(state.log.clone(), |log| log.store().load_all_snapshots())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;

    Ok(Json(snapshots))
}

/// Recompute every persisted tree and the links between them
pub async fn get_chain(State(state): State<SharedState>) -> ApiResult<Json<ChainReport>> {
    let report = with_log_blocking(state.log.clone(), |log| {
        log.store()
            .load_all_snapshots()
            .map(|snapshots| audit_chain(&snapshots))
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
    .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use auditlog::{AuditLog, AuditLogConfig, FileSnapshotStore, Inclusion, NoopRedactor};
    use sqlx::PgPool;

    use crate::state::AppState;

    fn state_with(events: &[&str], dir: &tempfile::TempDir) -> SharedState {
        let store = FileSnapshotStore::open(dir.path().join("snapshots.json")).unwrap();
        let mut log = AuditLog::open(store, AuditLogConfig { max_leaves_per_tree: 2 }).unwrap();
        for e in events {
            log.record(e).unwrap();
        }
        // Never connects; these handlers do not touch the journal
        let pool = PgPool::connect_lazy("postgres://localhost/auditd_test").unwrap();
        Arc::new(AppState::new(log, pool, Arc::new(NoopRedactor)))
    }

    #[tokio::test]
    async fn test_verify_reports_inclusion() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(&["a", "b", "c", "d", "e"], &dir);

        let Json(found) = post_verify(
            State(state.clone()),
            Json(VerifyRequest { data: "c".into() }),
        )
        .await
        .unwrap();
        assert!(found.included);

        let Json(missing) = post_verify(
            State(state),
            Json(VerifyRequest { data: "zzz".into() }),
        )
        .await
        .unwrap();
        assert!(!missing.included);
        assert_eq!(missing.detail, Inclusion::NotFound);
    }

    #[tokio::test]
    async fn test_chain_report_spans_rollover() {
        let dir = tempfile::tempdir().unwrap();
        let events: Vec<String> = (0..10).map(|i| format!("e{i}")).collect();
        let refs: Vec<&str> = events.iter().map(String::as_str).collect();
        let state = state_with(&refs, &dir);

        let Json(root) = get_root(State(state.clone())).await;
        assert_eq!(root.tree_index, 1);
        assert_eq!(root.sealed_trees, 1);

        let Json(snapshots) = get_snapshots(State(state.clone())).await.unwrap();
        assert_eq!(snapshots.len(), 2);

        let Json(report) = get_chain(State(state)).await.unwrap();
        assert_eq!(report.trees_checked, 2);
        assert!(report.is_intact());
    }
}

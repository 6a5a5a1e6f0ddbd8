mod config;
mod journal;
mod log_exec;
mod routes_events;
mod routes_verify;
mod state;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use auditlog::{AuditLog, FieldRedactor, FileSnapshotStore};
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // --- Postgres ---
    let pg_pool = PgPool::connect(&cfg.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run migrations")?;

    // --- Recovery: replay the journal and reconcile persisted snapshots ---
    let payloads = journal::load_payloads(&pg_pool)
        .await
        .context("Failed to load audit journal")?;
    let store = FileSnapshotStore::open(&cfg.snapshot_path)
        .with_context(|| format!("Failed to open snapshot store {}", cfg.snapshot_path.display()))?;
    let log = AuditLog::recover(store, cfg.log.clone(), &payloads)
        .context("Audit log recovery failed")?;
    info!(
        events = payloads.len(),
        tree_index = log.tree_index(),
        root = %log.root_hash(),
        "audit log recovered"
    );

    let redactor = FieldRedactor::new(cfg.redact_fields.iter().cloned());
    let app_state = Arc::new(AppState::new(log, pg_pool, Arc::new(redactor)));

    let app = Router::new()
        .route("/audit/events", post(crate::routes_events::post_event))
        .route("/audit/verify", post(crate::routes_verify::post_verify))
        .route("/audit/root", get(crate::routes_verify::get_root))
        .route("/audit/snapshots", get(crate::routes_verify::get_snapshots))
        .route("/audit/chain", get(crate::routes_verify::get_chain))
        .layer(CorsLayer::permissive())
        .with_state(app_state.clone());

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("auditd listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Last chance to write a snapshot that failed mid-run
    let mut log = app_state.log.write().await;
    if log.has_pending_write() {
        if let Err(e) = log.flush() {
            error!(error = %e, "final snapshot flush failed");
        }
    }
    info!(root = %log.root_hash(), "auditd stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}

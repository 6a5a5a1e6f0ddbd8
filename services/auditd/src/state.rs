use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use auditlog::{AuditLog, FileSnapshotStore, Redactor};
use sqlx::PgPool;
use tokio::sync::RwLock;

pub type SharedState = Arc<AppState>;

pub type SharedLog = Arc<RwLock<AuditLog<FileSnapshotStore>>>;

#[derive(Clone)]
pub struct AppState {
    pub log: SharedLog,
    pub pg_pool: PgPool,
    pub redactor: Arc<dyn Redactor>,
    /// Set once the journal holds an event the tree refused and the row could
    /// not be removed. Writes stay off until a restart replays the journal.
    pub journal_fenced: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(log: AuditLog<FileSnapshotStore>, pg_pool: PgPool, redactor: Arc<dyn Redactor>) -> Self {
        Self {
            log: Arc::new(RwLock::new(log)),
            pg_pool,
            redactor,
            journal_fenced: Arc::new(AtomicBool::new(false)),
        }
    }
}

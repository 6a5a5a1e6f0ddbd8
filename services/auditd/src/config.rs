use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use auditlog::{AuditLogConfig, DEFAULT_MAX_LEAVES};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub snapshot_path: PathBuf,
    pub log: AuditLogConfig,
    /// Parameter names masked for every operation
    pub redact_fields: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = get("DATABASE_URL")?;
        let bind_addr =
            std::env::var("AUDITD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
        let snapshot_path = std::env::var("AUDIT_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("audit_snapshots.json"));

        let max_leaves_per_tree = match std::env::var("AUDIT_MAX_LEAVES") {
            Ok(v) => v
                .parse::<usize>()
                .with_context(|| format!("AUDIT_MAX_LEAVES is not a number: {v}"))?,
            Err(_) => DEFAULT_MAX_LEAVES,
        };

        let redact_fields = std::env::var("AUDIT_REDACT_FIELDS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| vec!["password".to_string(), "token".to_string()]);

        if max_leaves_per_tree == 0 {
            bail!("AUDIT_MAX_LEAVES must be at least 1");
        }
        if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
            bail!("DATABASE_URL must start with postgres:// or postgresql://");
        }

        Ok(Self {
            database_url,
            bind_addr,
            snapshot_path,
            log: AuditLogConfig {
                max_leaves_per_tree,
            },
            redact_fields,
        })
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

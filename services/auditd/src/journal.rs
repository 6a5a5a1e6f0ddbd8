use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Insert one raw payload, committed before the tree sees the event. A row
/// whose event is then refused is removed with [`delete_payload`].
pub async fn append_payload(pool: &PgPool, event_id: Uuid, payload: &str) -> Result<i64> {
    let seq: i64 = sqlx::query_scalar(
        r#"INSERT INTO audit_events (event_id, payload) VALUES ($1, $2) RETURNING seq"#
    )
    .bind(event_id)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    Ok(seq)
}

pub async fn delete_payload(pool: &PgPool, event_id: Uuid) -> Result<()> {
    sqlx::query(r#"DELETE FROM audit_events WHERE event_id = $1"#)
        .bind(event_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Every journaled payload in recording order
pub async fn load_payloads(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<String> = sqlx::query_scalar(
        r#"SELECT payload FROM audit_events ORDER BY seq ASC"#
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Appends an entry to `audit_logs`.
///
/// Auditing never fails the request that triggered it; a failed insert is
/// logged and otherwise ignored.
pub async fn record_audit_event(pool: &PgPool, user_id: Option<Uuid>, action: &str, context: Value) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, context)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(action)
    .bind(context)
    .execute(pool)
    .await;

    if let Err(err) = result {
        warn!(action, error = %err, "failed to record audit event");
    }
}

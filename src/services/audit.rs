use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::models::AuditLogEntry;

pub const REGISTER_PATIENT: &str = "REGISTER_PATIENT";
pub const UPDATE_PATIENT_STATUS: &str = "UPDATE_PATIENT_STATUS";
pub const CALL_NEXT_PATIENT: &str = "CALL_NEXT_PATIENT";
pub const BOOK_APPOINTMENT: &str = "BOOK_APPOINTMENT";
pub const UPDATE_APPOINTMENT_STATUS: &str = "UPDATE_APPOINTMENT_STATUS";
pub const REGISTER_STAFF: &str = "REGISTER_STAFF";
pub const MARK_NO_SHOWS: &str = "MARK_NO_SHOWS";

/// Appends one entry. Takes any executor so callers can write the entry
/// inside the transaction that performed the action.
pub async fn record<'e, E>(
    executor: E,
    action: &str,
    performed_by: &str,
    target: &str,
    details: &str,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO audit_logs (id, action, performed_by, target, details) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(action)
    .bind(performed_by)
    .bind(target)
    .bind(details)
    .execute(executor)
    .await?;

    Ok(())
}

/// Fire-and-forget variant for actions that are already committed.
pub async fn log(pool: &PgPool, action: &str, performed_by: &str, target: &str, details: &str) {
    if let Err(e) = record(pool, action, performed_by, target, details).await {
        log::error!("Failed to write audit entry {}: {}", action, e);
    }
}

/// Newest entries first.
pub async fn audit_log(pool: &PgPool, limit: i64) -> Vec<AuditLogEntry> {
    sqlx::query_as::<_, AuditLogEntry>(
        "SELECT * FROM audit_logs ORDER BY timestamp DESC LIMIT $1",
    )
    .bind(limit.max(1))
    .fetch_all(pool)
    .await
    .unwrap_or_else(|e| {
        log::error!("Error fetching audit log: {}", e);
        vec![]
    })
}

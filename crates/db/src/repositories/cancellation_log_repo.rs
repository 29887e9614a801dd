//! Repository for the append-only `cancellation_logs` table.

use sqlx::{PgConnection, PgPool};
use unsub_core::cancellation::CancellationStatus;
use unsub_core::types::DbId;

use crate::models::{CancellationLog, NewLogEntry};

/// Column list for `cancellation_logs` queries.
const COLUMNS: &str = "id, request_id, level, message, created_at";

/// Provides append and read access to request audit logs.
pub struct CancellationLogRepo;

impl CancellationLogRepo {
    /// Unconditional insert, used inside a transaction that has already
    /// performed the guarding status update.
    pub async fn insert(
        conn: &mut PgConnection,
        request_id: DbId,
        entry: &NewLogEntry,
    ) -> Result<CancellationLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO cancellation_logs (request_id, level, message) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CancellationLog>(&query)
            .bind(request_id)
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .fetch_one(conn)
            .await
    }

    /// Append a line only while the request is `in_progress`.
    ///
    /// The request row is share-locked before the insert, so a concurrent
    /// `cancel` or `finish` waits for this transaction to commit.
    /// Returns `false` if the request has left `in_progress`; nothing is written.
    pub async fn append_if_in_progress(
        pool: &PgPool,
        request_id: DbId,
        entry: &NewLogEntry,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let locked = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM cancellation_requests \
             WHERE id = $1 AND status = $2 \
             FOR SHARE",
        )
        .bind(request_id)
        .bind(CancellationStatus::InProgress.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert(&mut tx, request_id, entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Most recent log line for a request.
    pub async fn latest_for_request(
        pool: &PgPool,
        request_id: DbId,
    ) -> Result<Option<CancellationLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM cancellation_logs \
             WHERE request_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, CancellationLog>(&query)
            .bind(request_id)
            .fetch_optional(pool)
            .await
    }

    /// Full audit trail for a request, oldest first.
    pub async fn list_for_request(
        pool: &PgPool,
        request_id: DbId,
    ) -> Result<Vec<CancellationLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM cancellation_logs \
             WHERE request_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, CancellationLog>(&query)
            .bind(request_id)
            .fetch_all(pool)
            .await
    }
}

//! Repository for the `cancellation_requests` table.
//!
//! Every mutation is conditional on the stored status, so a row that has
//! reached `completed`, `failed` or `cancelled` is never written again.
//! Mutations that produce an audit line write it in the same transaction.

use sqlx::{PgConnection, PgPool};
use unsub_core::cancellation::{CancellationMethod, CancellationStatus};
use unsub_core::types::{DbId, Timestamp};

use crate::models::{CancellationRequest, NewCancellationRequest, NewLogEntry, Submission};
use crate::repositories::CancellationLogRepo;

/// Column list for `cancellation_requests` queries.
const COLUMNS: &str = "\
    id, user_id, subscription_id, orchestration_id, method, status, \
    active_method, attempts, created_at, updated_at, completed_at";

/// `WHERE` fragment matching rows that still accept writes.
const ACTIVE_FILTER: &str = "status IN ('pending', 'in_progress')";

/// How many times a submit retries when the active row it collided with
/// turned terminal before it could be read back.
const SUBMIT_RACE_RETRIES: usize = 3;

/// Provides conditional state transitions for cancellation requests.
pub struct CancellationRequestRepo;

impl CancellationRequestRepo {
    /// Insert a pending request, or return the already-active one for the
    /// same `(user_id, subscription_id)`.
    ///
    /// Relies on the `uq_cancellation_requests_active` partial unique index:
    /// concurrent submitters all converge on the row that won the insert.
    pub async fn submit(
        pool: &PgPool,
        input: &NewCancellationRequest,
    ) -> Result<Submission, sqlx::Error> {
        let insert = format!(
            "INSERT INTO cancellation_requests \
                 (user_id, subscription_id, orchestration_id, method, status) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, subscription_id) WHERE {ACTIVE_FILTER} DO NOTHING \
             RETURNING {COLUMNS}"
        );

        for _ in 0..SUBMIT_RACE_RETRIES {
            let inserted = sqlx::query_as::<_, CancellationRequest>(&insert)
                .bind(input.user_id)
                .bind(&input.subscription_id)
                .bind(input.orchestration_id)
                .bind(input.method.as_str())
                .bind(CancellationStatus::Pending.as_str())
                .fetch_optional(pool)
                .await?;

            if let Some(request) = inserted {
                return Ok(Submission {
                    request,
                    created: true,
                });
            }

            if let Some(request) =
                Self::find_active(pool, input.user_id, &input.subscription_id).await?
            {
                return Ok(Submission {
                    request,
                    created: false,
                });
            }
        }

        Err(sqlx::Error::Protocol(format!(
            "Submit for subscription {} kept racing with terminal transitions",
            input.subscription_id
        )))
    }

    /// Find the active request for a subscription, if any.
    pub async fn find_active(
        pool: &PgPool,
        user_id: DbId,
        subscription_id: &str,
    ) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM cancellation_requests \
             WHERE user_id = $1 AND subscription_id = $2 AND {ACTIVE_FILTER}"
        );
        sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(user_id)
            .bind(subscription_id)
            .fetch_optional(pool)
            .await
    }

    /// Find a request by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM cancellation_requests WHERE id = $1");
        sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All members of an orchestration, oldest first.
    pub async fn list_by_orchestration(
        pool: &PgPool,
        orchestration_id: DbId,
    ) -> Result<Vec<CancellationRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM cancellation_requests \
             WHERE orchestration_id = $1 ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(orchestration_id)
            .fetch_all(pool)
            .await
    }

    /// Oldest unclaimed requests, for the pending dispatcher.
    pub async fn list_pending(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<CancellationRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM cancellation_requests \
             WHERE status = $1 ORDER BY created_at ASC, id ASC LIMIT $2"
        );
        sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(CancellationStatus::Pending.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Compare-and-swap `pending -> in_progress`.
    ///
    /// Returns `None` when the row is missing or no longer pending, i.e.
    /// another execution already owns it or it is terminal.
    pub async fn claim(pool: &PgPool, id: DbId) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let query = format!(
            "UPDATE cancellation_requests SET status = $2 \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(id)
            .bind(CancellationStatus::InProgress.as_str())
            .bind(CancellationStatus::Pending.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Record the strategy being attempted, logging the switch if `entry` is given.
    pub async fn switch_method(
        pool: &PgPool,
        id: DbId,
        method: CancellationMethod,
        entry: Option<&NewLogEntry>,
    ) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE cancellation_requests SET active_method = $2 \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(id)
            .bind(method.as_str())
            .bind(CancellationStatus::InProgress.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        if let (Some(_), Some(entry)) = (&updated, entry) {
            CancellationLogRepo::insert(&mut tx, id, entry).await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Increment `attempts`, append the attempt's log line and, when
    /// `finish` is set, move to that terminal status, all atomically.
    ///
    /// Returns `None` (and writes nothing) if the request is no longer
    /// `in_progress`, e.g. it was cancelled while the attempt was in flight.
    pub async fn record_attempt(
        pool: &PgPool,
        id: DbId,
        entry: &NewLogEntry,
        finish: Option<CancellationStatus>,
    ) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE cancellation_requests \
             SET attempts = attempts + 1, \
                 status = COALESCE($2::TEXT, status), \
                 completed_at = CASE WHEN $2::TEXT IS NULL THEN completed_at ELSE NOW() END \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(id)
            .bind(finish.map(CancellationStatus::as_str))
            .bind(CancellationStatus::InProgress.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        if updated.is_some() {
            CancellationLogRepo::insert(&mut tx, id, entry).await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Move an `in_progress` request to `completed` or `failed` with a final log line.
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        status: CancellationStatus,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let updated = Self::finish_in(&mut tx, id, status, entry).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn finish_in(
        conn: &mut PgConnection,
        id: DbId,
        status: CancellationStatus,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let query = format!(
            "UPDATE cancellation_requests SET status = $2, completed_at = NOW() \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(id)
            .bind(status.as_str())
            .bind(CancellationStatus::InProgress.as_str())
            .fetch_optional(&mut *conn)
            .await?;

        if updated.is_some() {
            CancellationLogRepo::insert(conn, id, entry).await?;
        }
        Ok(updated)
    }

    /// Owner-initiated `pending|in_progress -> cancelled`.
    ///
    /// Returns `None` if the request does not exist, belongs to someone
    /// else, or is already terminal; callers re-read to tell these apart.
    pub async fn cancel(
        pool: &PgPool,
        id: DbId,
        user_id: DbId,
        entry: &NewLogEntry,
    ) -> Result<Option<CancellationRequest>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE cancellation_requests SET status = $3, completed_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND {ACTIVE_FILTER} \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, CancellationRequest>(&query)
            .bind(id)
            .bind(user_id)
            .bind(CancellationStatus::Cancelled.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        if updated.is_some() {
            CancellationLogRepo::insert(&mut tx, id, entry).await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Fail every `in_progress` request not touched since `cutoff`.
    pub async fn reap_stale(
        pool: &PgPool,
        cutoff: Timestamp,
        entry: &NewLogEntry,
    ) -> Result<Vec<CancellationRequest>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let stale: Vec<DbId> = sqlx::query_scalar(
            "SELECT id FROM cancellation_requests \
             WHERE status = $1 AND updated_at < $2 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(CancellationStatus::InProgress.as_str())
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut reaped = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(request) =
                Self::finish_in(&mut tx, id, CancellationStatus::Failed, entry).await?
            {
                reaped.push(request);
            }
        }

        tx.commit().await?;
        Ok(reaped)
    }
}

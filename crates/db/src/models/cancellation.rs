//! Cancellation request, log and orchestration models.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use unsub_core::cancellation::{CancellationMethod, CancellationStatus, LogLevel, MethodSelection};
use unsub_core::types::{DbId, Timestamp};

/// A row from the `cancellation_requests` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationRequest {
    pub id: DbId,
    pub user_id: DbId,
    pub subscription_id: String,
    pub orchestration_id: Option<DbId>,
    pub method: MethodSelection,
    pub status: CancellationStatus,
    /// Strategy currently (or last) being attempted.
    pub active_method: Option<CancellationMethod>,
    pub attempts: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl CancellationRequest {
    pub fn is_owned_by(&self, user_id: DbId) -> bool {
        self.user_id == user_id
    }
}

fn decode_text<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = unsub_core::error::CoreError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, PgRow> for CancellationRequest {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let active_method = match row.try_get::<Option<String>, _>("active_method")? {
            Some(raw) => Some(raw.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "active_method".to_string(),
                source: Box::new(e),
            })?),
            None => None,
        };

        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            subscription_id: row.try_get("subscription_id")?,
            orchestration_id: row.try_get("orchestration_id")?,
            method: decode_text(row, "method")?,
            status: decode_text(row, "status")?,
            active_method,
            attempts: row.try_get("attempts")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// A row from the `cancellation_logs` table. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationLog {
    pub id: DbId,
    pub request_id: DbId,
    pub level: LogLevel,
    pub message: String,
    pub created_at: Timestamp,
}

impl<'r> FromRow<'r, PgRow> for CancellationLog {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            level: decode_text(row, "level")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A row from the `cancellation_orchestrations` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Orchestration {
    pub id: DbId,
    pub user_id: DbId,
    pub created_at: Timestamp,
}

/// Insert DTO for a new cancellation request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCancellationRequest {
    pub user_id: DbId,
    pub subscription_id: String,
    pub orchestration_id: Option<DbId>,
    pub method: MethodSelection,
}

/// A log line to append alongside a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl NewLogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}

/// Result of an idempotent submit.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub request: CancellationRequest,
    /// `false` when an already-active request for the subscription was returned.
    pub created: bool,
}

//! Repository for the `cancellation_orchestrations` table.

use sqlx::PgPool;
use unsub_core::types::DbId;

use crate::models::Orchestration;

/// Column list for `cancellation_orchestrations` queries.
const COLUMNS: &str = "id, user_id, created_at";

/// Creates and looks up batch groupings.
pub struct OrchestrationRepo;

impl OrchestrationRepo {
    pub async fn create(pool: &PgPool, user_id: DbId) -> Result<Orchestration, sqlx::Error> {
        let query = format!(
            "INSERT INTO cancellation_orchestrations (user_id) VALUES ($1) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Orchestration>(&query)
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<Orchestration>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM cancellation_orchestrations WHERE id = $1");
        sqlx::query_as::<_, Orchestration>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

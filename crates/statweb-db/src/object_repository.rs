//! Harvest object repository for PostgreSQL.
//!
//! One row per harvest object. The payload is stored as opaque text; only
//! the pipeline knows its shape.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use statweb_core::error::AppError;
use statweb_core::models::{HarvestObject, ObjectError, ObjectState, Stage};
use statweb_core::traits::HarvestLedger;

/// Schema of the ledger. Each statement must be executed separately.
pub const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS harvest_objects (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        job_id UUID NOT NULL,
        guid VARCHAR(40) NOT NULL,
        state VARCHAR(16) NOT NULL DEFAULT 'discovered',
        content TEXT,
        error_message TEXT,
        error_stage VARCHAR(16),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_harvest_objects_guid ON harvest_objects(guid)",
    "CREATE INDEX IF NOT EXISTS idx_harvest_objects_job ON harvest_objects(job_id)",
];

/// Column list for SELECT queries.
const OBJECT_COLUMNS: &str =
    "id, job_id, guid, state, content, error_message, error_stage, created_at, updated_at";

/// Repository for harvest objects.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use statweb_db::ObjectRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/statweb")
///     .await?;
///
/// let repo = ObjectRepository::new(pool);
/// repo.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ObjectRepository {
    pool: Pool<Postgres>,
}

impl ObjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the ledger table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), AppError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("Ledger schema up to date");
        Ok(())
    }

    /// Lists the objects of a job, oldest first.
    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<HarvestObject>, AppError> {
        let query = format!(
            "SELECT {} FROM harvest_objects WHERE job_id = $1 ORDER BY created_at, id",
            OBJECT_COLUMNS
        );
        let rows: Vec<ObjectRow> = sqlx::query_as(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(HarvestObject::from).collect())
    }

    /// Number of objects of a job in each state.
    pub async fn count_by_state(&self, job_id: Uuid) -> Result<Vec<(ObjectState, i64)>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT state, COUNT(*)
            FROM harvest_objects
            WHERE job_id = $1
            GROUP BY state
            ORDER BY state
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(state, count)| state.parse().ok().map(|s| (s, count)))
            .collect())
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

/// Helper struct for deserializing object rows from the database.
#[derive(sqlx::FromRow)]
struct ObjectRow {
    id: Uuid,
    job_id: Uuid,
    guid: String,
    state: String,
    content: Option<String>,
    error_message: Option<String>,
    error_stage: Option<String>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl From<ObjectRow> for HarvestObject {
    fn from(row: ObjectRow) -> Self {
        let error = match (row.error_message, row.error_stage) {
            (Some(message), Some(stage)) => stage
                .parse::<Stage>()
                .ok()
                .map(|stage| ObjectError { message, stage }),
            _ => None,
        };

        Self {
            id: row.id,
            job_id: row.job_id,
            guid: row.guid,
            state: row.state.parse().unwrap_or(ObjectState::Failed),
            content: row.content,
            error,
        }
    }
}

// =============================================================================
// HarvestLedger Implementation
// =============================================================================

impl HarvestLedger for ObjectRepository {
    async fn create(&self, job_id: Uuid, guid: &str, payload: &str) -> Result<Uuid, AppError> {
        let rec: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO harvest_objects (job_id, guid, state, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(guid)
        .bind(ObjectState::Discovered.as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(rec.0)
    }

    async fn load(&self, id: Uuid) -> Result<Option<HarvestObject>, AppError> {
        let query = format!("SELECT {} FROM harvest_objects WHERE id = $1", OBJECT_COLUMNS);
        let row: Option<ObjectRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(HarvestObject::from))
    }

    async fn save(&self, id: Uuid, payload: &str, state: ObjectState) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_objects
            SET content = $2, state = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(payload)
        .bind(state.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ObjectNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, message: &str, stage: Stage) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_objects
            SET state = $2, error_message = $3, error_stage = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ObjectState::Failed.as_str())
        .bind(message)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ObjectNotFound(id.to_string()));
        }
        tracing::debug!(object_id = %id, %stage, "Object marked failed");
        Ok(())
    }
}

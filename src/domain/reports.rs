//! Reports domain - DB queries for analysis history
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use crate::models::HistoryRecord;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reports (
    id BIGSERIAL PRIMARY KEY,
    file_name TEXT NOT NULL,
    label TEXT NOT NULL,
    confidence SMALLINT NOT NULL CHECK (confidence BETWEEN 0 AND 100),
    is_synthetic BOOLEAN NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS reports_recent_idx ON reports (created_at DESC, id DESC);
"#;

#[derive(Debug, sqlx::FromRow)]
pub struct ReportRow {
    pub id: i64,
    pub file_name: String,
    pub label: String,
    pub confidence: i16,
    pub is_synthetic: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ReportRow> for HistoryRecord {
    fn from(row: ReportRow) -> Self {
        HistoryRecord {
            id: row.id,
            file_name: row.file_name,
            label: row.label,
            confidence: row.confidence.clamp(0, 100) as u8,
            is_synthetic: row.is_synthetic,
            created_at: row.created_at,
        }
    }
}

/// Create the reports table if it does not exist yet
pub async fn ensure_schema<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::raw_sql(SCHEMA).execute(executor).await?;
    Ok(())
}

/// Insert a report; the timestamp is assigned by the database
pub async fn insert_report<'e, E>(
    executor: E,
    file_name: &str,
    label: &str,
    confidence: i16,
    is_synthetic: bool,
) -> Result<ReportRow, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        INSERT INTO reports (file_name, label, confidence, is_synthetic)
        VALUES ($1, $2, $3, $4)
        RETURNING id, file_name, label, confidence, is_synthetic, created_at
        "#,
    )
    .bind(file_name)
    .bind(label)
    .bind(confidence)
    .bind(is_synthetic)
    .fetch_one(executor)
    .await
}

/// Most recent reports, newest first; ties on timestamp fall back to insertion order
pub async fn recent_reports<'e, E>(executor: E, limit: i64) -> Result<Vec<ReportRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, file_name, label, confidence, is_synthetic, created_at
        FROM reports
        ORDER BY created_at DESC, id DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await
}

//! Durable store of finalized attempts. Append-only: one new row per
//! finalization, never read back by the pipeline.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{error::Result, rubric::AttemptRecord};

#[async_trait]
pub trait AttemptArchive: Send + Sync {
    async fn insert(&self, record: &AttemptRecord) -> Result<Uuid>;
}

pub struct InMemoryAttemptArchive {
    records: Arc<DashMap<Uuid, AttemptRecord>>,
}

impl InMemoryAttemptArchive {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<AttemptRecord> {
        self.records.get(id).map(|entry| entry.clone())
    }
}

impl Default for InMemoryAttemptArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttemptArchive for InMemoryAttemptArchive {
    async fn insert(&self, record: &AttemptRecord) -> Result<Uuid> {
        self.records.insert(record.id, record.clone());
        Ok(record.id)
    }
}

pub struct PostgresAttemptArchive {
    pool: Arc<PgPool>,
}

impl PostgresAttemptArchive {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS case_attempts (
                id UUID PRIMARY KEY,
                student_id TEXT NOT NULL,
                case_id TEXT NOT NULL,
                department TEXT NOT NULL,
                session_start TIMESTAMPTZ NOT NULL,
                session_end TIMESTAMPTZ NOT NULL,
                interactions JSONB NOT NULL,
                rubric JSONB NOT NULL,
                final_diagnosis JSONB,
                osce_summary JSONB NOT NULL,
                feedback_summary TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl AttemptArchive for PostgresAttemptArchive {
    async fn insert(&self, record: &AttemptRecord) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO case_attempts (
                id, student_id, case_id, department, session_start, session_end,
                interactions, rubric, final_diagnosis, osce_summary, feedback_summary
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(&record.student_id)
        .bind(&record.case_id)
        .bind(&record.department)
        .bind(record.session_start)
        .bind(record.session_end)
        .bind(Json(&record.interactions))
        .bind(Json(&record.rubric))
        .bind(record.final_diagnosis.as_ref().map(Json))
        .bind(Json(&record.osce_summary))
        .bind(&record.feedback_summary)
        .execute(&*self.pool)
        .await?;

        info!(attempt_id = %record.id, student_id = %record.student_id, "attempt archived");
        Ok(record.id)
    }
}

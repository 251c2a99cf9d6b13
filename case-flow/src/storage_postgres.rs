use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::{CaseFlowError, Result},
    session::{Session, SessionKey},
    storage::SessionStore,
};

/// PostgreSQL implementation of SessionStore.
///
/// One JSONB row per session key; the `version` column is the
/// compare-and-swap token.
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and makes sure the table exists.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        Self::migrate(&pool).await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS case_sessions (
                session_key TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                case_id TEXT NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await?;
        info!("case_sessions table ready");
        Ok(())
    }

    async fn stored_version(&self, key: &SessionKey) -> Result<u64> {
        let row = sqlx::query("SELECT version FROM case_sessions WHERE session_key = $1")
            .bind(key.storage_key())
            .fetch_optional(&*self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>("version")? as u64),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT data, version FROM case_sessions WHERE session_key = $1")
            .bind(key.storage_key())
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(row) => {
                let Json(mut session): Json<Session> = row.try_get("data")?;
                session.version = row.try_get::<i64, _>("version")? as u64;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &SessionKey, session: &Session) -> Result<u64> {
        let next = session.version + 1;
        let mut stored = session.clone();
        stored.version = next;

        let result = if session.version == 0 {
            sqlx::query(
                r#"
                INSERT INTO case_sessions (session_key, student_id, case_id, version, data)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (session_key) DO NOTHING
                "#,
            )
            .bind(key.storage_key())
            .bind(&key.student_id)
            .bind(&key.case_id)
            .bind(next as i64)
            .bind(Json(&stored))
            .execute(&*self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE case_sessions
                SET data = $2, version = $3, updated_at = NOW()
                WHERE session_key = $1 AND version = $4
                "#,
            )
            .bind(key.storage_key())
            .bind(Json(&stored))
            .bind(next as i64)
            .bind(session.version as i64)
            .execute(&*self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let found = self.stored_version(key).await?;
            return Err(CaseFlowError::VersionConflict {
                key: key.storage_key(),
                expected: session.version,
                found,
            });
        }

        debug!(session_key = %key, version = next, "session row written");
        Ok(next)
    }
}

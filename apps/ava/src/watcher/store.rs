//! Persistence port for request documents, plus the PostgreSQL implementation.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::document::{DocumentState, DocumentUpdate, StarterDocumentRow};

/// Where request documents come from and where their outcomes go.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Atomically moves up to `limit` unclaimed documents to `processing` and returns them.
    /// Claims older than `CLAIM_LEASE` count as unclaimed.
    async fn claim_pending(&self, limit: i64) -> Result<Vec<StarterDocumentRow>>;

    /// Writes one round of outcomes as a single batch commit.
    async fn commit(&self, updates: &[DocumentUpdate]) -> Result<()>;

    /// Hands claimed documents back so the next sweep picks them up.
    async fn release(&self, ids: &[Uuid]) -> Result<()>;
}

/// How long a `processing` claim is honoured. A worker that dies mid-batch leaves its
/// documents to whichever sweep runs after the lease runs out.
pub const CLAIM_LEASE: Duration = Duration::from_secs(10 * 60);

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn claim_pending(&self, limit: i64) -> Result<Vec<StarterDocumentRow>> {
        let rows = sqlx::query_as::<_, StarterDocumentRow>(
            r#"
            UPDATE conversation_starter_requests
            SET state = $1, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM conversation_starter_requests
                WHERE state IS NULL
                   OR (state = $1 AND updated_at < NOW() - make_interval(secs => $3))
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, topics, fix_grammar, parallel_completions, completion_type,
                      profanity_threshold, api_completion_model, api_classification_model,
                      personas, created_at
            "#,
        )
        .bind(DocumentState::Processing.as_str())
        .bind(limit)
        .bind(CLAIM_LEASE.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn commit(&self, updates: &[DocumentUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for update in updates {
            sqlx::query(
                r#"
                UPDATE conversation_starter_requests
                SET state = $2,
                    content = $3,
                    conversation_starters = $4,
                    error = $5,
                    developer_message = $6,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(update.id)
            .bind(update.state.as_str())
            .bind(&update.content)
            .bind(&update.conversation_starters)
            .bind(&update.error)
            .bind(&update.developer_message)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!("Committed {} document updates", updates.len());
        Ok(())
    }

    async fn release(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let released = sqlx::query(
            r#"
            UPDATE conversation_starter_requests
            SET state = NULL, updated_at = NOW()
            WHERE id = ANY($1) AND state = $2
            "#,
        )
        .bind(ids)
        .bind(DocumentState::Processing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        info!("Released {released} claimed documents");
        Ok(())
    }
}

//! Example Corpus — curated conversation starters loaded once at startup.
//!
//! Read-only after construction and shared across tasks behind an `Arc`.

use anyhow::{ensure, Result};
use sqlx::PgPool;
use tracing::info;

use crate::models::example::ExampleRecord;

#[derive(Debug, Clone, Default)]
pub struct ExampleCorpus {
    records: Vec<ExampleRecord>,
}

impl ExampleCorpus {
    pub fn new(records: Vec<ExampleRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ExampleRecord] {
        &self.records
    }
}

/// Fetches the corpus from the `memes` table. With `confirmed_only`, unreviewed
/// examples are left out. Fails if nothing comes back.
pub async fn load_corpus(pool: &PgPool, confirmed_only: bool) -> Result<ExampleCorpus> {
    let records = sqlx::query_as::<_, ExampleRecord>(
        r#"
        SELECT id, topics, content
        FROM memes
        WHERE ($1 = FALSE OR confirmed = TRUE)
        ORDER BY id
        "#,
    )
    .bind(confirmed_only)
    .fetch_all(pool)
    .await?;

    ensure!(!records.is_empty(), "No examples found in the memes table");
    info!(
        "Fetched {} examples (confirmed_only={})",
        records.len(),
        confirmed_only
    );

    Ok(ExampleCorpus::new(records))
}

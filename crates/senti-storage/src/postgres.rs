//! Direct Postgres record store.
//!
//! Unlike the REST store this one claims rows with a lease so parallel
//! workers split the backlog, and writes result + processed flag in one
//! transaction.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use senti_core::{AnalysisResult, RecordId, SourceRecord};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgExecutor, Row};

use crate::{RecordStore, StoreError};

const CLAIM_SQL: &str = r#"
    UPDATE uploaded_csv_data AS u
       SET claimed_at = NOW()
     WHERE u.id IN (
           SELECT c.id
             FROM uploaded_csv_data AS c
            WHERE c.processed = false
              AND (c.claimed_at IS NULL OR c.claimed_at < NOW() - make_interval(secs => $2))
            LIMIT $1
              FOR UPDATE SKIP LOCKED
           )
    RETURNING u.id::text AS id,
              u.file_name,
              u."row_number"::bigint AS row_number,
              u."text" AS text,
              u.processed
"#;

const MARK_SQL: &str = r#"
    UPDATE uploaded_csv_data
       SET processed = true
     WHERE id::text = $1
"#;

// The source id is copied from the source row so its column type is kept.
const INSERT_SQL: &str = r#"
    INSERT INTO analyzed_results
           (source_id, file_name, "row_number", original_text, sentiment_label,
            sentiment_score, summary, wordcloud_url, model_info)
    SELECT u.id, $2, $3, $4, $5, $6, $7, $8, $9
      FROM uploaded_csv_data AS u
     WHERE u.id::text = $1
"#;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    claim_lease: Duration,
}

impl PgRecordStore {
    pub async fn connect(database_url: &str, claim_lease: Duration) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("connecting to postgres record store")?;
        Ok(Self::from_pool(pool, claim_lease))
    }

    pub fn from_pool(pool: PgPool, claim_lease: Duration) -> Self {
        Self { pool, claim_lease }
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .context("applying senti migrations")
    }
}

fn record_from_row(row: &PgRow) -> Result<SourceRecord, sqlx::Error> {
    Ok(SourceRecord {
        id: RecordId::Text(row.try_get("id")?),
        file_name: row
            .try_get::<Option<String>, _>("file_name")?
            .unwrap_or_default(),
        row_number: row.try_get("row_number")?,
        text: row.try_get::<Option<String>, _>("text")?.unwrap_or_default(),
        processed: row.try_get("processed")?,
    })
}

async fn insert_with<'e, E: PgExecutor<'e>>(
    executor: E,
    payload: &AnalysisResult,
) -> Result<(), StoreError> {
    let done = sqlx::query(INSERT_SQL)
        .bind(payload.source_id.to_string())
        .bind(&payload.file_name)
        .bind(payload.row_number)
        .bind(&payload.original_text)
        .bind(payload.sentiment_label.as_str())
        .bind(payload.sentiment_score)
        .bind(&payload.summary)
        .bind(payload.wordcloud_url.as_deref())
        .bind(Json(&payload.model_info))
        .execute(executor)
        .await?;
    if done.rows_affected() == 0 {
        return Err(StoreError::MissingSource(payload.source_id.clone()));
    }
    Ok(())
}

async fn mark_with<'e, E: PgExecutor<'e>>(executor: E, id: &RecordId) -> Result<(), StoreError> {
    sqlx::query(MARK_SQL)
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl RecordStore for PgRecordStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<SourceRecord>, StoreError> {
        let rows = sqlx::query(CLAIM_SQL)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(self.claim_lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| record_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn mark_processed(&self, id: &RecordId) -> Result<(), StoreError> {
        mark_with(&self.pool, id).await
    }

    async fn insert_result(&self, payload: &AnalysisResult) -> Result<(), StoreError> {
        insert_with(&self.pool, payload).await
    }

    async fn commit_result(&self, payload: &AnalysisResult) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_with(&mut *tx, payload).await?;
        mark_with(&mut *tx, &payload.source_id).await?;
        tx.commit().await?;
        Ok(())
    }
}

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use magpie_common::{ContentRecord, StoreError};

use crate::traits::{ContentStore, RecordPatch, StoredRecord};

/// Postgres-backed persistence gateway. The primary key on `key` is the
/// gateway's uniqueness enforcement; a create losing a race surfaces as
/// `DuplicateKey` and nothing more.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(dsn)
            .await
            .map_err(|e| StoreError::Backend(format!("connect failed: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Idempotent schema setup.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_records (
                key           TEXT PRIMARY KEY,
                canonical_url TEXT NOT NULL,
                title         TEXT NOT NULL,
                body          TEXT NOT NULL,
                author        TEXT,
                published_at  TIMESTAMPTZ,
                category      TEXT,
                is_primary    BOOLEAN NOT NULL,
                parent_url    TEXT,
                platform      TEXT NOT NULL,
                fingerprint   TEXT NOT NULL,
                embedding     JSONB,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl ContentStore for PgStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT key, fingerprint, created_at
            FROM content_records
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|r| StoredRecord {
            key: r.get("key"),
            fingerprint: r.get("fingerprint"),
            created_at: r.get("created_at"),
        }))
    }

    async fn create(
        &self,
        key: &str,
        record: &ContentRecord,
        fingerprint: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let embedding_json = embedding
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO content_records (
                key, canonical_url, title, body, author, published_at,
                category, is_primary, parent_url, platform, fingerprint, embedding
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(key)
        .bind(&record.canonical_url)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.author)
        .bind(record.published_at)
        .bind(&record.category)
        .bind(record.is_primary)
        .bind(&record.parent_url)
        .bind(record.source_platform.to_string())
        .bind(fingerprint)
        .bind(embedding_json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let is_unique = e
                    .as_database_error()
                    .is_some_and(|d| d.is_unique_violation());
                if is_unique {
                    Err(StoreError::DuplicateKey(key.to_string()))
                } else {
                    Err(backend(e))
                }
            }
        }
    }

    async fn update(&self, key: &str, patch: &RecordPatch) -> Result<(), StoreError> {
        let embedding_json = patch
            .embedding
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        // created_at is deliberately untouched — the original creation
        // timestamp survives edits from mutable sources.
        sqlx::query(
            r#"
            UPDATE content_records
            SET title = $2,
                body = $3,
                platform = $4,
                fingerprint = $5,
                embedding = COALESCE($6, embedding),
                updated_at = now()
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(&patch.title)
        .bind(&patch.body)
        .bind(patch.source_platform.to_string())
        .bind(&patch.fingerprint)
        .bind(embedding_json)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

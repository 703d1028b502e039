// Trait abstractions for the capabilities the coordinator consumes.
//
// PageFetcher — raw or rendered page retrieval behind one trait.
// ContentStore — the persistence gateway; idempotent create/update keyed
//   by content identity. The gateway owns uniqueness enforcement.
// TextEmbedder / LanguageDetector — best-effort enrichment and gating.
//
// These enable deterministic testing with MockFetcher and MemoryStore:
// no network, no database.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use magpie_common::{ContentRecord, CrawlTarget, FetchError, Platform, RawPage, StoreError};

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// Per-request fetch parameters, derived from the target's configuration.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    /// Route through the browser-render path.
    pub render: bool,
}

impl FetchOptions {
    pub fn for_target(target: &CrawlTarget) -> Self {
        Self {
            timeout: Duration::from_secs(target.limits.timeout_secs),
            headers: target.headers.clone(),
            render: target.render,
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// One-time capability check before a run: credentials resolvable,
    /// client usable. Failure here aborts the whole run.
    async fn acquire(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Fetch one URL. Errors carry a transient/permanent kind so the
    /// caller knows whether retrying is worthwhile.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawPage, FetchError>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// ContentStore — persistence gateway
// ---------------------------------------------------------------------------

/// What the engine needs to know about an already-persisted record to
/// decide create vs. update vs. skip.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub key: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Fields an update is allowed to touch. Creation timestamp and any
/// derived slug are preserved by the gateway on update.
#[derive(Debug, Clone)]
pub struct RecordPatch {
    pub title: String,
    pub body: String,
    pub source_platform: Platform,
    pub fingerprint: String,
    pub embedding: Option<Vec<f32>>,
}

impl RecordPatch {
    pub fn from_record(record: &ContentRecord, fingerprint: &str, embedding: Option<Vec<f32>>) -> Self {
        Self {
            title: record.title.clone(),
            body: record.body.clone(),
            source_platform: record.source_platform,
            fingerprint: fingerprint.to_string(),
            embedding,
        }
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Create a record at `key`. Fails with `StoreError::DuplicateKey` if
    /// the key already exists — the loser of a benign create race sees
    /// that as a non-fatal per-item error.
    async fn create(
        &self,
        key: &str,
        record: &ContentRecord,
        fingerprint: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError>;

    /// Update the mutable fields of an existing record.
    async fn update(&self, key: &str, patch: &RecordPatch) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// TextEmbedder
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// LanguageDetector
// ---------------------------------------------------------------------------

/// One tagged detection result. `language: None` means the detector could
/// not tell — callers never have to shape-check a string-or-object value.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// ISO 639-3 code, e.g. "eng".
    pub language: Option<String>,
    pub confidence: f32,
}

impl Detection {
    pub fn unknown() -> Self {
        Self {
            language: None,
            confidence: 0.0,
        }
    }
}

pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Detection;
}

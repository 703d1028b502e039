pub mod postgres;

pub use postgres::PgStore;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use magpie_common::{ContentRecord, StoreError};

use crate::traits::{ContentStore, RecordPatch, StoredRecord};

/// In-memory persistence gateway for tests and dry runs. Mirrors the
/// Postgres store's contract: create fails on a duplicate key, update
/// preserves the creation timestamp.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub record: ContentRecord,
    pub fingerprint: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.lock().expect("store lock").get(key).cloned()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        let entries = self.entries.lock().expect("store lock");
        Ok(entries.get(key).map(|e| StoredRecord {
            key: key.to_string(),
            fingerprint: e.fingerprint.clone(),
            created_at: e.created_at,
        }))
    }

    async fn create(
        &self,
        key: &str,
        record: &ContentRecord,
        fingerprint: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store lock");
        if entries.contains_key(key) {
            return Err(StoreError::DuplicateKey(key.to_string()));
        }
        let now = Utc::now();
        entries.insert(
            key.to_string(),
            MemoryEntry {
                record: record.clone(),
                fingerprint: fingerprint.to_string(),
                embedding: embedding.map(|e| e.to_vec()),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update(&self, key: &str, patch: &RecordPatch) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store lock");
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::Backend(format!("update of missing key {key}")))?;
        entry.record.title = patch.title.clone();
        entry.record.body = patch.body.clone();
        entry.record.source_platform = patch.source_platform;
        entry.fingerprint = patch.fingerprint.clone();
        if patch.embedding.is_some() {
            entry.embedding = patch.embedding.clone();
        }
        entry.updated_at = Utc::now();
        Ok(())
    }
}

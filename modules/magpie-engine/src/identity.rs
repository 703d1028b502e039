use std::collections::HashSet;

use sha2::{Digest, Sha256};

use magpie_common::{ContentRecord, StoreError};

use crate::traits::ContentStore;

/// Query parameters that carry tracking noise rather than identity.
/// Stripping them keeps one logical page from showing up under many URLs.
const TRACKING_PARAMS: &[&str] = &[
    "_dt", "fbclid", "gclid", "utm_source", "utm_medium", "utm_campaign",
    "utm_term", "utm_content", "modal", "ref", "mc_cid", "mc_eid",
];

/// Canonical form of a URL used as a stable identity: fragment stripped,
/// tracking parameters removed, meaningful query parts kept.
pub fn canonical_url(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.trim().to_string();
    };

    parsed.set_fragment(None);

    if parsed.query().is_none() {
        return parsed.to_string();
    }

    let clean_pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if clean_pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(clean_pairs);
    }

    parsed.to_string()
}

/// Stricter canonical form used for within-discovery dedup: fragment and
/// the entire query are dropped, so pagination/tracking variants of one
/// page collapse to a single frontier entry.
pub fn discovery_key(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.trim().to_string();
    };
    parsed.set_fragment(None);
    parsed.set_query(None);
    parsed.to_string()
}

/// Derived identity key: the canonical URL for top-level items, and
/// `canonical#reply-N` for sub-items that lack a stable external ID.
pub fn identify(record: &ContentRecord) -> String {
    match (record.is_primary, record.local_index) {
        (false, Some(idx)) => format!("{}#reply-{idx}", record.canonical_url),
        _ => record.canonical_url.clone(),
    }
}

/// SHA-256 over whitespace-normalized body text. Detects changed or
/// near-identical content independent of formatting churn.
pub fn fingerprint(body: &str) -> String {
    let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Within-run dedup set. A key that was already submitted this run is
/// never sent to the gateway a second time.
#[derive(Debug, Default)]
pub struct BatchSeen {
    keys: HashSet<String>,
}

impl BatchSeen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the key was already seen this run.
    pub fn insert(&mut self, key: &str) -> bool {
        self.keys.insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// What to do with a surviving record at its identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistDecision {
    Create,
    Update,
    Skip,
}

/// Decide create vs. update vs. skip by consulting the gateway.
///
/// Existing records win by default — most sources are append-only archives
/// and first-seen content carries downstream enrichment we must not
/// clobber. Sources marked mutable update in place when the fingerprint
/// actually changed; an unchanged fingerprint skips either way.
pub async fn decide(
    store: &dyn ContentStore,
    key: &str,
    fingerprint: &str,
    mutable: bool,
) -> Result<PersistDecision, StoreError> {
    match store.find_by_key(key).await? {
        None => Ok(PersistDecision::Create),
        Some(existing) if mutable && existing.fingerprint != fingerprint => {
            Ok(PersistDecision::Update)
        }
        Some(_) => Ok(PersistDecision::Skip),
    }
}

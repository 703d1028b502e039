use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

// --- Platforms ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    HelpCenter,
    Forum,
    Discussion,
    Marketplace,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::HelpCenter => write!(f, "help_center"),
            Platform::Forum => write!(f, "forum"),
            Platform::Discussion => write!(f, "discussion"),
            Platform::Marketplace => write!(f, "marketplace"),
        }
    }
}

// --- Selector tables (data, not code) ---

/// Ordered candidate patterns for one site's page layout. Each entry is a
/// regex whose first capture group yields the field text; candidates are
/// tried in order and the first non-empty capture wins. Sites change their
/// markup over time, so these are hints, not guarantees — the extractor
/// falls back through page metadata when every candidate misses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorTable {
    pub title: Vec<String>,
    pub body: Vec<String>,
    pub author: Vec<String>,
    pub timestamp: Vec<String>,
    pub category: Vec<String>,
    pub breadcrumb: Vec<String>,
    /// Patterns matched repeatedly over a thread page; capture 1 is one
    /// reply body, optional capture 2 its author.
    pub reply: Vec<String>,
}

/// Link discovery rules for listing/category pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRules {
    /// Regex an item URL must match to enter the frontier.
    pub item_pattern: String,
    /// Regex a pagination href must match to be followed as "next page".
    #[serde(default)]
    pub next_page_pattern: Option<String>,
    /// Template with a `{page}` placeholder for sites with numbered pages.
    /// Lets discovery synthesize the next listing URL when a page fails to
    /// load, instead of losing everything after the broken page.
    #[serde(default)]
    pub page_template: Option<String>,
}

// --- Rate limits and caps ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub base_backoff_ms: u64,
    pub cap_backoff_ms: u64,
    pub max_fetch_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 2_000,
            base_backoff_ms: 1_000,
            cap_backoff_ms: 60_000,
            max_fetch_attempts: 3,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caps {
    pub max_pages: u32,
    pub max_items: usize,
    pub max_replies: usize,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_items: 200,
            max_replies: 50,
        }
    }
}

// --- Quality gate rules ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRules {
    pub min_body_len: usize,
    pub banned_tokens: Vec<String>,
    /// Maximum fraction of non-alphanumeric characters before a body is
    /// considered extracted markup rather than prose.
    pub max_symbol_ratio: f32,
    /// ISO 639-3 code the gate accepts (plus "unknown" detections).
    pub target_language: String,
    /// Below this detection confidence, treat the language as unknown.
    pub min_confidence: f32,
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            min_body_len: 80,
            banned_tokens: vec!["[deleted]".to_string(), "[removed]".to_string()],
            max_symbol_ratio: 0.4,
            target_language: "eng".to_string(),
            min_confidence: 0.5,
        }
    }
}

// --- Crawl target ---

/// One source definition. Immutable configuration, loaded before a run
/// starts; per-site layout knowledge lives in the selector table and link
/// rules rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct CrawlTarget {
    #[builder(setter(into))]
    pub slug: String,
    pub platform: Platform,
    pub seeds: Vec<String>,
    pub links: LinkRules,
    pub selectors: SelectorTable,
    #[builder(default)]
    pub limits: RateLimits,
    #[builder(default)]
    pub caps: Caps,
    #[builder(default)]
    pub quality: QualityRules,
    /// Sources whose published content is edited after the fact. Existing
    /// records from mutable sources are updated in place; everything else
    /// is treated as an append-only archive and skipped on re-crawl.
    #[builder(default = false)]
    pub mutable: bool,
    /// Requires a browser-rendered fetch (script-built pages).
    #[builder(default = false)]
    pub render: bool,
    #[builder(default)]
    pub headers: Vec<(String, String)>,
}

// --- Pipeline data ---

/// A fetched page on its way to the extractor. Created per fetch, dropped
/// after extraction.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// The normalized unit of work produced by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub canonical_url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    /// Thread/article vs. reply.
    pub is_primary: bool,
    pub parent_url: Option<String>,
    /// Position within the parent page, for sub-items without a stable
    /// external ID. Feeds the derived identity key.
    pub local_index: Option<usize>,
    pub source_platform: Platform,
}

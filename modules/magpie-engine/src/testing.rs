//! Deterministic doubles for the capability traits: no network, no
//! database. Integration tests drive the coordinator entirely through
//! these plus `MemoryStore`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use magpie_common::{
    Caps, CrawlTarget, FetchError, LinkRules, Platform, QualityRules, RateLimits, RawPage,
    SelectorTable,
};

use crate::traits::{Detection, FetchOptions, LanguageDetector, PageFetcher};

// --- MockFetcher ---

pub enum MockResponse {
    Page(String),
    Transient,
    Permanent,
    /// Fail transiently `fails` times, then serve the page.
    Flaky { fails: u32, content: String },
}

#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, MockResponse>,
    calls: Mutex<HashMap<String, u32>>,
    acquire_error: Option<String>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher whose capability check fails — setup-error path.
    pub fn failing_setup(message: &str) -> Self {
        Self {
            acquire_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, url: &str, content: &str) -> Self {
        self.responses
            .insert(url.to_string(), MockResponse::Page(content.to_string()));
        self
    }

    pub fn with_transient(mut self, url: &str) -> Self {
        self.responses.insert(url.to_string(), MockResponse::Transient);
        self
    }

    pub fn with_permanent(mut self, url: &str) -> Self {
        self.responses.insert(url.to_string(), MockResponse::Permanent);
        self
    }

    pub fn with_flaky(mut self, url: &str, fails: u32, content: &str) -> Self {
        self.responses.insert(
            url.to_string(),
            MockResponse::Flaky {
                fails,
                content: content.to_string(),
            },
        );
        self
    }

    /// How many times a URL was fetched.
    pub fn calls(&self, url: &str) -> u32 {
        *self.calls.lock().expect("calls lock").get(url).unwrap_or(&0)
    }

    pub fn total_fetches(&self) -> u32 {
        self.calls.lock().expect("calls lock").values().sum()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn acquire(&self) -> Result<(), FetchError> {
        match &self.acquire_error {
            Some(message) => Err(FetchError::permanent(message.clone())),
            None => Ok(()),
        }
    }

    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<RawPage, FetchError> {
        let call_no = {
            let mut calls = self.calls.lock().expect("calls lock");
            let entry = calls.entry(url.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let content = match self.responses.get(url) {
            None => return Err(FetchError::permanent("status 404")),
            Some(MockResponse::Permanent) => return Err(FetchError::permanent("status 404")),
            Some(MockResponse::Transient) => return Err(FetchError::transient("status 503")),
            Some(MockResponse::Flaky { fails, content }) => {
                if call_no <= *fails {
                    return Err(FetchError::transient("status 503"));
                }
                content.clone()
            }
            Some(MockResponse::Page(content)) => content.clone(),
        };

        Ok(RawPage {
            url: url.to_string(),
            content,
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// --- StaticDetector ---

pub struct StaticDetector {
    detection: Detection,
}

impl StaticDetector {
    pub fn unknown() -> Self {
        Self {
            detection: Detection::unknown(),
        }
    }

    pub fn known(language: &str, confidence: f32) -> Self {
        Self {
            detection: Detection {
                language: Some(language.to_string()),
                confidence,
            },
        }
    }
}

impl LanguageDetector for StaticDetector {
    fn detect(&self, _text: &str) -> Detection {
        self.detection.clone()
    }
}

// --- Fixture builders ---

/// Selector table matching the fixture HTML built below.
pub fn test_selector_table() -> SelectorTable {
    SelectorTable {
        title: vec![r"(?s)<h1>(.*?)</h1>".to_string()],
        body: vec![r#"(?s)<div class="body">(.*?)</div>"#.to_string()],
        author: vec![r#"<span class="author">([^<]+)</span>"#.to_string()],
        timestamp: vec![r#"<time datetime="([^"]+)""#.to_string()],
        category: vec![],
        breadcrumb: vec![],
        reply: vec![r#"(?s)<div class="reply">(.*?)</div>"#.to_string()],
    }
}

pub fn article_page(title: &str, body: &str) -> String {
    format!(r#"<html><h1>{title}</h1><div class="body">{body}</div></html>"#)
}

pub fn thread_page(title: &str, body: &str, replies: &[&str]) -> String {
    let replies: String = replies
        .iter()
        .map(|r| format!(r#"<div class="reply">{r}</div>"#))
        .collect();
    format!(r#"<html><h1>{title}</h1><div class="body">{body}</div>{replies}</html>"#)
}

pub fn listing_page(links: &[&str], next: Option<&str>) -> String {
    let mut html = String::from("<html><ul>");
    for link in links {
        html.push_str(&format!(r#"<li><a href="{link}">item</a></li>"#));
    }
    html.push_str("</ul>");
    if let Some(next) = next {
        html.push_str(&format!(r#"<a href="{next}" rel="next">next</a>"#));
    }
    html.push_str("</html>");
    html
}

/// A target with zero delays so tests run at full speed.
pub fn test_target(slug: &str, seeds: Vec<String>) -> CrawlTarget {
    CrawlTarget::builder()
        .slug(slug)
        .platform(Platform::Forum)
        .seeds(seeds)
        .links(LinkRules {
            item_pattern: r"/t/\d+".to_string(),
            next_page_pattern: Some(r"[?&]page=\d+".to_string()),
            page_template: None,
        })
        .selectors(test_selector_table())
        .limits(RateLimits {
            min_delay_ms: 0,
            max_delay_ms: 0,
            base_backoff_ms: 0,
            cap_backoff_ms: 0,
            max_fetch_attempts: 3,
            timeout_secs: 5,
        })
        .caps(Caps {
            max_pages: 10,
            max_items: 100,
            max_replies: 10,
        })
        .quality(QualityRules {
            min_body_len: 20,
            ..QualityRules::default()
        })
        .build()
}

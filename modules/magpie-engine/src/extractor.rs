use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

use magpie_common::{ContentRecord, Platform, RawPage, SelectorTable};

use crate::identity;

/// Everything one page yielded: the primary record plus any reply
/// sub-records from thread pages.
#[derive(Debug)]
pub struct Extraction {
    pub primary: ContentRecord,
    pub replies: Vec<ContentRecord>,
}

impl Extraction {
    pub fn into_records(self) -> Vec<ContentRecord> {
        let mut records = vec![self.primary];
        records.extend(self.replies);
        records
    }
}

/// Applies a site's selector table to raw page content. The table's
/// patterns are hints; title falls back through page metadata, breadcrumb,
/// body text, and finally the URL path, so a title is never empty while
/// any body text exists. Returns `None` only when no fallback can produce
/// a body.
pub struct Extractor {
    title: Vec<Regex>,
    body: Vec<Regex>,
    author: Vec<Regex>,
    timestamp: Vec<Regex>,
    category: Vec<Regex>,
    breadcrumb: Vec<Regex>,
    reply: Vec<Regex>,
    max_replies: usize,
}

impl Extractor {
    pub fn new(table: &SelectorTable, max_replies: usize) -> anyhow::Result<Self> {
        Ok(Self {
            title: compile(&table.title, "title")?,
            body: compile(&table.body, "body")?,
            author: compile(&table.author, "author")?,
            timestamp: compile(&table.timestamp, "timestamp")?,
            category: compile(&table.category, "category")?,
            breadcrumb: compile(&table.breadcrumb, "breadcrumb")?,
            reply: compile(&table.reply, "reply")?,
            max_replies,
        })
    }

    pub fn extract(&self, page: &RawPage, platform: Platform) -> Option<Extraction> {
        let body = first_capture(&self.body, &page.content)?;
        if body.is_empty() {
            return None;
        }

        let title = self.extract_title(page, &body);
        let author = first_capture(&self.author, &page.content);
        let published_at =
            first_capture(&self.timestamp, &page.content).and_then(|t| parse_timestamp(&t));
        let category = first_capture(&self.category, &page.content);

        let canonical = identity::canonical_url(&page.url);
        let replies = self.extract_replies(page, &canonical, platform);

        debug!(
            url = page.url.as_str(),
            replies = replies.len(),
            "Page extracted"
        );

        Some(Extraction {
            primary: ContentRecord {
                canonical_url: canonical,
                title,
                body,
                author,
                published_at,
                category,
                is_primary: true,
                parent_url: None,
                local_index: None,
                source_platform: platform,
            },
            replies,
        })
    }

    /// Tiered title fallback: selector patterns → `<title>` metadata →
    /// breadcrumb → first sentence of the body → trailing URL path segment.
    fn extract_title(&self, page: &RawPage, body: &str) -> String {
        if let Some(t) = first_capture(&self.title, &page.content) {
            return t;
        }
        if let Some(t) = page_title(&page.content) {
            return t;
        }
        if let Some(t) = first_capture(&self.breadcrumb, &page.content) {
            return t;
        }
        if let Some(t) = first_sentence(body) {
            return t;
        }
        trailing_path_segment(&page.url)
    }

    fn extract_replies(
        &self,
        page: &RawPage,
        parent_canonical: &str,
        platform: Platform,
    ) -> Vec<ContentRecord> {
        let mut replies = Vec::new();

        for re in &self.reply {
            for cap in re.captures_iter(&page.content) {
                if replies.len() >= self.max_replies {
                    return replies;
                }
                let body = match cap.get(1) {
                    Some(m) => clean_fragment(m.as_str()),
                    None => continue,
                };
                if body.is_empty() {
                    continue;
                }
                let author = cap.get(2).map(|m| clean_fragment(m.as_str())).filter(|a| !a.is_empty());
                let idx = replies.len();
                replies.push(ContentRecord {
                    canonical_url: parent_canonical.to_string(),
                    title: first_sentence(&body)
                        .unwrap_or_else(|| format!("Reply {}", idx + 1)),
                    body,
                    author,
                    published_at: None,
                    category: None,
                    is_primary: false,
                    parent_url: Some(parent_canonical.to_string()),
                    local_index: Some(idx),
                    source_platform: platform,
                });
            }
            // Candidate patterns are alternatives for the same layout;
            // the first one that matched anything wins.
            if !replies.is_empty() {
                break;
            }
        }

        replies
    }
}

fn compile(patterns: &[String], field: &str) -> anyhow::Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| anyhow::anyhow!("invalid {field} pattern {p:?}: {e}"))
        })
        .collect()
}

/// First pattern whose capture 1 yields non-empty text after cleanup.
fn first_capture(patterns: &[Regex], html: &str) -> Option<String> {
    for re in patterns {
        if let Some(cap) = re.captures(html) {
            if let Some(m) = cap.get(1) {
                let text = clean_fragment(m.as_str());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    None
}

/// Strip markup from a captured fragment and collapse whitespace.
fn clean_fragment(fragment: &str) -> String {
    let tag_re = Regex::new(r"<[^>]+>").expect("valid regex");
    let no_tags = tag_re.replace_all(fragment, " ");
    let decoded = no_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn page_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex");
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| clean_fragment(m.as_str()))
        .filter(|t| !t.is_empty())
}

/// First sentence of a body, capped so a wall of text without punctuation
/// still yields something title-shaped.
fn first_sentence(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    let sentence: String = trimmed[..end].chars().take(120).collect();
    let sentence = sentence.trim().to_string();
    if sentence.is_empty() {
        None
    } else {
        Some(sentence)
    }
}

/// Last path segment of the URL, de-slugged. The fallback of last resort.
fn trailing_path_segment(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let segment = path
        .split('/')
        .rev()
        .find(|s| !s.is_empty())
        .unwrap_or("untitled");
    segment.replace(['-', '_'], " ").trim().to_string()
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, content: &str) -> RawPage {
        RawPage {
            url: url.to_string(),
            content: content.to_string(),
            fetched_at: Utc::now(),
        }
    }

    fn table() -> SelectorTable {
        SelectorTable {
            title: vec![r#"(?s)<h1 class="post-title">(.*?)</h1>"#.to_string()],
            body: vec![r#"(?s)<div class="post-body">(.*?)</div>"#.to_string()],
            author: vec![r#"<span class="author">([^<]+)</span>"#.to_string()],
            timestamp: vec![r#"<time datetime="([^"]+)""#.to_string()],
            category: vec![],
            breadcrumb: vec![r#"<nav class="crumbs">.*?<a[^>]*>([^<]+)</a>"#.to_string()],
            reply: vec![r#"(?s)<div class="reply">(.*?)</div>"#.to_string()],
        }
    }

    #[test]
    fn extracts_all_fields_when_selectors_hit() {
        let extractor = Extractor::new(&table(), 10).unwrap();
        let html = r#"
            <h1 class="post-title">How to reset your password</h1>
            <span class="author">ana</span>
            <time datetime="2024-03-01T10:00:00Z"></time>
            <div class="post-body">Go to settings &amp; click reset. Done.</div>
        "#;
        let result = extractor
            .extract(&page("https://example.org/help/reset", html), Platform::HelpCenter)
            .unwrap();

        assert_eq!(result.primary.title, "How to reset your password");
        assert_eq!(result.primary.body, "Go to settings & click reset. Done.");
        assert_eq!(result.primary.author.as_deref(), Some("ana"));
        assert!(result.primary.published_at.is_some());
        assert!(result.primary.is_primary);
    }

    #[test]
    fn title_falls_back_to_page_metadata() {
        let extractor = Extractor::new(&table(), 10).unwrap();
        let html = r#"
            <title>Billing FAQ — Example</title>
            <div class="post-body">Invoices are sent monthly to the account owner's inbox.</div>
        "#;
        let result = extractor
            .extract(&page("https://example.org/help/billing", html), Platform::HelpCenter)
            .unwrap();
        assert_eq!(result.primary.title, "Billing FAQ — Example");
    }

    #[test]
    fn title_falls_back_to_first_sentence_then_url() {
        let extractor = Extractor::new(&table(), 10).unwrap();

        let html = r#"<div class="post-body">Refunds take five days. More details below.</div>"#;
        let result = extractor
            .extract(&page("https://example.org/help/refund-policy", html), Platform::HelpCenter)
            .unwrap();
        assert_eq!(result.primary.title, "Refunds take five days");

        // No sentence punctuation and no metadata: de-slugged URL segment
        assert_eq!(
            trailing_path_segment("https://example.org/help/refund-policy"),
            "refund policy"
        );
    }

    #[test]
    fn no_body_means_no_content() {
        let extractor = Extractor::new(&table(), 10).unwrap();
        let html = r#"<h1 class="post-title">Orphan title</h1>"#;
        assert!(extractor
            .extract(&page("https://example.org/x", html), Platform::HelpCenter)
            .is_none());
    }

    #[test]
    fn replies_are_indexed_and_capped() {
        let extractor = Extractor::new(&table(), 2).unwrap();
        let html = r#"
            <div class="post-body">Thread opener asking about shipping times.</div>
            <div class="reply">First answer.</div>
            <div class="reply">Second answer.</div>
            <div class="reply">Third answer.</div>
        "#;
        let result = extractor
            .extract(&page("https://example.org/t/9", html), Platform::Forum)
            .unwrap();

        assert_eq!(result.replies.len(), 2);
        assert_eq!(result.replies[0].local_index, Some(0));
        assert_eq!(result.replies[1].local_index, Some(1));
        assert!(result.replies.iter().all(|r| !r.is_primary));
        assert!(result
            .replies
            .iter()
            .all(|r| r.parent_url.as_deref() == Some("https://example.org/t/9")));
    }

    #[test]
    fn timestamp_formats_parse() {
        assert!(parse_timestamp("2024-03-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-03-01 10:00:00").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}

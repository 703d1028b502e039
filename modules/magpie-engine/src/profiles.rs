//! Built-in crawl targets. Each profile is pure data: seeds, link rules,
//! and a selector table describing one site's layout. Adding a source
//! means adding a profile here, not writing code.

use magpie_common::{Caps, CrawlTarget, LinkRules, Platform, QualityRules, SelectorTable};

pub fn all() -> Vec<&'static str> {
    vec!["acme-help", "acme-forum"]
}

pub fn profile(slug: &str) -> Option<CrawlTarget> {
    match slug {
        "acme-help" => Some(acme_help()),
        "acme-forum" => Some(acme_forum()),
        _ => None,
    }
}

/// Zendesk-style help center. Articles are append-only once published,
/// listing pages use numbered pagination.
fn acme_help() -> CrawlTarget {
    CrawlTarget::builder()
        .slug("acme-help")
        .platform(Platform::HelpCenter)
        .seeds(vec![
            "https://support.acme.example/hc/en-us/categories/200101-Getting-Started".to_string(),
            "https://support.acme.example/hc/en-us/categories/200102-Billing".to_string(),
        ])
        .links(LinkRules {
            item_pattern: r"/hc/en-us/articles/\d+".to_string(),
            next_page_pattern: Some(r"[?&]page=\d+".to_string()),
            page_template: Some(
                "https://support.acme.example/hc/en-us/categories/200101?page={page}".to_string(),
            ),
        })
        .selectors(SelectorTable {
            title: vec![r#"(?s)<h1[^>]*class="article-title"[^>]*>(.*?)</h1>"#.to_string()],
            body: vec![r#"(?s)<div[^>]*class="article-body"[^>]*>(.*?)</div>"#.to_string()],
            author: vec![r#"<span[^>]*class="article-author"[^>]*>([^<]+)</span>"#.to_string()],
            timestamp: vec![r#"<time[^>]*datetime="([^"]+)""#.to_string()],
            category: vec![r#"<a[^>]*class="category-link"[^>]*>([^<]+)</a>"#.to_string()],
            breadcrumb: vec![r#"(?s)<li[^>]*class="breadcrumb"[^>]*>(.*?)</li>"#.to_string()],
            reply: vec![],
        })
        .build()
}

/// Discourse-style community forum. Threads get edited, so records are
/// updated in place on re-crawl; replies are extracted per thread page.
fn acme_forum() -> CrawlTarget {
    CrawlTarget::builder()
        .slug("acme-forum")
        .platform(Platform::Forum)
        .seeds(vec![
            "https://community.acme.example/c/troubleshooting/5".to_string(),
        ])
        .links(LinkRules {
            item_pattern: r"/t/[\w-]+/\d+".to_string(),
            next_page_pattern: Some(r"[?&]page=\d+".to_string()),
            page_template: None,
        })
        .selectors(SelectorTable {
            title: vec![r#"(?s)<h1[^>]*class="topic-title"[^>]*>(.*?)</h1>"#.to_string()],
            body: vec![r#"(?s)<div[^>]*class="topic-body"[^>]*>(.*?)</div>"#.to_string()],
            author: vec![r#"<span[^>]*class="username"[^>]*>([^<]+)</span>"#.to_string()],
            timestamp: vec![r#"<time[^>]*datetime="([^"]+)""#.to_string()],
            category: vec![r#"<span[^>]*class="category-name"[^>]*>([^<]+)</span>"#.to_string()],
            breadcrumb: vec![],
            reply: vec![
                r#"(?s)<div[^>]*class="post-reply"[^>]*>.*?<div class="cooked">(.*?)</div>\s*<span class="username">([^<]+)</span>"#
                    .to_string(),
                r#"(?s)<div[^>]*class="cooked"[^>]*>(.*?)</div>"#.to_string(),
            ],
        })
        .caps(Caps {
            max_pages: 20,
            max_items: 200,
            max_replies: 50,
        })
        .quality(QualityRules::default())
        .mutable(true)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_profile_resolves() {
        for slug in all() {
            let target = profile(slug).expect("listed profile must resolve");
            assert_eq!(target.slug, slug);
            assert!(!target.seeds.is_empty());
        }
    }

    #[test]
    fn unknown_slug_is_none() {
        assert!(profile("nope").is_none());
    }

    #[test]
    fn forum_is_mutable_help_center_is_not() {
        assert!(profile("acme-forum").expect("forum").mutable);
        assert!(!profile("acme-help").expect("help").mutable);
    }
}

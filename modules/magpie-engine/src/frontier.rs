use std::collections::HashSet;

use regex::Regex;
use tracing::{debug, info, warn};

use magpie_common::{Caps, LinkRules};

use crate::identity;
use crate::politeness::Politeness;
use crate::traits::{FetchOptions, PageFetcher};

/// What one discovery pass over a seed produced. Page-level failures are
/// recorded here rather than thrown — a broken listing page costs its own
/// links, never the rest of the pass.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub urls: Vec<String>,
    pub pages_fetched: u32,
    pub page_errors: Vec<String>,
}

/// URL discovery over listing/category pages. Compiled once per target;
/// walks pagination until a cap or exhaustion condition triggers.
pub struct Frontier {
    item_re: Regex,
    next_re: Option<Regex>,
    page_template: Option<String>,
}

impl Frontier {
    pub fn new(rules: &LinkRules) -> anyhow::Result<Self> {
        let item_re = Regex::new(&rules.item_pattern)
            .map_err(|e| anyhow::anyhow!("invalid item pattern {:?}: {e}", rules.item_pattern))?;
        let next_re = match &rules.next_page_pattern {
            Some(p) => Some(
                Regex::new(p)
                    .map_err(|e| anyhow::anyhow!("invalid next-page pattern {p:?}: {e}"))?,
            ),
            None => None,
        };
        Ok(Self {
            item_re,
            next_re,
            page_template: rules.page_template.clone(),
        })
    }

    /// Walk listing pages from `seed`, collecting item links. Terminates on
    /// the first of: no next-page candidate, `max_pages` pagination fetches
    /// issued, or `max_items` discovered.
    pub async fn discover(
        &self,
        fetcher: &dyn PageFetcher,
        politeness: &Politeness,
        seed: &str,
        caps: &Caps,
        options: &FetchOptions,
    ) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        let mut seen_items: HashSet<String> = HashSet::new();
        let mut visited_pages: HashSet<String> = HashSet::new();

        let mut next: Option<String> = Some(seed.to_string());
        let mut page_no: u32 = 1;

        while let Some(page_url) = next.take() {
            if outcome.pages_fetched >= caps.max_pages || outcome.urls.len() >= caps.max_items {
                break;
            }
            // Pages keyed by canonical URL: ?page=2 is a different listing
            // page, while tracking params and fragments are not.
            if !visited_pages.insert(identity::canonical_url(&page_url)) {
                debug!(page_url, "Pagination loop detected, stopping");
                break;
            }

            politeness.wait().await;
            outcome.pages_fetched += 1;

            match fetcher.fetch(&page_url, options).await {
                Ok(page) => {
                    let mut new_links = 0usize;
                    for link in self.extract_item_links(&page.content, &page_url) {
                        if seen_items.insert(identity::discovery_key(&link)) {
                            outcome.urls.push(link);
                            new_links += 1;
                            if outcome.urls.len() >= caps.max_items {
                                break;
                            }
                        }
                    }
                    debug!(page_url, new_links, "Listing page processed");

                    next = self
                        .find_next_link(&page.content, &page_url, &visited_pages)
                        .or_else(|| {
                            // Numbered-page sources rarely expose a next link;
                            // keep walking while pages still produce items.
                            if new_links > 0 {
                                self.synthesize_page(page_no + 1)
                            } else {
                                None
                            }
                        });
                }
                Err(e) => {
                    warn!(page_url, error = %e, "Listing page fetch failed, continuing discovery");
                    outcome
                        .page_errors
                        .push(format!("discovery {page_url}: {e}"));
                    politeness.backoff(0).await;
                    // Without a page template there is no way to name the
                    // next candidate; this seed's pagination ends here.
                    next = self.synthesize_page(page_no + 1);
                }
            }

            page_no += 1;
        }

        info!(
            seed,
            discovered = outcome.urls.len(),
            pages = outcome.pages_fetched,
            errors = outcome.page_errors.len(),
            "Discovery pass complete"
        );
        outcome
    }

    /// Extract hrefs matching the item pattern, resolved against the page URL.
    fn extract_item_links(&self, html: &str, base_url: &str) -> Vec<String> {
        let mut links = Vec::new();
        for href in hrefs(html, base_url) {
            if self.item_re.is_match(&href) {
                links.push(href);
            }
        }
        links
    }

    fn find_next_link(
        &self,
        html: &str,
        base_url: &str,
        visited_pages: &HashSet<String>,
    ) -> Option<String> {
        let next_re = self.next_re.as_ref()?;
        hrefs(html, base_url)
            .into_iter()
            .find(|href| {
                next_re.is_match(href) && !visited_pages.contains(&identity::canonical_url(href))
            })
    }

    fn synthesize_page(&self, page_no: u32) -> Option<String> {
        self.page_template
            .as_ref()
            .map(|t| t.replace("{page}", &page_no.to_string()))
    }
}

/// All hrefs in a page, resolved to absolute URLs. Relative links resolve
/// against `base_url`; unparseable ones are dropped.
fn hrefs(html: &str, base_url: &str) -> Vec<String> {
    let href_re = Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid regex");
    let base = url::Url::parse(base_url).ok();

    let mut out = Vec::new();
    for cap in href_re.captures_iter(html) {
        let raw = &cap[1];
        let resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if let Some(ref b) = base {
            match b.join(raw) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        } else {
            continue;
        };
        out.push(resolved);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrefs_resolve_relative_links() {
        let html = r#"<a href="/t/1">one</a> <a href="https://other.org/t/2">two</a>"#;
        let links = hrefs(html, "https://example.org/category/1");
        assert_eq!(
            links,
            vec![
                "https://example.org/t/1".to_string(),
                "https://other.org/t/2".to_string()
            ]
        );
    }

    #[test]
    fn item_links_filtered_by_pattern() {
        let frontier = Frontier::new(&LinkRules {
            item_pattern: r"/t/\d+".to_string(),
            next_page_pattern: None,
            page_template: None,
        })
        .unwrap();

        let html = r#"<a href="/t/1">x</a><a href="/about">y</a><a href="/t/2">z</a>"#;
        let links = frontier.extract_item_links(html, "https://example.org/");
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn synthesized_page_fills_template() {
        let frontier = Frontier::new(&LinkRules {
            item_pattern: r"/t/\d+".to_string(),
            next_page_pattern: None,
            page_template: Some("https://example.org/category/1?page={page}".to_string()),
        })
        .unwrap();

        assert_eq!(
            frontier.synthesize_page(3).as_deref(),
            Some("https://example.org/category/1?page=3")
        );
    }

    #[test]
    fn invalid_item_pattern_is_a_setup_error() {
        let result = Frontier::new(&LinkRules {
            item_pattern: "(".to_string(),
            next_page_pattern: None,
            page_template: None,
        });
        assert!(result.is_err());
    }
}

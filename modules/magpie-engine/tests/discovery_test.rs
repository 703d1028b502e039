//! Pagination walking: link-driven and template-driven continuation,
//! caps, loop guards, and survival of broken listing pages.

use std::time::Duration;

use magpie_common::{Caps, LinkRules, RateLimits};
use magpie_engine::frontier::Frontier;
use magpie_engine::politeness::Politeness;
use magpie_engine::testing::{listing_page, MockFetcher};
use magpie_engine::traits::{FetchOptions, PageFetcher};

const SEED: &str = "https://example.org/c/help";

fn rules() -> LinkRules {
    LinkRules {
        item_pattern: r"/t/\d+".to_string(),
        next_page_pattern: Some(r"[?&]page=\d+".to_string()),
        page_template: None,
    }
}

fn politeness() -> Politeness {
    Politeness::new(&RateLimits {
        min_delay_ms: 0,
        max_delay_ms: 0,
        base_backoff_ms: 0,
        cap_backoff_ms: 0,
        max_fetch_attempts: 1,
        timeout_secs: 5,
    })
}

fn options() -> FetchOptions {
    FetchOptions {
        timeout: Duration::from_secs(5),
        headers: vec![],
        render: false,
    }
}

fn caps(max_pages: u32, max_items: usize) -> Caps {
    Caps {
        max_pages,
        max_items,
        max_replies: 10,
    }
}

async fn discover(
    frontier: &Frontier,
    fetcher: &dyn PageFetcher,
    caps: &Caps,
) -> magpie_engine::frontier::DiscoveryOutcome {
    frontier
        .discover(fetcher, &politeness(), SEED, caps, &options())
        .await
}

#[tokio::test]
async fn follows_next_links_across_pages() {
    let fetcher = MockFetcher::new()
        .with_page(
            SEED,
            &listing_page(&["/t/1", "/t/2", "/t/3"], Some("/c/help?page=2")),
        )
        .with_page(
            "https://example.org/c/help?page=2",
            &listing_page(&["/t/4", "/t/5", "/t/6"], None),
        );
    let frontier = Frontier::new(&rules()).unwrap();

    let outcome = discover(&frontier, &fetcher, &caps(5, 100)).await;

    assert_eq!(outcome.urls.len(), 6);
    assert_eq!(outcome.pages_fetched, 2);
    assert!(outcome.page_errors.is_empty());
    assert_eq!(outcome.urls[0], "https://example.org/t/1");
    assert_eq!(outcome.urls[5], "https://example.org/t/6");
}

#[tokio::test]
async fn item_links_are_deduplicated_across_pages() {
    let fetcher = MockFetcher::new()
        .with_page(SEED, &listing_page(&["/t/1", "/t/2"], Some("/c/help?page=2")))
        .with_page(
            "https://example.org/c/help?page=2",
            &listing_page(&["/t/2", "/t/3"], None),
        );
    let frontier = Frontier::new(&rules()).unwrap();

    let outcome = discover(&frontier, &fetcher, &caps(5, 100)).await;

    assert_eq!(outcome.urls.len(), 3);
}

#[tokio::test]
async fn max_pages_caps_pagination() {
    // Every page links to the next; only the cap stops the walk.
    let mut fetcher = MockFetcher::new().with_page(
        SEED,
        &listing_page(&["/t/1"], Some("/c/help?page=2")),
    );
    for page in 2..10 {
        fetcher = fetcher.with_page(
            &format!("https://example.org/c/help?page={page}"),
            &listing_page(
                &[format!("/t/{page}").as_str()],
                Some(&format!("/c/help?page={}", page + 1)),
            ),
        );
    }
    let frontier = Frontier::new(&rules()).unwrap();

    let outcome = discover(&frontier, &fetcher, &caps(3, 100)).await;

    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(outcome.urls.len(), 3);
}

#[tokio::test]
async fn max_items_stops_discovery_early() {
    let links: Vec<String> = (1..=10).map(|i| format!("/t/{i}")).collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let fetcher =
        MockFetcher::new().with_page(SEED, &listing_page(&link_refs, Some("/c/help?page=2")));
    let frontier = Frontier::new(&rules()).unwrap();

    let outcome = discover(&frontier, &fetcher, &caps(5, 5)).await;

    assert_eq!(outcome.urls.len(), 5);
    assert_eq!(outcome.pages_fetched, 1);
}

#[tokio::test]
async fn pagination_cycle_terminates() {
    // Page 2 points back at page 1; the visited guard ends the walk.
    let fetcher = MockFetcher::new()
        .with_page(SEED, &listing_page(&["/t/1"], Some("/c/help?page=2")))
        .with_page(
            "https://example.org/c/help?page=2",
            &listing_page(&["/t/2"], Some("https://example.org/c/help?page=2")),
        );
    let frontier = Frontier::new(&rules()).unwrap();

    let outcome = discover(&frontier, &fetcher, &caps(10, 100)).await;

    assert_eq!(outcome.pages_fetched, 2);
    assert_eq!(outcome.urls.len(), 2);
}

#[tokio::test]
async fn broken_page_ends_link_driven_pagination() {
    let fetcher = MockFetcher::new()
        .with_page(SEED, &listing_page(&["/t/1", "/t/2"], Some("/c/help?page=2")))
        .with_permanent("https://example.org/c/help?page=2");
    let frontier = Frontier::new(&rules()).unwrap();

    let outcome = discover(&frontier, &fetcher, &caps(10, 100)).await;

    // Links from the good page survive; the failure is recorded, and with
    // no page template there is no way to continue past it.
    assert_eq!(outcome.urls.len(), 2);
    assert_eq!(outcome.page_errors.len(), 1);
    assert_eq!(outcome.pages_fetched, 2);
}

#[tokio::test]
async fn page_template_walks_past_a_broken_page() {
    let seed = "https://example.org/c/help?page=1";
    let fetcher = MockFetcher::new()
        .with_page(seed, &listing_page(&["/t/1", "/t/2"], None))
        .with_permanent("https://example.org/c/help?page=2")
        .with_page(
            "https://example.org/c/help?page=3",
            &listing_page(&["/t/3", "/t/4"], None),
        )
        .with_page("https://example.org/c/help?page=4", &listing_page(&[], None));
    let frontier = Frontier::new(&LinkRules {
        item_pattern: r"/t/\d+".to_string(),
        next_page_pattern: None,
        page_template: Some("https://example.org/c/help?page={page}".to_string()),
    })
    .unwrap();

    let outcome = frontier
        .discover(&fetcher, &politeness(), seed, &caps(10, 100), &options())
        .await;

    // The broken page costs its own links only; page 3 is synthesized
    // from the template and the walk ends at the first empty page.
    assert_eq!(outcome.urls.len(), 4);
    assert_eq!(outcome.page_errors.len(), 1);
    assert_eq!(outcome.pages_fetched, 4);
}

//! End-to-end pipeline tests over scripted sessions — no browser, no
//! Postgres, no network.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use dealscope_common::{ScrapeRequest, TrendSnapshot};
use dealscope_scraper::store::DealStore;
use dealscope_scraper::testing::{
    deal_fixture, table_page_html, FailingSessionFactory, MemoryDealStore, ScriptedPage,
    ScriptedSession, ScriptedSessionFactory,
};
use dealscope_scraper::{ScrapeOptions, Scraper};

fn fast_options() -> ScrapeOptions {
    ScrapeOptions {
        suggestion_wait: Duration::ZERO,
        inter_page_delay: Duration::ZERO,
        advance_timeout: Duration::ZERO,
    }
}

fn request(max_pages: Option<u32>) -> ScrapeRequest {
    ScrapeRequest {
        city_name: "תל אביב".to_string(),
        street: "דיזנגוף".to_string(),
        house_number: "100".to_string(),
        max_pages,
    }
}

const DETAIL_URL: &str = "https://source.test/?view=deals&id=65210036";
const SUGGESTION: &str = "דיזנגוף 100, תל אביב";

/// Structured response with `rows` deal objects, serials from `offset`.
fn api_page(rows: usize, offset: usize) -> serde_json::Value {
    let deals: Vec<serde_json::Value> = (0..rows)
        .map(|i| {
            let n = offset + i + 1;
            json!({
                "ADDRESS": format!("דיזנגוף {n}"),
                "GUSH": format!("6000-{n}-1"),
                "DEALDATE": "01/02/2023",
                "DEALAMOUNT": format!("{},000", 2000 + n),
            })
        })
        .collect();
    json!({ "status": "ok", "Deals": deals })
}

// ---------------------------------------------------------------------------
// Scenario: resolvable address, three pages of 20/20/7 rows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_pages_yield_forty_seven_deals() {
    let store = Arc::new(MemoryDealStore::new());
    let factory = ScriptedSessionFactory::new(|| {
        ScriptedSession::new()
            .with_suggestions(&[SUGGESTION])
            .with_detail_url(DETAIL_URL)
            .with_pages(vec![
                // First page over the API channel, the rest over the DOM —
                // the channels are independent per page.
                ScriptedPage::api(api_page(20, 0)),
                ScriptedPage::dom(&table_page_html(20, 20)).with_first_row("row-21"),
                ScriptedPage::dom(&table_page_html(7, 40)).with_first_row("row-41"),
            ])
    });
    let scraper = Scraper::new(Arc::new(factory), store.clone(), fast_options());

    let outcome = scraper.run(&request(None)).await.expect("scrape runs");

    assert!(outcome.success);
    assert_eq!(outcome.deals_scraped, 47);
    assert_eq!(outcome.deals.len(), 47);
    assert_eq!(outcome.address_id.as_deref(), Some("65210036"));
    assert_eq!(store.deals().len(), 47);
    // Streaming commit: one insert call per page, in page order.
    assert_eq!(store.insert_batches(), vec![20, 20, 7]);
    // Serials are 1-based and continuous across pages.
    assert_eq!(outcome.deals[0].serial_no, 1);
    assert_eq!(outcome.deals[46].serial_no, 47);
    // Every page's deals carry the page URL they came from.
    assert!(outcome.deals.iter().all(|d| d.source_url == DETAIL_URL));
}

// ---------------------------------------------------------------------------
// Scenario: no search matches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unresolvable_address_is_success_false_not_error() {
    let store = Arc::new(MemoryDealStore::new());
    let factory = ScriptedSessionFactory::new(ScriptedSession::new);
    let scraper = Scraper::new(Arc::new(factory), store.clone(), fast_options());

    let outcome = scraper.run(&request(None)).await.expect("not-found is not an error");

    assert!(!outcome.success);
    assert_eq!(outcome.deals_scraped, 0);
    assert!(outcome.deals.is_empty());
    assert!(outcome.address_id.is_none());
    assert!(outcome.message.contains("דיזנגוף"), "message should name the address: {}", outcome.message);
    assert!(store.deals().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: maxPages caps a longer source
// ---------------------------------------------------------------------------

#[tokio::test]
async fn max_pages_one_stops_after_first_page() {
    let store = Arc::new(MemoryDealStore::new());
    let factory = ScriptedSessionFactory::new(|| {
        let pages = (0..5)
            .map(|p| ScriptedPage::dom(&table_page_html(20, p * 20)))
            .collect();
        ScriptedSession::new()
            .with_suggestions(&[SUGGESTION])
            .with_detail_url(DETAIL_URL)
            .with_pages(pages)
    });
    let scraper = Scraper::new(Arc::new(factory), store.clone(), fast_options());

    let outcome = scraper.run(&request(Some(1))).await.expect("scrape runs");

    assert!(outcome.success);
    assert_eq!(outcome.deals_scraped, 20);
    assert_eq!(store.insert_batches(), vec![20]);
}

// ---------------------------------------------------------------------------
// Resolution via direct submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_submit_fallback_resolves() {
    let store = Arc::new(MemoryDealStore::new());
    let factory = ScriptedSessionFactory::new(|| {
        ScriptedSession::new()
            // Candidates render but none match the requested house number.
            .with_suggestions(&["דיזנגוף 5, תל אביב", "הרצל 12, חולון"])
            .with_submit_url("https://source.test/address/9988776/deals")
            .with_pages(vec![ScriptedPage::dom(&table_page_html(3, 0))])
    });
    let scraper = Scraper::new(Arc::new(factory), store.clone(), fast_options());

    let outcome = scraper.run(&request(None)).await.expect("scrape runs");

    assert!(outcome.success);
    assert_eq!(outcome.address_id.as_deref(), Some("9988776"));
    assert_eq!(outcome.deals_scraped, 3);
}

// ---------------------------------------------------------------------------
// Duplicate persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_insert_is_skipped_not_failed() {
    let store = MemoryDealStore::new();
    let deal = deal_fixture(1, "6213-84-5", "2023-03-15", 2_400_000.0);

    let first = store.insert_deals(std::slice::from_ref(&deal)).await.expect("insert");
    let second = store.insert_deals(std::slice::from_ref(&deal)).await.expect("duplicate is not an error");

    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert_eq!(store.deals().len(), 1, "duplicate must not be stored twice");
}

#[tokio::test]
async fn rescrape_of_same_address_double_writes_nothing() {
    // Two sequential jobs for the same address: the duplicate-key skip is
    // the only mitigation, and it is sufficient.
    let store = Arc::new(MemoryDealStore::new());
    let factory = Arc::new(ScriptedSessionFactory::new(|| {
        ScriptedSession::new()
            .with_suggestions(&[SUGGESTION])
            .with_detail_url(DETAIL_URL)
            .with_pages(vec![ScriptedPage::dom(&table_page_html(5, 0))])
    }));
    let scraper = Scraper::new(factory, store.clone(), fast_options());

    let first = scraper.run(&request(None)).await.expect("first run");
    let second = scraper.run(&request(None)).await.expect("second run");

    assert!(first.success && second.success);
    assert_eq!(second.deals_scraped, 5, "extraction itself still sees 5 rows");
    assert_eq!(store.deals().len(), 5, "store holds each deal once");
}

// ---------------------------------------------------------------------------
// Failure containment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_failure_propagates_as_error() {
    let store = Arc::new(MemoryDealStore::new().with_insert_failure());
    let factory = ScriptedSessionFactory::new(|| {
        ScriptedSession::new()
            .with_suggestions(&[SUGGESTION])
            .with_detail_url(DETAIL_URL)
            .with_pages(vec![ScriptedPage::dom(&table_page_html(2, 0))])
    });
    let scraper = Scraper::new(Arc::new(factory), store, fast_options());

    let result = scraper.run(&request(None)).await;
    assert!(result.is_err(), "non-conflict persistence failure must surface");
}

#[tokio::test]
async fn session_open_failure_propagates_as_error() {
    let factory = FailingSessionFactory {
        message: "chrome did not start".to_string(),
    };
    let scraper = Scraper::new(
        Arc::new(factory),
        Arc::new(MemoryDealStore::new()),
        fast_options(),
    );

    let err = scraper.run(&request(None)).await.expect_err("open failure surfaces");
    assert!(err.to_string().contains("chrome did not start"));
}

// ---------------------------------------------------------------------------
// Trend snapshot handling
// ---------------------------------------------------------------------------

const TREND_TEXT: &str = "3.2% תשואה | עליית מחירים של 8.4% | מדד יוקרה: 7/10";

#[tokio::test]
async fn trend_snapshot_extracted_and_upserted() {
    let store = Arc::new(MemoryDealStore::new());
    let factory = ScriptedSessionFactory::new(|| {
        ScriptedSession::new()
            .with_suggestions(&[SUGGESTION])
            .with_detail_url(DETAIL_URL)
            .with_pages(vec![ScriptedPage::dom(&table_page_html(1, 0))])
            .with_trend_text(TREND_TEXT)
    });
    let scraper = Scraper::new(Arc::new(factory), store.clone(), fast_options());

    let outcome = scraper.run(&request(None)).await.expect("scrape runs");

    let snapshot = outcome.trend_snapshot.expect("snapshot extracted");
    assert_eq!(snapshot.rental_yield_percent, Some(3.2));
    assert_eq!(snapshot.price_increase_percent, Some(8.4));
    assert_eq!(store.snapshot("65210036"), Some(snapshot));
}

#[tokio::test]
async fn snapshot_persistence_failure_is_non_fatal() {
    let store = Arc::new(MemoryDealStore::new().with_snapshot_failure());
    let factory = ScriptedSessionFactory::new(|| {
        ScriptedSession::new()
            .with_suggestions(&[SUGGESTION])
            .with_detail_url(DETAIL_URL)
            .with_pages(vec![ScriptedPage::dom(&table_page_html(2, 0))])
            .with_trend_text(TREND_TEXT)
    });
    let scraper = Scraper::new(Arc::new(factory), store.clone(), fast_options());

    let outcome = scraper.run(&request(None)).await.expect("job still succeeds");
    assert!(outcome.success);
    assert_eq!(outcome.deals_scraped, 2);
    assert!(outcome.trend_snapshot.is_some(), "snapshot still reported in the outcome");
}

#[tokio::test]
async fn empty_trend_page_omits_snapshot() {
    let store = Arc::new(MemoryDealStore::new());
    let factory = ScriptedSessionFactory::new(|| {
        ScriptedSession::new()
            .with_suggestions(&[SUGGESTION])
            .with_detail_url(DETAIL_URL)
            .with_pages(vec![ScriptedPage::dom(&table_page_html(1, 0))])
    });
    let scraper = Scraper::new(Arc::new(factory), store.clone(), fast_options());

    let outcome = scraper.run(&request(None)).await.expect("scrape runs");
    assert!(outcome.trend_snapshot.is_none());
    assert_eq!(store.snapshot("65210036"), None::<TrendSnapshot>);
}

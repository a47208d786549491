//! Scrape orchestration: resolve → paginate → trend pass → outcome.
//!
//! `run` owns the browser session for exactly one request and drops it on
//! every exit path. An unresolvable address is a successful run with
//! `success: false`; only genuine failures return `Err`, and the job
//! wrapper above converts those into the job's error state — nothing
//! escapes further.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use dealscope_common::{Config, ScrapeOutcome, ScrapeRequest};

use crate::browser::SessionFactory;
use crate::extractor::PageExtractor;
use crate::resolver::AddressResolver;
use crate::store::DealStore;
use crate::trends::extract_trend_snapshot;

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub suggestion_wait: Duration,
    pub inter_page_delay: Duration,
    pub advance_timeout: Duration,
}

impl ScrapeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            suggestion_wait: Duration::from_millis(config.suggestion_wait_ms),
            inter_page_delay: Duration::from_millis(config.inter_page_delay_ms),
            advance_timeout: Duration::from_secs(config.navigation_timeout_secs),
        }
    }
}

pub struct Scraper {
    sessions: Arc<dyn SessionFactory>,
    store: Arc<dyn DealStore>,
    options: ScrapeOptions,
}

impl Scraper {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        store: Arc<dyn DealStore>,
        options: ScrapeOptions,
    ) -> Self {
        Self {
            sessions,
            store,
            options,
        }
    }

    pub async fn run(&self, request: &ScrapeRequest) -> Result<ScrapeOutcome> {
        let max_pages = request.effective_max_pages();
        info!(
            city = %request.city_name,
            street = %request.street,
            house = %request.house_number,
            max_pages,
            "Starting scrape"
        );

        let session = self.sessions.open().await?;

        let resolver = AddressResolver::new(self.options.suggestion_wait);
        let Some(resolved) = resolver.resolve(session.as_ref(), request).await? else {
            return Ok(ScrapeOutcome {
                success: false,
                address_id: None,
                deals_scraped: 0,
                deals: Vec::new(),
                trend_snapshot: None,
                message: format!(
                    "No address match for {} {}, {}",
                    request.street.trim(),
                    request.house_number.trim(),
                    request.city_name.trim()
                ),
            });
        };

        let extractor =
            PageExtractor::new(self.options.inter_page_delay, self.options.advance_timeout);
        let deals = extractor
            .extract_all(session.as_ref(), self.store.as_ref(), request, max_pages)
            .await?;

        let text = session.text().await?;
        let html = session.html().await?;
        let snapshot = extract_trend_snapshot(&text, &html);
        let trend_snapshot = if snapshot.is_empty() {
            None
        } else {
            // Non-fatal: a deal scrape with a failed snapshot write is
            // still a successful job.
            if let Err(e) = self
                .store
                .upsert_trend_snapshot(&resolved.external_id, &snapshot)
                .await
            {
                warn!(error = %e, "Trend snapshot persistence failed, continuing");
            }
            Some(snapshot)
        };

        let deals_scraped = deals.len() as u32;
        info!(
            external_id = %resolved.external_id,
            deals_scraped,
            "Scrape complete"
        );
        Ok(ScrapeOutcome {
            success: true,
            address_id: Some(resolved.external_id),
            deals_scraped,
            deals,
            trend_snapshot,
            message: format!("Scraped {deals_scraped} deals"),
        })
    }
}

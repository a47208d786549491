//! Paginated deal extraction.
//!
//! Drives the two row channels in priority order across pages, normalizes
//! every raw row into a `Deal`, and commits each page to the store as soon
//! as it is extracted so partial results survive a later page's failure.

use std::time::{Duration, Instant};

use anyhow::Result;
use rand::Rng;
use tracing::info;

use dealscope_common::normalize::{parse_date_iso, parse_number};
use dealscope_common::{Deal, RawRow, ScrapeRequest};

use crate::browser::DealSession;
use crate::sources::{ApiChannelSource, DomTableSource, RowSource};
use crate::store::DealStore;

// Label fragments matched case-insensitively against row keys. Hebrew for
// the DOM channel, English for the source's own JSON field names.
const ADDRESS_LABELS: &[&str] = &["כתובת", "address"];
const BLOCK_PARCEL_LABELS: &[&str] = &["גוש", "gush", "block", "parcel"];
const DATE_LABELS: &[&str] = &["יום מכירה", "תאריך", "date"];
const PRICE_LABELS: &[&str] = &["מחיר", "סכום", "price", "amount"];
const PROPERTY_TYPE_LABELS: &[&str] = &["מהות", "סוג נכס", "type", "nature"];
const ROOMS_LABELS: &[&str] = &["חדרים", "room"];
const FLOOR_LABELS: &[&str] = &["קומה", "floor"];
const AREA_LABELS: &[&str] = &["שטח", "area"];
const TREND_LABELS: &[&str] = &["מגמ", "trend"];

/// First row value whose key contains one of the label fragments.
fn field<'a>(row: &'a RawRow, labels: &[&str]) -> Option<&'a str> {
    for label in labels {
        let needle = label.to_lowercase();
        if let Some((_, v)) = row.iter().find(|(k, _)| k.to_lowercase().contains(&needle)) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }
    None
}

fn text_field(row: &RawRow, labels: &[&str]) -> Option<String> {
    field(row, labels).map(String::from)
}

/// Normalize one raw row. `serial` is the 1-based fallback used when the
/// source row carries no serial of its own.
pub fn map_row_to_deal(row: &RawRow, serial: u32, city_name: &str, source_url: &str) -> Deal {
    Deal {
        city_name: city_name.to_string(),
        serial_no: serial,
        address: text_field(row, ADDRESS_LABELS),
        area_m2: field(row, AREA_LABELS).and_then(parse_number),
        deal_date: field(row, DATE_LABELS).and_then(parse_date_iso),
        price_nis: field(row, PRICE_LABELS).and_then(parse_number),
        block_parcel_subparcel: text_field(row, BLOCK_PARCEL_LABELS),
        property_type: text_field(row, PROPERTY_TYPE_LABELS),
        rooms: field(row, ROOMS_LABELS).and_then(parse_number),
        floor: text_field(row, FLOOR_LABELS),
        trend: text_field(row, TREND_LABELS),
        source_url: source_url.to_string(),
        raw: serde_json::to_value(row).unwrap_or(serde_json::Value::Null),
    }
}

// ---------------------------------------------------------------------------
// Page loop
// ---------------------------------------------------------------------------

pub struct PageExtractor {
    sources: Vec<Box<dyn RowSource>>,
    /// Pause before advancing, to avoid tripping source-side rate limits.
    inter_page_delay: Duration,
    /// Ceiling on waiting for the next page to render after the click.
    advance_timeout: Duration,
}

impl PageExtractor {
    pub fn new(inter_page_delay: Duration, advance_timeout: Duration) -> Self {
        Self {
            sources: vec![Box::new(ApiChannelSource), Box::new(DomTableSource)],
            inter_page_delay,
            advance_timeout,
        }
    }

    /// Extract pages `1..=max_pages`, persisting each page as it lands.
    /// Ends early, without error, on a rowless page or a missing next
    /// control.
    pub async fn extract_all(
        &self,
        session: &dyn DealSession,
        store: &dyn DealStore,
        request: &ScrapeRequest,
        max_pages: u32,
    ) -> Result<Vec<Deal>> {
        let mut all_deals: Vec<Deal> = Vec::new();

        for page in 1..=max_pages {
            let mut found = None;
            for source in &self.sources {
                if let Some(rows) = source.rows(session).await? {
                    found = Some((source.name(), rows));
                    break;
                }
            }
            let Some((channel, rows)) = found else {
                info!(page, "No rows extracted, stopping");
                break;
            };

            let url = session.current_url().await?;
            let deals: Vec<Deal> = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    map_row_to_deal(row, all_deals.len() as u32 + i as u32 + 1, &request.city_name, &url)
                })
                .collect();
            info!(page, channel, deals = deals.len(), "Extracted page");

            // Streaming commit: a failure on page N+1 never loses page N.
            store.insert_deals(&deals).await?;
            all_deals.extend(deals);

            if page == max_pages {
                break;
            }
            if !self.advance(session).await? {
                info!(page, "No next-page control, extraction exhausted");
                break;
            }
        }

        Ok(all_deals)
    }

    /// Click through to the next page. `Ok(false)` when no control exists.
    /// After the click, waits for either a freshly captured structured
    /// response or a change in the first row's text, bounded by the
    /// advance timeout.
    async fn advance(&self, session: &dyn DealSession) -> Result<bool> {
        let row_before = session.first_row_text().await?;

        let jitter = rand::rng().random_range(0..400);
        tokio::time::sleep(self.inter_page_delay + Duration::from_millis(jitter)).await;

        if !session.click_next().await? {
            return Ok(false);
        }

        let deadline = Instant::now() + self.advance_timeout;
        loop {
            if session.has_captured().await? {
                break;
            }
            if session.first_row_text().await? != row_before {
                break;
            }
            if Instant::now() >= deadline {
                // Let the next page's extraction decide; an unchanged page
                // yields duplicate-key skips, not corruption.
                break;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn normalizes_shekel_price_row() {
        let raw = row(&[("מחיר העסקה", "1,250,000 ₪")]);
        let deal = map_row_to_deal(&raw, 1, "תל אביב", "https://example.gov/?id=1");
        assert_eq!(deal.price_nis, Some(1_250_000.0));
        assert_eq!(deal.serial_no, 1);
        assert_eq!(deal.city_name, "תל אביב");
    }

    #[test]
    fn maps_full_hebrew_row() {
        let raw = row(&[
            ("כתובת", "דיזנגוף 100"),
            ("גוש חלקה תת-חלקה", "6213-84-5"),
            ("יום מכירה", "15/03/2023"),
            ("מחיר", "2,400,000"),
            ("מהות", "דירה"),
            ("חדרים", "3.5"),
            ("קומה", "4"),
            ("שטח", "87"),
            ("מגמת שינוי", "עלייה"),
        ]);
        let deal = map_row_to_deal(&raw, 7, "תל אביב", "https://example.gov/?id=1");
        assert_eq!(deal.address.as_deref(), Some("דיזנגוף 100"));
        assert_eq!(deal.block_parcel_subparcel.as_deref(), Some("6213-84-5"));
        assert_eq!(deal.deal_date.as_deref(), Some("2023-03-15"));
        assert_eq!(deal.price_nis, Some(2_400_000.0));
        assert_eq!(deal.property_type.as_deref(), Some("דירה"));
        assert_eq!(deal.rooms, Some(3.5));
        assert_eq!(deal.floor.as_deref(), Some("4"));
        assert_eq!(deal.area_m2, Some(87.0));
        assert_eq!(deal.trend.as_deref(), Some("עלייה"));
    }

    #[test]
    fn positional_row_keeps_raw_but_maps_nothing() {
        let raw = row(&[("col0", "דיזנגוף 100"), ("col1", "1,000,000")]);
        let deal = map_row_to_deal(&raw, 3, "תל אביב", "u");
        assert_eq!(deal.address, None);
        assert_eq!(deal.price_nis, None);
        assert_eq!(deal.serial_no, 3);
        assert_eq!(deal.raw["col1"], "1,000,000");
    }

    #[test]
    fn english_json_keys_map_too() {
        let raw = row(&[("DEALAMOUNT", "980000"), ("DEALDATE", "01/01/2023")]);
        let deal = map_row_to_deal(&raw, 1, "חיפה", "u");
        assert_eq!(deal.price_nis, Some(980_000.0));
        assert_eq!(deal.deal_date.as_deref(), Some("2023-01-01"));
    }

    #[test]
    fn unparseable_cells_stay_absent() {
        let raw = row(&[("מחיר", "לא צוין"), ("יום מכירה", "בקרוב")]);
        let deal = map_row_to_deal(&raw, 1, "עיר", "u");
        assert_eq!(deal.price_nis, None);
        assert_eq!(deal.deal_date, None);
    }
}

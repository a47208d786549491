//! Address resolution against the source's free-text search surface.
//!
//! Tries an ordered list of query variants; for each, prefers clicking a
//! matching suggestion and falls back to a direct submit. "Not found" is a
//! value (`Ok(None)`), never an error — a well-formed address with no match
//! is a legitimate outcome.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};
use url::Url;

use dealscope_common::{ResolvedAddress, ScrapeRequest};

use crate::browser::DealSession;

pub struct AddressResolver {
    /// How long to let suggestion candidates render after typing.
    suggestion_wait: Duration,
}

impl AddressResolver {
    pub fn new(suggestion_wait: Duration) -> Self {
        Self { suggestion_wait }
    }

    /// Ordered query variants; the first identifier found short-circuits.
    fn query_variants(request: &ScrapeRequest) -> Vec<String> {
        let city = request.city_name.trim();
        let street = request.street.trim();
        let house = request.house_number.trim();
        vec![
            format!("{street} {house} {city}"),
            format!("{city} {street} {house}"),
            format!("{street} {house}"),
        ]
    }

    pub async fn resolve(
        &self,
        session: &dyn DealSession,
        request: &ScrapeRequest,
    ) -> Result<Option<ResolvedAddress>> {
        let city = request.city_name.trim().to_lowercase();
        let street = request.street.trim().to_lowercase();
        let house = request.house_number.trim().to_string();

        for variant in Self::query_variants(request) {
            info!(query = %variant, "Trying search variant");
            session.open_search().await?;
            session.enter_query(&variant).await?;
            tokio::time::sleep(self.suggestion_wait).await;

            let candidates = session.suggestions().await?;
            debug!(count = candidates.len(), "Suggestions rendered");

            let matched = candidates.iter().position(|c| {
                let text = c.text.to_lowercase();
                text.contains(&street)
                    && c.text.contains(&house)
                    && (city.is_empty() || text.contains(&city))
            });

            if let Some(index) = matched {
                session.choose_suggestion(index).await?;
                let url = session.current_url().await?;
                if let Some(external_id) = external_id_from_url(&url) {
                    info!(external_id, "Resolved via suggestion");
                    return Ok(Some(ResolvedAddress { external_id }));
                }
                debug!(url, "Suggestion click yielded no identifier");
                continue;
            }

            // No candidate matched; submit the query as-is and inspect
            // where the source takes us.
            session.submit_query().await?;
            let url = session.current_url().await?;
            if let Some(external_id) = external_id_from_url(&url) {
                info!(external_id, "Resolved via direct submit");
                return Ok(Some(ResolvedAddress { external_id }));
            }
        }

        info!("All query variants exhausted without an identifier");
        Ok(None)
    }
}

/// Pull the opaque address identifier out of a navigation target.
/// The source embeds it either as a query parameter or a numeric path
/// segment.
pub fn external_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    for (key, value) in parsed.query_pairs() {
        if matches!(key.as_ref(), "id" | "addressId" | "objectId") && !value.is_empty() {
            return Some(value.into_owned());
        }
    }

    parsed
        .path_segments()?
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .next_back()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_from_query_parameter() {
        assert_eq!(
            external_id_from_url("https://example.gov/?view=address&id=65210036&page=deals"),
            Some("65210036".to_string())
        );
        assert_eq!(
            external_id_from_url("https://example.gov/deals?addressId=abc123"),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn id_from_numeric_path_segment() {
        assert_eq!(
            external_id_from_url("https://example.gov/address/65210036/deals"),
            Some("65210036".to_string())
        );
    }

    #[test]
    fn search_page_has_no_id() {
        assert_eq!(external_id_from_url("https://example.gov/"), None);
        assert_eq!(external_id_from_url("https://example.gov/search?q=foo"), None);
        assert_eq!(external_id_from_url("not a url"), None);
    }
}

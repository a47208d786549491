//! Market-trend extraction from a rendered detail page.
//!
//! One pass over the page's visible text (plus a structural card fallback
//! for the prestige score), built as an ordered list of independent rules.
//! Every rule is fallible and returns absence instead of an error; the
//! snapshot simply omits whatever did not match.

use regex::Regex;
use scraper::{Html, Selector};

use dealscope_common::normalize::parse_number;
use dealscope_common::TrendSnapshot;

// Marker tokens as the source renders them. Kept together so a source-side
// wording change is a one-block fix.
const YIELD_MARKER: &str = "תשואה";
const PRICE_INCREASE_MARKER: &str = r"עליית\s+מחירים";
const PRESTIGE_MARKER: &str = r"מדד\s+יוקרה";
const ROOMS_MARKER: &str = "חדרים";
const WEIGHTED_MARKER: &str = "משוקלל";
const QUARTER_NEIGHBORHOOD_MARKER: &str = r"בשכונת";
const QUARTER_CITY_MARKER: &str = r"בעיר";
const QUARTER_NATIONAL_MARKER: &str = "ארצי";

const NUM: &str = r"(\d[\d,.]*)";

/// Compose every rule over the page. An all-absent result is a valid,
/// empty snapshot the caller should not persist.
pub fn extract_trend_snapshot(text: &str, html: &str) -> TrendSnapshot {
    let mut snapshot = TrendSnapshot {
        rental_yield_percent: rental_yield(text),
        price_increase_percent: price_increase(text),
        prestige_score: None,
        prestige_max: None,
        median_prices_by_room_count: room_medians(text),
        weighted_median_price: weighted_median(text),
        quarter_neighborhood_name: None,
        quarter_neighborhood_price: None,
        quarter_city_price: None,
        quarter_national_price: None,
    };

    if let Some((score, max)) = prestige(text).or_else(|| prestige_from_cards(html)) {
        snapshot.prestige_score = Some(score);
        snapshot.prestige_max = Some(max);
    }

    if let Some((name, price)) = quarter_neighborhood(text) {
        snapshot.quarter_neighborhood_name = Some(name);
        snapshot.quarter_neighborhood_price = Some(price);
    }
    snapshot.quarter_city_price = quarter_single(text, QUARTER_CITY_MARKER);
    snapshot.quarter_national_price = quarter_single(text, QUARTER_NATIONAL_MARKER);

    snapshot
}

/// First numeric value immediately preceding the yield marker.
fn rental_yield(text: &str) -> Option<f64> {
    let re = Regex::new(&format!(r"{NUM}\s*%?\s*{YIELD_MARKER}")).expect("valid regex");
    parse_number(&re.captures(text)?[1])
}

/// First numeric value after the price-increase marker, sign preserved —
/// a negative value means a decline.
fn price_increase(text: &str) -> Option<f64> {
    let re = Regex::new(&format!(r"{PRICE_INCREASE_MARKER}[^\d-]*(-?)\s*{NUM}"))
        .expect("valid regex");
    let caps = re.captures(text)?;
    let value = parse_number(&caps[2])?;
    Some(if &caps[1] == "-" { -value } else { value })
}

/// Ordered fraction patterns: `score/max` before or after the prestige
/// marker; first match wins.
fn prestige(text: &str) -> Option<(f64, f64)> {
    let patterns = [
        format!(r"{NUM}\s*/\s*{NUM}\s*{PRESTIGE_MARKER}"),
        format!(r"{PRESTIGE_MARKER}\D*{NUM}\s*/\s*{NUM}"),
    ];
    for pattern in &patterns {
        let re = Regex::new(pattern).expect("valid regex");
        if let Some(caps) = re.captures(text) {
            if let (Some(score), Some(max)) = (parse_number(&caps[1]), parse_number(&caps[2])) {
                return Some((score, max));
            }
        }
    }
    None
}

/// Structural fallback: a card element whose text carries the prestige
/// keyword next to a fraction.
fn prestige_from_cards(html: &str) -> Option<(f64, f64)> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse("[class*='card'], [class*='Card']").expect("valid selector");
    let fraction = Regex::new(&format!(r"{NUM}\s*/\s*{NUM}")).expect("valid regex");

    for card in doc.select(&card_sel) {
        let text: String = card.text().collect::<String>();
        if !text.contains("יוקרה") {
            continue;
        }
        if let Some(caps) = fraction.captures(&text) {
            if let (Some(score), Some(max)) = (parse_number(&caps[1]), parse_number(&caps[2])) {
                return Some((score, max));
            }
        }
    }
    None
}

/// Repeated `<N> rooms: <value>` pairs into a room-count-keyed map.
fn room_medians(text: &str) -> std::collections::BTreeMap<String, f64> {
    let re = Regex::new(&format!(r"(\d[\d.]*)\s*{ROOMS_MARKER}:?\s*₪?\s*{NUM}"))
        .expect("valid regex");
    let mut map = std::collections::BTreeMap::new();
    for caps in re.captures_iter(text) {
        if let Some(price) = parse_number(&caps[2]) {
            map.entry(caps[1].to_string()).or_insert(price);
        }
    }
    map
}

fn weighted_median(text: &str) -> Option<f64> {
    let re = Regex::new(&format!(r"{WEIGHTED_MARKER}\D*{NUM}")).expect("valid regex");
    parse_number(&re.captures(text)?[1])
}

fn quarter_neighborhood(text: &str) -> Option<(String, f64)> {
    let re = Regex::new(&format!(r"{QUARTER_NEIGHBORHOOD_MARKER}\s+([^\s:]+)\D*{NUM}"))
        .expect("valid regex");
    let caps = re.captures(text)?;
    let price = parse_number(&caps[2])?;
    Some((caps[1].to_string(), price))
}

fn quarter_single(text: &str, marker: &str) -> Option<f64> {
    let re = Regex::new(&format!(r"{marker}\D*{NUM}")).expect("valid regex");
    parse_number(&re.captures(text)?[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_TEXT: &str = "\
        נתוני השכונה: 3.2% תשואה ממוצעת בשנה האחרונה.\n\
        עליית מחירים של 8.4% ברבעון האחרון.\n\
        מדד יוקרה: 7/10 ביחס לשכונות דומות.\n\
        מחיר חציוני לפי גודל: 3 חדרים: 2,150,000 ₪ 4 חדרים: 2,780,000 ₪ 5 חדרים: 3,500,000 ₪\n\
        מחיר משוקלל: 2,610,000 ₪\n\
        מחיר חציוני ברבעון בשכונת פלורנטין: 2,300,000 ₪ בעיר: 2,950,000 ₪ ממוצע ארצי: 1,870,000 ₪";

    #[test]
    fn extracts_full_snapshot() {
        let snap = extract_trend_snapshot(PAGE_TEXT, "");
        assert_eq!(snap.rental_yield_percent, Some(3.2));
        assert_eq!(snap.price_increase_percent, Some(8.4));
        assert_eq!(snap.prestige_score, Some(7.0));
        assert_eq!(snap.prestige_max, Some(10.0));
        assert_eq!(snap.median_prices_by_room_count.get("3"), Some(&2_150_000.0));
        assert_eq!(snap.median_prices_by_room_count.get("5"), Some(&3_500_000.0));
        assert_eq!(snap.weighted_median_price, Some(2_610_000.0));
        assert_eq!(snap.quarter_neighborhood_name.as_deref(), Some("פלורנטין"));
        assert_eq!(snap.quarter_neighborhood_price, Some(2_300_000.0));
        assert_eq!(snap.quarter_city_price, Some(2_950_000.0));
        assert_eq!(snap.quarter_national_price, Some(1_870_000.0));
        assert!(!snap.is_empty());
    }

    #[test]
    fn negative_price_movement_keeps_sign() {
        let text = "עליית מחירים של -2.5% השנה";
        let snap = extract_trend_snapshot(text, "");
        assert_eq!(snap.price_increase_percent, Some(-2.5));
    }

    #[test]
    fn prestige_fraction_before_marker() {
        let text = "דירוג 8/10 מדד יוקרה";
        let snap = extract_trend_snapshot(text, "");
        assert_eq!(snap.prestige_score, Some(8.0));
        assert_eq!(snap.prestige_max, Some(10.0));
    }

    #[test]
    fn prestige_card_fallback() {
        let html = r#"
            <div class="stat-card"><h3>מדד יוקרה</h3><span>6 / 10</span></div>"#;
        let snap = extract_trend_snapshot("אין נתונים בטקסט", html);
        assert_eq!(snap.prestige_score, Some(6.0));
        assert_eq!(snap.prestige_max, Some(10.0));
    }

    #[test]
    fn each_rule_tolerates_absence() {
        let snap = extract_trend_snapshot("עמוד ללא נתוני מגמה", "");
        assert!(snap.is_empty());
    }

    #[test]
    fn partial_page_yields_partial_snapshot() {
        let text = "4.1% תשואה ותו לא";
        let snap = extract_trend_snapshot(text, "");
        assert_eq!(snap.rental_yield_percent, Some(4.1));
        assert_eq!(snap.price_increase_percent, None);
        assert!(snap.median_prices_by_room_count.is_empty());
        assert!(!snap.is_empty());
    }
}

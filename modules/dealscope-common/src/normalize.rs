//! Value normalization for noisy, locale-formatted source text.
//!
//! Both parsers are total: malformed input yields `None`, never an error,
//! and absence propagates as absent fields on the normalized record.

use regex::Regex;

/// Parse a number out of noisy text ("1,250,000 ₪", "87.5 מ\"ר", "3.5").
///
/// Keeps digits and the first decimal point, drops everything else.
/// Returns `None` for empty or non-finite results.
pub fn parse_number(text: &str) -> Option<f64> {
    let mut cleaned = String::with_capacity(text.len());
    let mut seen_dot = false;
    for c in text.chars() {
        if c.is_ascii_digit() {
            cleaned.push(c);
        } else if c == '.' && !seen_dot {
            cleaned.push(c);
            seen_dot = true;
        }
    }
    if cleaned.is_empty() || cleaned == "." {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a `DD/MM/YYYY` date (also `-` or `.` separated) into zero-padded
/// ISO `YYYY-MM-DD`. Returns `None` when no date is present.
pub fn parse_date_iso(text: &str) -> Option<String> {
    let re = Regex::new(r"(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{4})").expect("valid regex");
    let caps = re.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: u32 = caps[3].parse().ok()?;
    if day == 0 || day > 31 || month == 0 || month > 12 {
        return None;
    }
    Some(format!("{year:04}-{month:02}-{day:02}"))
}

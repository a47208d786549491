use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MAX_PAGES_CAP;

// --- Scrape request ---

/// Immutable input to one scrape. All three address fields are required
/// and must be non-blank after trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub city_name: String,
    pub street: String,
    pub house_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

impl ScrapeRequest {
    /// Name of the first missing required field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.city_name.trim().is_empty() {
            Some("cityName")
        } else if self.street.trim().is_empty() {
            Some("street")
        } else if self.house_number.trim().is_empty() {
            Some("houseNumber")
        } else {
            None
        }
    }

    /// Page limit with the default cap applied. Requests above the cap are
    /// clamped rather than rejected.
    pub fn effective_max_pages(&self) -> u32 {
        self.max_pages.unwrap_or(MAX_PAGES_CAP).clamp(1, MAX_PAGES_CAP)
    }
}

// --- Job lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// One asynchronous scrape, tracked from submission to a terminal state.
/// Invariant: `result` is Some iff `status == Done`; `error` is Some iff
/// `status == Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<ScrapeOutcome>,
    pub error: Option<String>,
}

// --- Scrape pipeline types ---

/// Opaque key into the external source, produced by the resolver and
/// consumed within a single orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub external_id: String,
}

/// One transaction row as the source shaped it: label → raw text.
/// Header-keyed when the table header lines up with the cells, positional
/// (`col0`, `col1`, ...) otherwise.
pub type RawRow = BTreeMap<String, String>;

/// Canonical normalized transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub city_name: String,
    pub serial_no: u32,
    pub address: Option<String>,
    pub area_m2: Option<f64>,
    /// ISO `YYYY-MM-DD`, or None when the source cell did not parse.
    pub deal_date: Option<String>,
    pub price_nis: Option<f64>,
    pub block_parcel_subparcel: Option<String>,
    pub property_type: Option<String>,
    pub rooms: Option<f64>,
    pub floor: Option<String>,
    pub trend: Option<String>,
    pub source_url: String,
    /// Original RawRow, kept verbatim for forward compatibility.
    pub raw: serde_json::Value,
}

/// Per-address market indicators, extracted in one pass over the detail
/// page text. Every field is optional; an empty snapshot is not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSnapshot {
    pub rental_yield_percent: Option<f64>,
    pub price_increase_percent: Option<f64>,
    pub prestige_score: Option<f64>,
    pub prestige_max: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub median_prices_by_room_count: BTreeMap<String, f64>,
    pub weighted_median_price: Option<f64>,
    pub quarter_neighborhood_name: Option<String>,
    pub quarter_neighborhood_price: Option<f64>,
    pub quarter_city_price: Option<f64>,
    pub quarter_national_price: Option<f64>,
}

impl TrendSnapshot {
    pub fn is_empty(&self) -> bool {
        self.rental_yield_percent.is_none()
            && self.price_increase_percent.is_none()
            && self.prestige_score.is_none()
            && self.prestige_max.is_none()
            && self.median_prices_by_room_count.is_empty()
            && self.weighted_median_price.is_none()
            && self.quarter_neighborhood_price.is_none()
            && self.quarter_city_price.is_none()
            && self.quarter_national_price.is_none()
    }
}

/// Terminal payload of a job. `success: false` means the address did not
/// resolve — a well-formed request with no match, not a pipeline error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<String>,
    pub deals_scraped: u32,
    pub deals: Vec<Deal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_snapshot: Option<TrendSnapshot>,
    pub message: String,
}

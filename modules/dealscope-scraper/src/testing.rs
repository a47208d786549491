//! Test doubles for the scrape pipeline.
//!
//! - `ScriptedSession` (DealSession) — scripted suggestions, pages and
//!   captured responses; no browser, no network.
//! - `ScriptedSessionFactory` / `FailingSessionFactory` (SessionFactory).
//! - `MemoryDealStore` (DealStore) — stateful in-memory store with the
//!   same natural-key duplicate semantics as Postgres.
//!
//! Plus small fixture helpers for deals and table pages.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::warn;

use dealscope_common::{Deal, TrendSnapshot};

use crate::browser::{DealSession, SessionFactory, Suggestion};
use crate::store::DealStore;

// ---------------------------------------------------------------------------
// ScriptedSession
// ---------------------------------------------------------------------------

/// One scripted result page.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub captured: Option<serde_json::Value>,
    pub html: String,
    pub first_row: Option<String>,
}

impl ScriptedPage {
    /// Page served through the DOM channel only.
    pub fn dom(html: &str) -> Self {
        Self {
            captured: None,
            html: html.to_string(),
            first_row: None,
        }
    }

    /// Page served through the passive API channel.
    pub fn api(value: serde_json::Value) -> Self {
        Self {
            captured: Some(value),
            html: String::new(),
            first_row: None,
        }
    }

    pub fn with_first_row(mut self, text: &str) -> Self {
        self.first_row = Some(text.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    last_query: String,
    current_url: String,
    page_index: Option<usize>,
    buffer: Vec<serde_json::Value>,
}

/// Builder-style scripted session. Defaults: no suggestions, no pages,
/// nothing resolvable.
pub struct ScriptedSession {
    suggestions: Vec<Suggestion>,
    detail_url: Option<String>,
    submit_url: Option<String>,
    pages: Vec<ScriptedPage>,
    trend_text: String,
    latency: Option<Duration>,
    state: Mutex<ScriptedState>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            suggestions: Vec::new(),
            detail_url: None,
            submit_url: None,
            pages: Vec::new(),
            trend_text: String::new(),
            latency: None,
            state: Mutex::new(ScriptedState {
                current_url: "https://source.test/".to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn with_suggestions(mut self, texts: &[&str]) -> Self {
        self.suggestions = texts
            .iter()
            .map(|t| Suggestion {
                text: t.to_string(),
            })
            .collect();
        self
    }

    /// URL the session lands on after clicking a suggestion.
    pub fn with_detail_url(mut self, url: &str) -> Self {
        self.detail_url = Some(url.to_string());
        self
    }

    /// URL the session lands on after a direct submit.
    pub fn with_submit_url(mut self, url: &str) -> Self {
        self.submit_url = Some(url.to_string());
        self
    }

    pub fn with_pages(mut self, pages: Vec<ScriptedPage>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_trend_text(mut self, text: &str) -> Self {
        self.trend_text = text.to_string();
        self
    }

    /// Artificial delay on `open_search`, to hold a job in `running`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn enter_page(&self, index: usize, state: &mut ScriptedState) {
        state.page_index = Some(index);
        if let Some(value) = self.pages.get(index).and_then(|p| p.captured.clone()) {
            state.buffer.push(value);
        }
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DealSession for ScriptedSession {
    async fn open_search(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().expect("scripted state poisoned");
        state.current_url = "https://source.test/".to_string();
        state.page_index = None;
        Ok(())
    }

    async fn enter_query(&self, query: &str) -> Result<()> {
        self.state.lock().expect("scripted state poisoned").last_query = query.to_string();
        Ok(())
    }

    async fn suggestions(&self) -> Result<Vec<Suggestion>> {
        Ok(self.suggestions.clone())
    }

    async fn choose_suggestion(&self, index: usize) -> Result<()> {
        if index >= self.suggestions.len() {
            bail!("Scripted session has no suggestion {index}");
        }
        let mut state = self.state.lock().expect("scripted state poisoned");
        if let Some(url) = &self.detail_url {
            state.current_url = url.clone();
            self.enter_page(0, &mut state);
        }
        Ok(())
    }

    async fn submit_query(&self) -> Result<()> {
        let mut state = self.state.lock().expect("scripted state poisoned");
        if let Some(url) = &self.submit_url {
            state.current_url = url.clone();
            self.enter_page(0, &mut state);
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().expect("scripted state poisoned").current_url.clone())
    }

    async fn html(&self) -> Result<String> {
        let state = self.state.lock().expect("scripted state poisoned");
        Ok(state
            .page_index
            .and_then(|i| self.pages.get(i))
            .map(|p| p.html.clone())
            .unwrap_or_default())
    }

    async fn text(&self) -> Result<String> {
        Ok(self.trend_text.clone())
    }

    async fn has_captured(&self) -> Result<bool> {
        Ok(!self.state.lock().expect("scripted state poisoned").buffer.is_empty())
    }

    async fn take_captured(&self) -> Result<Vec<serde_json::Value>> {
        Ok(std::mem::take(
            &mut self.state.lock().expect("scripted state poisoned").buffer,
        ))
    }

    async fn click_next(&self) -> Result<bool> {
        let mut state = self.state.lock().expect("scripted state poisoned");
        let next = match state.page_index {
            Some(i) => i + 1,
            None => return Ok(false),
        };
        if next >= self.pages.len() {
            return Ok(false);
        }
        self.enter_page(next, &mut state);
        Ok(true)
    }

    async fn first_row_text(&self) -> Result<Option<String>> {
        let state = self.state.lock().expect("scripted state poisoned");
        Ok(state
            .page_index
            .and_then(|i| self.pages.get(i))
            .and_then(|p| p.first_row.clone()))
    }
}

// ---------------------------------------------------------------------------
// Session factories
// ---------------------------------------------------------------------------

pub struct ScriptedSessionFactory {
    build: Box<dyn Fn() -> ScriptedSession + Send + Sync>,
}

impl ScriptedSessionFactory {
    pub fn new(build: impl Fn() -> ScriptedSession + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessionFactory {
    async fn open(&self) -> Result<Box<dyn DealSession>> {
        Ok(Box::new((self.build)()))
    }
}

/// Factory whose `open` always fails — exercises the job error boundary.
pub struct FailingSessionFactory {
    pub message: String,
}

#[async_trait]
impl SessionFactory for FailingSessionFactory {
    async fn open(&self) -> Result<Box<dyn DealSession>> {
        Err(anyhow!("{}", self.message))
    }
}

// ---------------------------------------------------------------------------
// MemoryDealStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    deals: Vec<Deal>,
    keys: HashSet<String>,
    insert_batches: Vec<usize>,
    snapshots: HashMap<String, TrendSnapshot>,
}

/// In-memory `DealStore` with the Postgres natural-key semantics: rows
/// with a complete (block, date, price) key conflict; incomplete keys
/// always insert.
#[derive(Default)]
pub struct MemoryDealStore {
    inner: Mutex<MemoryState>,
    fail_inserts: bool,
    fail_snapshots: bool,
}

impl MemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert fails with a non-conflict store error.
    pub fn with_insert_failure(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    /// Snapshot upserts fail; deal inserts still work.
    pub fn with_snapshot_failure(mut self) -> Self {
        self.fail_snapshots = true;
        self
    }

    pub fn deals(&self) -> Vec<Deal> {
        self.inner.lock().expect("store poisoned").deals.clone()
    }

    /// Sizes of the non-empty insert calls, in order — asserts streaming
    /// page-by-page commits.
    pub fn insert_batches(&self) -> Vec<usize> {
        self.inner.lock().expect("store poisoned").insert_batches.clone()
    }

    pub fn snapshot(&self, address_id: &str) -> Option<TrendSnapshot> {
        self.inner
            .lock()
            .expect("store poisoned")
            .snapshots
            .get(address_id)
            .cloned()
    }
}

fn natural_key(deal: &Deal) -> Option<String> {
    Some(format!(
        "{}|{}|{}",
        deal.block_parcel_subparcel.as_deref()?,
        deal.deal_date.as_deref()?,
        deal.price_nis?,
    ))
}

#[async_trait]
impl DealStore for MemoryDealStore {
    async fn insert_deals(&self, deals: &[Deal]) -> Result<u32> {
        if deals.is_empty() {
            return Ok(0);
        }
        if self.fail_inserts {
            bail!("memory store: insert failure injected");
        }
        let mut state = self.inner.lock().expect("store poisoned");
        state.insert_batches.push(deals.len());
        let mut inserted = 0u32;
        for deal in deals {
            if let Some(key) = natural_key(deal) {
                if !state.keys.insert(key.clone()) {
                    warn!(key, "Duplicate deal skipped");
                    continue;
                }
            }
            state.deals.push(deal.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn upsert_trend_snapshot(
        &self,
        address_id: &str,
        snapshot: &TrendSnapshot,
    ) -> Result<()> {
        if self.fail_snapshots {
            bail!("memory store: snapshot failure injected");
        }
        self.inner
            .lock()
            .expect("store poisoned")
            .snapshots
            .insert(address_id.to_string(), snapshot.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A deal with a complete natural key, for duplicate-handling tests.
pub fn deal_fixture(serial: u32, block: &str, date: &str, price: f64) -> Deal {
    Deal {
        city_name: "תל אביב".to_string(),
        serial_no: serial,
        address: Some("דיזנגוף 100".to_string()),
        area_m2: Some(80.0),
        deal_date: Some(date.to_string()),
        price_nis: Some(price),
        block_parcel_subparcel: Some(block.to_string()),
        property_type: Some("דירה".to_string()),
        rooms: Some(3.0),
        floor: Some("2".to_string()),
        trend: None,
        source_url: "https://source.test/?id=1".to_string(),
        raw: serde_json::Value::Null,
    }
}

/// HTML for one result page: a header-keyed deal table with `rows` rows,
/// serials starting at `offset + 1`. Values are distinct per row so
/// natural keys never collide across pages.
pub fn table_page_html(rows: usize, offset: usize) -> String {
    let mut body = String::from(
        "<table><thead><tr>\
         <th>כתובת</th><th>גוש חלקה</th><th>יום מכירה</th><th>מחיר</th>\
         </tr></thead><tbody>",
    );
    for i in 0..rows {
        let n = offset + i + 1;
        body.push_str(&format!(
            "<tr><td>דיזנגוף {n}</td><td>6213-{n}-1</td>\
             <td>0{day}/03/2023</td><td>{price},000</td></tr>",
            day = (n % 9) + 1,
            price = 1000 + n,
        ));
    }
    body.push_str("</tbody></table>");
    body
}

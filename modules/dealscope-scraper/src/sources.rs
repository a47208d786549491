//! Row extraction channels.
//!
//! Two `RowSource` strategies, tried in priority order by the extractor:
//! the passive structured-response channel (ground truth when the source's
//! own frontend fetched the page data as JSON) and a DOM heuristic fallback
//! that picks the densest table on the rendered page.

use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use dealscope_common::RawRow;

use crate::browser::DealSession;

/// One way of obtaining the current page's rows. `Ok(None)` means this
/// channel has nothing for the page; the next strategy is consulted.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn rows(&self, session: &dyn DealSession) -> Result<Option<Vec<RawRow>>>;
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// API channel — passively captured structured responses
// ---------------------------------------------------------------------------

pub struct ApiChannelSource;

#[async_trait]
impl RowSource for ApiChannelSource {
    async fn rows(&self, session: &dyn DealSession) -> Result<Option<Vec<RawRow>>> {
        let captured = session.take_captured().await?;
        if captured.is_empty() {
            return Ok(None);
        }
        // Most recent response that actually carries rows wins.
        for value in captured.iter().rev() {
            let rows = rows_from_structured(value);
            if !rows.is_empty() {
                debug!(rows = rows.len(), "API channel produced rows");
                return Ok(Some(rows));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "api-channel"
    }
}

/// Find the first array of objects anywhere in a structured response and
/// flatten each object into a label → text row.
pub fn rows_from_structured(value: &serde_json::Value) -> Vec<RawRow> {
    fn find_object_array(value: &serde_json::Value, depth: u8) -> Option<&Vec<serde_json::Value>> {
        match value {
            serde_json::Value::Array(items)
                if !items.is_empty() && items.iter().all(|i| i.is_object()) =>
            {
                Some(items)
            }
            serde_json::Value::Object(map) if depth > 0 => {
                map.values().find_map(|v| find_object_array(v, depth - 1))
            }
            _ => None,
        }
    }

    let Some(items) = find_object_array(value, 4) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|obj| {
            let mut row = RawRow::new();
            for (key, v) in obj {
                let text = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Null => continue,
                    other => other.to_string(),
                };
                row.insert(key.clone(), text);
            }
            row
        })
        .collect()
}

// ---------------------------------------------------------------------------
// DOM fallback — densest table on the rendered page
// ---------------------------------------------------------------------------

pub struct DomTableSource;

#[async_trait]
impl RowSource for DomTableSource {
    async fn rows(&self, session: &dyn DealSession) -> Result<Option<Vec<RawRow>>> {
        let html = session.html().await?;
        let rows = best_table_rows(&html);
        if rows.is_empty() {
            return Ok(None);
        }
        debug!(rows = rows.len(), "DOM channel produced rows");
        Ok(Some(rows))
    }

    fn name(&self) -> &'static str {
        "dom-table"
    }
}

struct TableCandidate {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Extract rows from the table-like element with the greatest row count.
/// Header-keyed when the header count lines up with the per-row cell
/// count, positional (`col0`, `col1`, ...) otherwise.
pub fn best_table_rows(html: &str) -> Vec<RawRow> {
    let doc = Html::parse_document(html);

    let mut best: Option<TableCandidate> = None;
    for candidate in collect_tables(&doc).into_iter().chain(collect_role_grids(&doc)) {
        if best.as_ref().map_or(true, |b| candidate.rows.len() > b.rows.len()) {
            best = Some(candidate);
        }
    }

    let Some(TableCandidate { headers, rows }) = best else {
        return Vec::new();
    };

    let header_keyed =
        !headers.is_empty() && rows.first().map_or(false, |r| r.len() == headers.len());

    rows.into_iter()
        .map(|cells| {
            let mut row = RawRow::new();
            for (i, cell) in cells.into_iter().enumerate() {
                let label = match headers.get(i) {
                    Some(h) if header_keyed && !h.is_empty() => h.clone(),
                    _ => format!("col{i}"),
                };
                row.insert(label, cell);
            }
            row
        })
        .collect()
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_tables(doc: &Html) -> Vec<TableCandidate> {
    let table_sel = Selector::parse("table").expect("valid selector");
    let th_sel = Selector::parse("th").expect("valid selector");
    let row_sel = Selector::parse("tr").expect("valid selector");
    let cell_sel = Selector::parse("td").expect("valid selector");

    doc.select(&table_sel)
        .map(|table| {
            let headers: Vec<String> = table.select(&th_sel).map(element_text).collect();
            let rows: Vec<Vec<String>> = table
                .select(&row_sel)
                .filter_map(|tr| {
                    let cells: Vec<String> = tr.select(&cell_sel).map(element_text).collect();
                    if cells.is_empty() {
                        None // header row or decoration
                    } else {
                        Some(cells)
                    }
                })
                .collect();
            TableCandidate { headers, rows }
        })
        .collect()
}

fn collect_role_grids(doc: &Html) -> Vec<TableCandidate> {
    let grid_sel = Selector::parse("[role='table'], [role='grid']").expect("valid selector");
    let header_sel = Selector::parse("[role='columnheader']").expect("valid selector");
    let row_sel = Selector::parse("[role='row']").expect("valid selector");
    let cell_sel = Selector::parse("[role='cell'], [role='gridcell']").expect("valid selector");

    doc.select(&grid_sel)
        .map(|grid| {
            let headers: Vec<String> = grid.select(&header_sel).map(element_text).collect();
            let rows: Vec<Vec<String>> = grid
                .select(&row_sel)
                .filter_map(|r| {
                    let cells: Vec<String> = r.select(&cell_sel).map(element_text).collect();
                    if cells.is_empty() {
                        None
                    } else {
                        Some(cells)
                    }
                })
                .collect();
            TableCandidate { headers, rows }
        })
        .collect()
}

//! Browser session abstraction over the external, markup-only source.
//!
//! `DealSession` is the seam the resolver, extractor and trend pass all
//! work against; `ChromeSession` drives a real headless Chrome over CDP.
//! Tests use `testing::ScriptedSession` instead — no browser, no network.
//!
//! A session is scoped to exactly one orchestration run. Dropping it tears
//! the Chrome process down on every exit path, including errors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::browser::tab::ResponseHandler;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use dealscope_common::DealscopeError;

/// One rendered search suggestion, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub text: String,
}

/// Interactive session against the external source. All waiting and
/// rendering happens behind these calls; the pipeline above is pure.
#[async_trait]
pub trait DealSession: Send + Sync {
    /// Navigate to the search surface.
    async fn open_search(&self) -> Result<()>;

    /// Type a query into the search box, replacing any previous text.
    async fn enter_query(&self, query: &str) -> Result<()>;

    /// Suggestion candidates currently rendered, in document order.
    async fn suggestions(&self) -> Result<Vec<Suggestion>>;

    /// Click the suggestion at `index` and let navigation settle.
    async fn choose_suggestion(&self, index: usize) -> Result<()>;

    /// Submit the query directly (implicit "go"), bypassing suggestions.
    async fn submit_query(&self) -> Result<()>;

    /// URL currently displayed.
    async fn current_url(&self) -> Result<String>;

    /// Fully rendered HTML of the current page.
    async fn html(&self) -> Result<String>;

    /// Visible text content of the current page.
    async fn text(&self) -> Result<String>;

    /// True when the passive listener holds at least one structured
    /// response not yet consumed.
    async fn has_captured(&self) -> Result<bool>;

    /// Drain the passive listener's buffer: every structured response
    /// captured since the last call, oldest first.
    async fn take_captured(&self) -> Result<Vec<serde_json::Value>>;

    /// Click the next-page control. `Ok(false)` when the control is
    /// absent or not visible — normal end of data, not an error.
    async fn click_next(&self) -> Result<bool>;

    /// Text of the first visible data row, used to detect a page change.
    async fn first_row_text(&self) -> Result<Option<String>>;
}

/// Opens one session per scrape run.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn DealSession>>;
}

// ---------------------------------------------------------------------------
// ChromeSession
// ---------------------------------------------------------------------------

/// URL markers for the structured deal responses the source's own frontend
/// fetches. Responses matching any of these are buffered as the API channel.
const DEAL_RESPONSE_MARKERS: &[&str] = &["Deal", "deal"];

/// Candidate selectors tried in order; the source ships no stable ids.
const SEARCH_INPUT_SELECTORS: &[&str] =
    &["input[type='search']", "input[role='combobox']", "input[type='text']"];
const SUGGESTION_SELECTORS: &[&str] = &[
    "[role='listbox'] [role='option']",
    "ul[class*='suggest'] li",
    "[class*='autocomplete'] li",
];
const NEXT_CONTROL_SELECTORS: &[&str] = &[
    "button[aria-label*='הבא']",
    "a[title*='הבא']",
    "[class*='pagination'] button[class*='next']",
    "a[class*='next']",
    "button[class*='next']",
];
const FIRST_ROW_SELECTORS: &[&str] =
    &["table tbody tr", "[role='table'] [role='row']", "[class*='tableRow']"];

pub struct ChromeSession {
    // Keeps the Chrome process alive for the session's lifetime.
    #[allow(dead_code)]
    browser: Browser,
    tab: Arc<Tab>,
    captured: Arc<Mutex<Vec<serde_json::Value>>>,
    search_url: String,
}

impl ChromeSession {
    pub fn open(search_url: &str, navigation_timeout: Duration) -> Result<Self> {
        info!("Launching headless Chrome");
        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .context("Failed to build Chrome launch options")?;
        let browser = Browser::new(options)
            .map_err(|e| DealscopeError::Browser(format!("Failed to launch Chrome: {e}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| DealscopeError::Browser(format!("Failed to open tab: {e}")))?;
        tab.set_default_timeout(navigation_timeout);

        let captured: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let buffer = captured.clone();
        let handler: ResponseHandler = Box::new(move |params, fetch_body| {
            let url = params.response.url.clone();
            if !DEAL_RESPONSE_MARKERS.iter().any(|m| url.contains(m)) {
                return;
            }
            match fetch_body() {
                Ok(body) if !body.base_64_encoded => {
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body.body) {
                        debug!(url, "Captured structured deal response");
                        buffer.lock().expect("capture buffer poisoned").push(value);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(url, error = %e, "Failed to fetch captured response body"),
            }
        });
        tab.register_response_handling("deal-capture", handler)
            .map_err(|e| DealscopeError::Browser(format!("Failed to register capture: {e}")))?;

        Ok(Self {
            browser,
            tab,
            captured,
            search_url: search_url.to_string(),
        })
    }

    /// Run a blocking CDP call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .context("Browser task panicked")?
    }

    /// Evaluate a JS expression and return its JSON value.
    async fn eval(&self, expr: String) -> Result<Option<serde_json::Value>> {
        self.blocking(move |tab| {
            let result = tab.evaluate(&expr, false).context("JS evaluation failed")?;
            Ok(result.value)
        })
        .await
    }

    fn selector_array_js(selectors: &[&str]) -> String {
        let quoted: Vec<String> = selectors
            .iter()
            .map(|s| serde_json::to_string(s).expect("selector serializes"))
            .collect();
        format!("[{}]", quoted.join(","))
    }
}

#[async_trait]
impl DealSession for ChromeSession {
    async fn open_search(&self) -> Result<()> {
        let url = self.search_url.clone();
        self.blocking(move |tab| {
            tab.navigate_to(&url).context("Navigation failed")?;
            tab.wait_until_navigated().context("Navigation did not settle")?;
            Ok(())
        })
        .await
    }

    async fn enter_query(&self, query: &str) -> Result<()> {
        let expr = format!(
            r#"(() => {{
                const sels = {sels};
                for (const sel of sels) {{
                    const el = document.querySelector(sel);
                    if (el && el.offsetParent !== null) {{
                        el.focus();
                        const setter = Object.getOwnPropertyDescriptor(
                            window.HTMLInputElement.prototype, 'value').set;
                        setter.call(el, {query});
                        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            sels = Self::selector_array_js(SEARCH_INPUT_SELECTORS),
            query = serde_json::to_string(query).expect("query serializes"),
        );
        match self.eval(expr).await? {
            Some(serde_json::Value::Bool(true)) => Ok(()),
            _ => anyhow::bail!("Search input not found on page"),
        }
    }

    async fn suggestions(&self) -> Result<Vec<Suggestion>> {
        let expr = format!(
            r#"(() => {{
                const sels = {sels};
                for (const sel of sels) {{
                    const els = Array.from(document.querySelectorAll(sel))
                        .filter(e => e.offsetParent !== null);
                    if (els.length) {{
                        return JSON.stringify(els.map(e => e.textContent.trim()));
                    }}
                }}
                return "[]";
            }})()"#,
            sels = Self::selector_array_js(SUGGESTION_SELECTORS),
        );
        let raw = match self.eval(expr).await? {
            Some(serde_json::Value::String(s)) => s,
            _ => return Ok(Vec::new()),
        };
        let texts: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
        Ok(texts.into_iter().map(|text| Suggestion { text }).collect())
    }

    async fn choose_suggestion(&self, index: usize) -> Result<()> {
        let expr = format!(
            r#"(() => {{
                const sels = {sels};
                for (const sel of sels) {{
                    const els = Array.from(document.querySelectorAll(sel))
                        .filter(e => e.offsetParent !== null);
                    if (els.length > {index}) {{ els[{index}].click(); return true; }}
                }}
                return false;
            }})()"#,
            sels = Self::selector_array_js(SUGGESTION_SELECTORS),
            index = index,
        );
        match self.eval(expr).await? {
            Some(serde_json::Value::Bool(true)) => {}
            _ => anyhow::bail!("Suggestion {index} not present"),
        }
        // SPA navigation may or may not trigger a document load.
        self.blocking(|tab| {
            let _ = tab.wait_until_navigated();
            Ok(())
        })
        .await?;
        tokio::time::sleep(Duration::from_millis(800)).await;
        Ok(())
    }

    async fn submit_query(&self) -> Result<()> {
        self.blocking(|tab| {
            tab.press_key("Enter").context("Failed to submit query")?;
            let _ = tab.wait_until_navigated();
            Ok(())
        })
        .await?;
        tokio::time::sleep(Duration::from_millis(800)).await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn html(&self) -> Result<String> {
        match self.eval("document.documentElement.outerHTML".to_string()).await? {
            Some(serde_json::Value::String(s)) => Ok(s),
            _ => Ok(String::new()),
        }
    }

    async fn text(&self) -> Result<String> {
        match self.eval("document.body ? document.body.innerText : ''".to_string()).await? {
            Some(serde_json::Value::String(s)) => Ok(s),
            _ => Ok(String::new()),
        }
    }

    async fn has_captured(&self) -> Result<bool> {
        Ok(!self.captured.lock().expect("capture buffer poisoned").is_empty())
    }

    async fn take_captured(&self) -> Result<Vec<serde_json::Value>> {
        Ok(std::mem::take(
            &mut *self.captured.lock().expect("capture buffer poisoned"),
        ))
    }

    async fn click_next(&self) -> Result<bool> {
        let expr = format!(
            r#"(() => {{
                const sels = {sels};
                for (const sel of sels) {{
                    const el = document.querySelector(sel);
                    if (el && el.offsetParent !== null && !el.disabled) {{
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            sels = Self::selector_array_js(NEXT_CONTROL_SELECTORS),
        );
        Ok(matches!(self.eval(expr).await?, Some(serde_json::Value::Bool(true))))
    }

    async fn first_row_text(&self) -> Result<Option<String>> {
        let expr = format!(
            r#"(() => {{
                const sels = {sels};
                for (const sel of sels) {{
                    const el = document.querySelector(sel);
                    if (el) return el.textContent.trim();
                }}
                return null;
            }})()"#,
            sels = Self::selector_array_js(FIRST_ROW_SELECTORS),
        );
        match self.eval(expr).await? {
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            _ => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// ChromeSessionFactory
// ---------------------------------------------------------------------------

pub struct ChromeSessionFactory {
    search_url: String,
    navigation_timeout: Duration,
}

impl ChromeSessionFactory {
    pub fn new(search_url: &str, navigation_timeout: Duration) -> Self {
        Self {
            search_url: search_url.to_string(),
            navigation_timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self) -> Result<Box<dyn DealSession>> {
        let search_url = self.search_url.clone();
        let timeout = self.navigation_timeout;
        let session = tokio::task::spawn_blocking(move || ChromeSession::open(&search_url, timeout))
            .await
            .context("Browser launch task panicked")??;
        Ok(Box::new(session))
    }
}

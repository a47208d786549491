use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // External source
    pub search_url: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Scraping knobs
    pub navigation_timeout_secs: u64,
    pub inter_page_delay_ms: u64,
    pub suggestion_wait_ms: u64,
}

/// Hard cap on pages per scrape; also the default when the request omits it.
pub const MAX_PAGES_CAP: u32 = 50;

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            search_url: env::var("DEALSCOPE_SEARCH_URL")
                .unwrap_or_else(|_| "https://www.nadlan.gov.il/".to_string()),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
            navigation_timeout_secs: env::var("NAVIGATION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .expect("NAVIGATION_TIMEOUT_SECS must be a number"),
            inter_page_delay_ms: env::var("INTER_PAGE_DELAY_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()
                .expect("INTER_PAGE_DELAY_MS must be a number"),
            suggestion_wait_ms: env::var("SUGGESTION_WAIT_MS")
                .unwrap_or_else(|_| "1200".to_string())
                .parse()
                .expect("SUGGESTION_WAIT_MS must be a number"),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dealscope_api::{router, AppState, JobRegistry};
use dealscope_common::Config;
use dealscope_scraper::browser::ChromeSessionFactory;
use dealscope_scraper::store::PgDealStore;
use dealscope_scraper::{ScrapeOptions, Scraper};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dealscope=info".parse()?))
        .init();

    let config = Config::from_env();

    let store = PgDealStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;

    let sessions = ChromeSessionFactory::new(
        &config.search_url,
        Duration::from_secs(config.navigation_timeout_secs),
    );
    let scraper = Scraper::new(
        Arc::new(sessions),
        Arc::new(store),
        ScrapeOptions::from_config(&config),
    );

    let state = Arc::new(AppState {
        registry: JobRegistry::new(),
        scraper: Arc::new(scraper),
    });

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("Dealscope API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

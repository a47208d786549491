pub mod browser;
pub mod extractor;
pub mod orchestrator;
pub mod resolver;
pub mod sources;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod trends;

pub use orchestrator::{ScrapeOptions, Scraper};

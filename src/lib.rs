//! Crawl a list of pages in a headless browser, capture the runtime errors
//! they emit and group identical errors across the whole crawl.

pub mod browser;
pub mod cli;
pub mod crawler;
pub mod error;
pub mod storage;
pub mod utils;

pub use crawler::{CrawlState, CrawlerController, PageResult, Summary};
pub use error::BrowserError;

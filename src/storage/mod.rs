pub mod report;
pub mod urls;

// Re-export common types
pub use report::{CrawlReport, ErrorEntry};
pub use urls::read_url_file;

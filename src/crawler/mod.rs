pub mod aggregator;
pub mod classifier;
pub mod controller;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod signature;
pub mod task;

// Re-export common types
pub use aggregator::{Aggregator, CrawlState, ErrorGroup, Summary};
pub use classifier::Classifier;
pub use controller::CrawlerController;
pub use runner::{PageTaskRunner, RunnerSettings};
pub use scheduler::BatchScheduler;
pub use session::{SessionManager, SessionState, SessionSummary};
pub use task::{DiagnosticKind, DiagnosticRecord, PageResult, UrlTask};

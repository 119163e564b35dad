use std::time::Duration;

use tracing::{debug, info};

use crate::browser::{BlockingPolicy, BrowserLauncher};
use crate::cli::config::CrawlerConfig;
use crate::crawler::aggregator::{Aggregator, CrawlState};
use crate::crawler::classifier::Classifier;
use crate::crawler::runner::{PageTaskRunner, RunnerSettings};
use crate::crawler::scheduler::BatchScheduler;
use crate::crawler::session::SessionManager;
use crate::crawler::task::UrlTask;

/// Runs a whole crawl: URL list in, crawl state out
pub struct CrawlerController {
    launcher: Box<dyn BrowserLauncher>,
    scheduler: BatchScheduler,
    session_size: usize,
    session_cooldown: Duration,
}

impl CrawlerController {
    /// Create a new crawler controller with the given configuration
    pub fn new(config: &CrawlerConfig, launcher: Box<dyn BrowserLauncher>) -> Self {
        let runner = PageTaskRunner::new(
            RunnerSettings::from(&config.crawl),
            Classifier::new(&config.classifier),
            BlockingPolicy::from_settings(&config.blocking),
        );
        let scheduler = BatchScheduler::new(
            runner,
            config.crawl.max_concurrent,
            config.crawl.batch_cooldown(),
        );

        Self {
            launcher,
            scheduler,
            session_size: config.crawl.session_size.max(1),
            session_cooldown: config.crawl.session_cooldown(),
        }
    }

    /// Crawl every task and return the aggregated state.
    ///
    /// Each call starts from an empty state. Page and session failures end up
    /// in the returned state rather than as errors.
    pub async fn run(&self, tasks: &[UrlTask]) -> CrawlState {
        let mut aggregator = Aggregator::new();
        let sessions = tasks.len().div_ceil(self.session_size);

        info!(
            "Crawling {} URLs in {} session(s), {} pages per batch",
            tasks.len(),
            sessions,
            self.scheduler.max_concurrent()
        );

        for (index, chunk) in tasks.chunks(self.session_size).enumerate() {
            if index > 0 {
                debug!("Cooling down {:?} before next session", self.session_cooldown);
                tokio::time::sleep(self.session_cooldown).await;
            }

            let session = SessionManager::new(index + 1, self.launcher.as_ref(), &self.scheduler);
            let outcome = session.run(chunk).await;

            for result in outcome.results {
                aggregator.ingest(result);
            }
            aggregator.record_session(outcome.summary);

            let summary = aggregator.state().summary();
            info!(
                "Progress: {}/{} URLs scanned, {} unique errors so far",
                summary.total_scanned,
                tasks.len(),
                summary.unique_signatures
            );
        }

        let state = aggregator.finish();
        let summary = state.summary();
        info!(
            "Crawl finished: {} scanned, {} with errors, {} failed, {} diagnostics, {} unique",
            summary.total_scanned,
            summary.pages_with_diagnostics,
            summary.pages_failed,
            summary.total_diagnostics,
            summary.unique_signatures
        );
        state
    }
}

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::browser::BrowserInstance;
use crate::crawler::runner::PageTaskRunner;
use crate::crawler::task::{PageResult, UrlTask};
use crate::error::BrowserError;

/// Results of a session chunk, and why it stopped early if it did
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub results: Vec<PageResult>,
    pub interrupted: Option<BrowserError>,
}

/// Splits a chunk into fixed-width concurrent batches
pub struct BatchScheduler {
    runner: PageTaskRunner,
    max_concurrent: usize,
    cooldown: Duration,
}

impl BatchScheduler {
    pub fn new(runner: PageTaskRunner, max_concurrent: usize, cooldown: Duration) -> Self {
        Self {
            runner,
            max_concurrent: max_concurrent.max(1),
            cooldown,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every URL of `urls` on `browser`, one batch at a time.
    ///
    /// A batch only finishes when all of its tasks have settled. Batches run
    /// in order; within a batch results arrive in completion order. If the
    /// browser is found disconnected between batches the rest of the chunk
    /// is left unprocessed.
    pub async fn run_chunk(&self, browser: &dyn BrowserInstance, urls: &[UrlTask]) -> ChunkOutcome {
        let mut outcome = ChunkOutcome {
            results: Vec::with_capacity(urls.len()),
            interrupted: None,
        };
        let total_batches = urls.len().div_ceil(self.max_concurrent);

        for (index, batch) in urls.chunks(self.max_concurrent).enumerate() {
            if index > 0 {
                debug!("Cooling down {:?} before next batch", self.cooldown);
                tokio::time::sleep(self.cooldown).await;
            }

            if !browser.is_connected() {
                let skipped = urls.len() - outcome.results.len();
                warn!(
                    "Browser lost before batch {}/{}; leaving {} URLs unprocessed",
                    index + 1,
                    total_batches,
                    skipped
                );
                outcome.interrupted = Some(BrowserError::Disconnected(format!(
                    "browser lost before batch {} of {}",
                    index + 1,
                    total_batches
                )));
                break;
            }

            info!("Batch {}/{}: scanning {} URLs", index + 1, total_batches, batch.len());
            let results = self.run_batch(browser, batch).await;
            let failed = results.iter().filter(|r| !r.success).count();
            info!(
                "Batch {}/{} done: {} ok, {} failed",
                index + 1,
                total_batches,
                results.len() - failed,
                failed
            );
            outcome.results.extend(results);
        }

        outcome
    }

    /// Run one batch concurrently and wait for all of it
    async fn run_batch(&self, browser: &dyn BrowserInstance, batch: &[UrlTask]) -> Vec<PageResult> {
        let mut pending: FuturesUnordered<_> = batch
            .iter()
            .map(|task| self.runner.process(browser, task))
            .collect();

        let mut results = Vec::with_capacity(batch.len());
        while let Some(result) = pending.next().await {
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{Outcome, ScriptedLauncher};
    use crate::browser::{BlockingPolicy, BrowserLauncher};
    use crate::cli::config::ClassifierSettings;
    use crate::crawler::classifier::Classifier;
    use crate::crawler::runner::RunnerSettings;
    use tokio::time::Instant;

    fn scheduler(max_concurrent: usize) -> BatchScheduler {
        let runner = PageTaskRunner::new(
            RunnerSettings {
                navigation_timeout: Duration::from_secs(5),
                max_retries: 1,
                retry_base_delay: Duration::from_millis(100),
                settle_delay: Duration::from_millis(50),
            },
            Classifier::new(&ClassifierSettings::default()),
            BlockingPolicy::default(),
        );
        BatchScheduler::new(runner, max_concurrent, Duration::from_secs(1))
    }

    fn tasks(n: usize) -> Vec<UrlTask> {
        (0..n)
            .map(|i| UrlTask::new(format!("https://example.com/{}", i), i))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_batch_width() {
        let launcher = ScriptedLauncher::new();
        let browser = launcher.launch().await.unwrap();

        let outcome = scheduler(3).run_chunk(browser.as_ref(), &tasks(8)).await;

        assert_eq!(outcome.results.len(), 8);
        assert!(outcome.interrupted.is_none());
        launcher.with_stats(|s| {
            assert_eq!(s.max_pages_open, 3);
            assert_eq!(s.pages_open, 0);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn batches_keep_order_and_failures_do_not_abort_siblings() {
        let urls = tasks(4);
        let launcher = ScriptedLauncher::new()
            .script(&urls[0].url, vec![Outcome::Hang])
            .script(&urls[1].url, vec![Outcome::slow(Duration::from_millis(500))]);
        let browser = launcher.launch().await.unwrap();

        let outcome = scheduler(2).run_chunk(browser.as_ref(), &urls).await;

        let first_batch: Vec<&str> = outcome.results[..2].iter().map(|r| r.url.as_str()).collect();
        assert!(first_batch.contains(&urls[0].url.as_str()));
        assert!(first_batch.contains(&urls[1].url.as_str()));
        // the fast sibling finishes first
        assert_eq!(outcome.results[0].url, urls[1].url);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[2..].iter().all(|r| r.success));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_only_between_batches() {
        let launcher = ScriptedLauncher::new();
        let browser = launcher.launch().await.unwrap();
        let started = Instant::now();

        scheduler(2).run_chunk(browser.as_ref(), &tasks(4)).await;

        // two batches of (10ms load + 50ms settle) and a single 1s cooldown
        assert_eq!(started.elapsed(), Duration::from_millis(1120));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_browser_stops_the_chunk() {
        let launcher = ScriptedLauncher::new().disconnect_launch(1);
        let browser = launcher.launch().await.unwrap();

        let outcome = scheduler(2).run_chunk(browser.as_ref(), &tasks(5)).await;

        assert_eq!(outcome.results.len(), 2);
        assert!(matches!(outcome.interrupted, Some(BrowserError::Disconnected(_))));
    }

    #[tokio::test]
    async fn empty_chunk_is_a_no_op() {
        let launcher = ScriptedLauncher::new();
        let browser = launcher.launch().await.unwrap();

        let outcome = scheduler(2).run_chunk(browser.as_ref(), &[]).await;

        assert!(outcome.results.is_empty());
        launcher.with_stats(|s| assert_eq!(s.pages_per_instance, vec![0]));
    }
}

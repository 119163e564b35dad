use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{navigate_with_timeout, BlockingPolicy, BrowserInstance};
use crate::cli::config::CrawlSettings;
use crate::crawler::classifier::Classifier;
use crate::crawler::task::{DiagnosticRecord, PageResult, UrlTask};
use crate::error::BrowserError;

/// Retry policy and timings for one page
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub navigation_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub settle_delay: Duration,
}

impl From<&CrawlSettings> for RunnerSettings {
    fn from(settings: &CrawlSettings) -> Self {
        Self {
            navigation_timeout: settings.navigation_timeout(),
            max_retries: settings.max_retries,
            retry_base_delay: settings.retry_base_delay(),
            settle_delay: settings.settle_delay(),
        }
    }
}

/// Per-URL attempt state
enum Attempt {
    /// Running attempt n (1-based)
    Attempting(u32),
    /// Attempt n failed and another is allowed
    RetryPending { failed: u32, error: BrowserError },
    Success(PageResult),
    Exhausted { attempts: u32, error: BrowserError },
}

/// Drives a single URL through load, capture and retry
pub struct PageTaskRunner {
    settings: RunnerSettings,
    classifier: Classifier,
    policy: BlockingPolicy,
}

impl PageTaskRunner {
    pub fn new(settings: RunnerSettings, classifier: Classifier, policy: BlockingPolicy) -> Self {
        Self { settings, classifier, policy }
    }

    /// Scan `task` on `browser`. Always produces exactly one result.
    pub async fn process(&self, browser: &dyn BrowserInstance, task: &UrlTask) -> PageResult {
        let mut state = Attempt::Attempting(1);

        loop {
            state = match state {
                Attempt::Attempting(n) => match self.attempt(browser, &task.url).await {
                    Ok(diagnostics) => Attempt::Success(PageResult::succeeded(&task.url, diagnostics, n)),
                    Err(error) if error.is_policy_abort() => {
                        info!("{} (counted as a clean scan)", error);
                        Attempt::Success(
                            PageResult::succeeded(&task.url, Vec::new(), n).with_notice(error.to_string()),
                        )
                    }
                    Err(error) if error.is_retryable() && n <= self.settings.max_retries => {
                        Attempt::RetryPending { failed: n, error }
                    }
                    Err(error) => Attempt::Exhausted { attempts: n, error },
                },
                Attempt::RetryPending { failed, error } => {
                    let delay = self.settings.retry_base_delay * failed;
                    warn!(
                        "Attempt {} for {} failed: {}. Retrying in {:?}",
                        failed, task.url, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    Attempt::Attempting(failed + 1)
                }
                Attempt::Success(result) => {
                    debug!(
                        "Scanned {} with {} diagnostics after {} attempt(s)",
                        result.url,
                        result.diagnostics.len(),
                        result.attempts
                    );
                    return result;
                }
                Attempt::Exhausted { attempts, error } => {
                    warn!("Giving up on {} after {} attempts: {}", task.url, attempts, error);
                    return PageResult::failed(&task.url, error.to_string(), attempts);
                }
            };
        }
    }

    /// One attempt: open, navigate, settle, capture, close.
    ///
    /// The page is closed on every path once it has been opened. Each attempt
    /// starts with no diagnostics; nothing carries over from a failed one.
    async fn attempt(
        &self,
        browser: &dyn BrowserInstance,
        url: &str,
    ) -> Result<Vec<DiagnosticRecord>, BrowserError> {
        let mut page = browser.open_page(&self.policy).await?;

        let loaded = match navigate_with_timeout(page.as_mut(), url, self.settings.navigation_timeout).await {
            Ok(()) => {
                tokio::time::sleep(self.settings.settle_delay).await;
                Ok(self.classifier.classify_all(&page.drain_events()))
            }
            Err(e) => Err(e),
        };

        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", url, e);
        }

        loaded
    }
}

use std::fmt;

use serde::{Serialize, Deserialize};
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserInstance, BrowserLauncher};
use crate::crawler::scheduler::BatchScheduler;
use crate::crawler::task::{PageResult, UrlTask};

/// Lifecycle of one browser instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Launching => "launching",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What happened in a session, for the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: usize,
    pub urls_assigned: usize,
    pub urls_processed: usize,
    /// Set when the session ended early
    pub error: Option<String>,
}

/// Results of one session
#[derive(Debug)]
pub struct SessionOutcome {
    pub results: Vec<PageResult>,
    pub summary: SessionSummary,
}

/// Owns one browser instance for one chunk of URLs
pub struct SessionManager<'a> {
    id: usize,
    launcher: &'a dyn BrowserLauncher,
    scheduler: &'a BatchScheduler,
    state: SessionState,
}

impl<'a> SessionManager<'a> {
    pub fn new(id: usize, launcher: &'a dyn BrowserLauncher, scheduler: &'a BatchScheduler) -> Self {
        Self {
            id,
            launcher,
            scheduler,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    /// Launch a fresh browser, scan `chunk` on it, then close it.
    ///
    /// The browser is closed on every path once launched. A session that
    /// cannot launch, or whose browser dies, reports the error in its summary
    /// and returns whatever it finished.
    pub async fn run(mut self, chunk: &[UrlTask]) -> SessionOutcome {
        let mut summary = SessionSummary {
            id: self.id,
            urls_assigned: chunk.len(),
            urls_processed: 0,
            error: None,
        };

        self.transition(SessionState::Launching);
        let mut browser = match self.launcher.launch().await {
            Ok(browser) => browser,
            Err(e) => {
                error!("Session {} could not start: {}", self.id, e);
                self.transition(SessionState::Closed);
                summary.error = Some(e.to_string());
                return SessionOutcome { results: Vec::new(), summary };
            }
        };

        self.transition(SessionState::Active);
        info!("Session {} started with {} URLs", self.id, chunk.len());
        let outcome = self.scheduler.run_chunk(browser.as_ref(), chunk).await;

        // run_chunk only returns once every task of its last batch settled
        self.transition(SessionState::Draining);
        if let Some(e) = &outcome.interrupted {
            warn!("Session {} ended early: {}", self.id, e);
            summary.error = Some(e.to_string());
        }

        self.shutdown(browser.as_mut()).await;

        summary.urls_processed = outcome.results.len();
        info!(
            "Session {} finished: {}/{} URLs processed",
            self.id, summary.urls_processed, summary.urls_assigned
        );

        SessionOutcome { results: outcome.results, summary }
    }

    async fn shutdown(&mut self, browser: &mut dyn BrowserInstance) {
        if let Err(e) = browser.close().await {
            warn!("Session {}: error closing browser: {}", self.id, e);
        }
        self.transition(SessionState::Closed);
    }
}

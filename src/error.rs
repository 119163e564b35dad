use std::time::Duration;

use thiserror::Error;

/// Errors raised by the browser-driving layer.
///
/// The page runner decides what to do with a failed attempt from the variant
/// alone: policy aborts become clean results, everything else is retried.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    /// The browser process could not be started or connected to.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// A new page (tab) could not be opened on a running browser.
    #[error("failed to open page: {0}")]
    PageCreation(String),

    /// Navigation did not complete before the deadline.
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    /// Navigation failed (DNS, connection reset, certificate, ...).
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// The primary document was aborted by our own resource-blocking policy.
    #[error("navigation to {url} aborted by blocking policy ({rule})")]
    BlockedByPolicy { url: String, rule: String },

    /// The browser went away while the page was in use.
    #[error("browser disconnected: {0}")]
    Disconnected(String),

    /// A DevTools command failed or returned something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    pub fn is_policy_abort(&self) -> bool {
        matches!(self, BrowserError::BlockedByPolicy { .. })
    }

    /// Whether the page runner should spend a retry on this failure.
    pub fn is_retryable(&self) -> bool {
        !self.is_policy_abort()
    }
}

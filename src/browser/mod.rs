pub mod blocking;
pub mod chrome;
pub mod stealth;
#[cfg(test)]
pub mod testing;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrowserError;

// Re-export common types
pub use blocking::{BlockRule, BlockingPolicy};
pub use chrome::ChromeLauncher;
pub use stealth::LaunchProfile;

/// Severity of a console message as reported by the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleLevel {
    Error,
    Warning,
    Info,
    Log,
    Debug,
    Other(String),
}

impl ConsoleLevel {
    pub fn parse(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "error" | "assert" => ConsoleLevel::Error,
            "warning" | "warn" => ConsoleLevel::Warning,
            "info" => ConsoleLevel::Info,
            "log" | "verbose" => ConsoleLevel::Log,
            "debug" => ConsoleLevel::Debug,
            other => ConsoleLevel::Other(other.to_string()),
        }
    }
}

/// A lifecycle event emitted by a page while it loads.
///
/// Fields are optional because the browser does not always fill them in;
/// the classifier decides what is usable.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Console {
        level: ConsoleLevel,
        text: Option<String>,
        url: Option<String>,
        line: Option<i64>,
    },
    PageError {
        message: Option<String>,
        stack: Option<String>,
        url: Option<String>,
        line: Option<i64>,
    },
    RequestFailed {
        url: Option<String>,
        error_text: Option<String>,
        resource_type: Option<String>,
    },
    Response {
        url: Option<String>,
        status: i64,
        status_text: Option<String>,
    },
}

/// Starts browser instances. One instance backs one crawl session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserInstance>, BrowserError>;
}

/// A running browser shared by every page task of a session
#[async_trait]
pub trait BrowserInstance: Send + Sync {
    /// Open a fresh page with event capture and the blocking policy installed
    async fn open_page(&self, policy: &BlockingPolicy) -> Result<Box<dyn PageHandle>, BrowserError>;

    /// False once the browser process or its connection is gone
    fn is_connected(&self) -> bool;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// A page owned by exactly one task from open to close
#[async_trait]
pub trait PageHandle: Send {
    /// Navigate and wait for the load event. The caller applies the timeout.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Take every event captured since the page was opened or last drained
    fn drain_events(&mut self) -> Vec<RawEvent>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

/// Timeout helper shared by page runners
pub async fn navigate_with_timeout(
    page: &mut dyn PageHandle,
    url: &str,
    timeout: Duration,
) -> Result<(), BrowserError> {
    match tokio::time::timeout(timeout, page.navigate(url)).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::NavigationTimeout {
            url: url.to_string(),
            timeout,
        }),
    }
}

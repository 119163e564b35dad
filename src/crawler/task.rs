use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

/// A page address to scan, in the order it was supplied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTask {
    /// Address to load
    pub url: String,

    /// Zero-based position in the input list
    pub position: usize,
}

impl UrlTask {
    pub fn new(url: impl Into<String>, position: usize) -> Self {
        Self { url: url.into(), position }
    }
}

/// Kind of runtime diagnostic observed during page load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    ConsoleError,
    UncaughtException,
    NetworkFailure,
    HttpStatusError,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::ConsoleError => "console_error",
            DiagnosticKind::UncaughtException => "uncaught_exception",
            DiagnosticKind::NetworkFailure => "network_failure",
            DiagnosticKind::HttpStatusError => "http_status_error",
        }
    }
}

/// One normalized diagnostic, produced by the classifier from a raw browser event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Message text, kept verbatim
    pub text: String,

    pub kind: DiagnosticKind,

    /// Script or resource the diagnostic points at
    pub location_url: Option<String>,

    pub line_number: Option<u32>,

    /// When the classifier saw the event
    pub timestamp: DateTime<Utc>,
}

/// Outcome of scanning one URL. Exactly one exists per task, however many attempts it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// URL that was scanned
    pub url: String,

    pub success: bool,

    /// Diagnostics from the final attempt (always empty on failure)
    pub diagnostics: Vec<DiagnosticRecord>,

    /// Timestamp when the scan finished
    pub scanned_at: DateTime<Utc>,

    /// Last error message when `success` is false
    pub failure_reason: Option<String>,

    /// Informational note on a successful scan (e.g. document blocked by policy)
    pub notice: Option<String>,

    /// Navigation attempts made, including retries
    pub attempts: u32,
}

impl PageResult {
    pub fn succeeded(url: impl Into<String>, diagnostics: Vec<DiagnosticRecord>, attempts: u32) -> Self {
        Self {
            url: url.into(),
            success: true,
            diagnostics,
            scanned_at: Utc::now(),
            failure_reason: None,
            notice: None,
            attempts,
        }
    }

    pub fn failed(url: impl Into<String>, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            url: url.into(),
            success: false,
            diagnostics: Vec::new(),
            scanned_at: Utc::now(),
            failure_reason: Some(reason.into()),
            notice: None,
            attempts,
        }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }

    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

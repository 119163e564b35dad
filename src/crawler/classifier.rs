use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::browser::{ConsoleLevel, RawEvent};
use crate::cli::config::ClassifierSettings;
use crate::crawler::task::{DiagnosticKind, DiagnosticRecord};

/// Why an event could not be turned into a record
#[derive(Debug, Error)]
enum MalformedEvent {
    #[error("{0} event has no text")]
    MissingText(&'static str),

    #[error("failed request has no URL")]
    MissingUrl,

    #[error("line number {0} out of range")]
    BadLine(i64),

    #[error("status {0} is not an HTTP status")]
    BadStatus(i64),
}

/// Decides which raw browser events are reportable diagnostics
pub struct Classifier {
    /// Non-error console messages that are still worth reporting
    significant: Vec<Regex>,

    /// Messages caused by loads we cancelled ourselves
    ignored: Vec<Regex>,
}

impl Classifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        Self {
            significant: compile(&settings.significant_patterns, "significant"),
            ignored: compile(&settings.ignored_patterns, "ignored"),
        }
    }

    /// Turn one event into a record, or drop it.
    ///
    /// Never fails: a malformed event is logged and discarded.
    pub fn classify(&self, event: &RawEvent) -> Option<DiagnosticRecord> {
        match self.try_classify(event) {
            Ok(record) => record,
            Err(e) => {
                debug!("Dropping malformed browser event: {}", e);
                None
            }
        }
    }

    /// Classify every event of a page, in arrival order
    pub fn classify_all(&self, events: &[RawEvent]) -> Vec<DiagnosticRecord> {
        events.iter().filter_map(|event| self.classify(event)).collect()
    }

    fn try_classify(&self, event: &RawEvent) -> Result<Option<DiagnosticRecord>, MalformedEvent> {
        match event {
            RawEvent::Console { level, text, url, line } => {
                let text = non_empty(text).ok_or(MalformedEvent::MissingText("console"))?;
                if self.is_ignored(text) {
                    return Ok(None);
                }
                let reportable = *level == ConsoleLevel::Error
                    || self.significant.iter().any(|p| p.is_match(text));
                if !reportable {
                    return Ok(None);
                }
                Ok(Some(record(
                    text.to_string(),
                    DiagnosticKind::ConsoleError,
                    non_empty(url).map(str::to_string),
                    line_number(*line)?,
                )))
            }
            RawEvent::PageError { message, stack, url, line } => {
                let message = non_empty(message).ok_or(MalformedEvent::MissingText("exception"))?;
                let text = match non_empty(stack) {
                    Some(stack) => format!("{}\n{}", message, stack),
                    None => message.to_string(),
                };
                Ok(Some(record(
                    text,
                    DiagnosticKind::UncaughtException,
                    non_empty(url).map(str::to_string),
                    line_number(*line)?,
                )))
            }
            RawEvent::RequestFailed { url, error_text, .. } => {
                let url = non_empty(url).ok_or(MalformedEvent::MissingUrl)?;
                let error_text = non_empty(error_text).unwrap_or("net::ERR_FAILED");
                if self.is_ignored(error_text) {
                    return Ok(None);
                }
                Ok(Some(record(
                    format!("Failed to load resource: {}", error_text),
                    DiagnosticKind::NetworkFailure,
                    Some(url.to_string()),
                    None,
                )))
            }
            RawEvent::Response { url, status, status_text } => {
                if !(100..=599).contains(status) {
                    return Err(MalformedEvent::BadStatus(*status));
                }
                if *status < 400 {
                    return Ok(None);
                }
                let url = non_empty(url).ok_or(MalformedEvent::MissingUrl)?;
                let text = match non_empty(status_text) {
                    Some(reason) => format!("HTTP {} {}", status, reason),
                    None => format!("HTTP {}", status),
                };
                Ok(Some(record(
                    text,
                    DiagnosticKind::HttpStatusError,
                    Some(url.to_string()),
                    None,
                )))
            }
        }
    }

    fn is_ignored(&self, text: &str) -> bool {
        self.ignored.iter().any(|p| p.is_match(text))
    }
}

fn compile(patterns: &[String], kind: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Invalid {} pattern '{}': {}", kind, pattern, e);
                None
            }
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn line_number(line: Option<i64>) -> Result<Option<u32>, MalformedEvent> {
    match line {
        None => Ok(None),
        Some(n) => u32::try_from(n).map(Some).map_err(|_| MalformedEvent::BadLine(n)),
    }
}

fn record(
    text: String,
    kind: DiagnosticKind,
    location_url: Option<String>,
    line_number: Option<u32>,
) -> DiagnosticRecord {
    DiagnosticRecord {
        text,
        kind,
        location_url,
        line_number,
        timestamp: Utc::now(),
    }
}

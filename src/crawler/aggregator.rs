use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::crawler::session::SessionSummary;
use crate::crawler::signature::{normalized_signature, signature};
use crate::crawler::task::{DiagnosticRecord, PageResult};

/// Every page that produced one exact diagnostic signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub signature: String,

    /// First occurrence seen
    pub sample: DiagnosticRecord,

    /// Pages that emitted it; only grows
    pub affected_pages: BTreeSet<String>,
}

impl ErrorGroup {
    fn new(signature: String, sample: DiagnosticRecord) -> Self {
        Self {
            signature,
            sample,
            affected_pages: BTreeSet::new(),
        }
    }
}

/// Looser grouping for display, merging exact groups by normalized signature
#[derive(Debug, Clone, Serialize)]
pub struct PresentationGroup {
    pub normalized_signature: String,
    pub sample: DiagnosticRecord,
    pub signatures: Vec<String>,
    pub affected_pages: BTreeSet<String>,
}

/// Headline counters for a finished crawl
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total_scanned: usize,
    pub pages_with_diagnostics: usize,
    pub pages_failed: usize,
    pub total_diagnostics: usize,
    pub unique_signatures: usize,
    pub sessions_failed: usize,
}

/// Everything one crawl learned. Built by the aggregator, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages: HashMap<String, PageResult>,
    pub groups: HashMap<String, ErrorGroup>,
    pub sessions: Vec<SessionSummary>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            pages: HashMap::new(),
            groups: HashMap::new(),
            sessions: Vec::new(),
        }
    }

    pub fn summary(&self) -> Summary {
        Summary {
            total_scanned: self.pages.len(),
            pages_with_diagnostics: self.pages.values().filter(|p| p.has_diagnostics()).count(),
            pages_failed: self.pages.values().filter(|p| !p.success).count(),
            total_diagnostics: self.pages.values().map(|p| p.diagnostics.len()).sum(),
            unique_signatures: self.groups.len(),
            sessions_failed: self.sessions.iter().filter(|s| s.error.is_some()).count(),
        }
    }

    /// Pages by diagnostic count (most first), then URL
    pub fn sorted_pages(&self) -> Vec<&PageResult> {
        let mut pages: Vec<&PageResult> = self.pages.values().collect();
        pages.sort_by(|a, b| {
            b.diagnostics
                .len()
                .cmp(&a.diagnostics.len())
                .then_with(|| a.url.cmp(&b.url))
        });
        pages
    }

    /// Groups by affected page count (most first), then signature
    pub fn sorted_groups(&self) -> Vec<&ErrorGroup> {
        let mut groups: Vec<&ErrorGroup> = self.groups.values().collect();
        groups.sort_by(|a, b| {
            b.affected_pages
                .len()
                .cmp(&a.affected_pages.len())
                .then_with(|| a.signature.cmp(&b.signature))
        });
        groups
    }

    /// Exact groups merged by normalized signature, for display only
    pub fn presentation_groups(&self) -> Vec<PresentationGroup> {
        let mut merged: BTreeMap<String, PresentationGroup> = BTreeMap::new();
        for group in self.sorted_groups() {
            let key = normalized_signature(&group.sample);
            let entry = merged.entry(key.clone()).or_insert_with(|| PresentationGroup {
                normalized_signature: key,
                sample: group.sample.clone(),
                signatures: Vec::new(),
                affected_pages: BTreeSet::new(),
            });
            entry.signatures.push(group.signature.clone());
            entry.affected_pages.extend(group.affected_pages.iter().cloned());
        }

        let mut groups: Vec<PresentationGroup> = merged.into_values().collect();
        groups.sort_by(|a, b| b.affected_pages.len().cmp(&a.affected_pages.len()));
        groups
    }
}

impl Default for CrawlState {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds page results into a crawl state. Only the control task calls it.
#[derive(Debug, Default)]
pub struct Aggregator {
    state: CrawlState,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished page and group its diagnostics
    pub fn ingest(&mut self, result: PageResult) {
        for record in &result.diagnostics {
            let key = signature(record);
            self.state
                .groups
                .entry(key.clone())
                .or_insert_with(|| ErrorGroup::new(key, record.clone()))
                .affected_pages
                .insert(result.url.clone());
        }
        self.state.pages.insert(result.url.clone(), result);
    }

    pub fn record_session(&mut self, summary: SessionSummary) {
        self.state.sessions.push(summary);
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    /// Close the run and hand the state over
    pub fn finish(mut self) -> CrawlState {
        self.state.finished_at = Some(Utc::now());
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::task::DiagnosticKind;

    fn diag(text: &str, location: Option<&str>) -> DiagnosticRecord {
        DiagnosticRecord {
            text: text.to_string(),
            kind: DiagnosticKind::ConsoleError,
            location_url: location.map(str::to_string),
            line_number: None,
            timestamp: Utc::now(),
        }
    }

    fn page(url: &str, diagnostics: Vec<DiagnosticRecord>) -> PageResult {
        PageResult::succeeded(url, diagnostics, 1)
    }

    #[test]
    fn identical_diagnostics_share_a_group() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(page("https://a.test/1", vec![diag("X failed", Some("/a.js"))]));
        aggregator.ingest(page("https://a.test/2", vec![diag("X failed", Some("/a.js"))]));
        aggregator.ingest(page("https://a.test/3", vec![]));

        let state = aggregator.finish();
        assert_eq!(state.groups.len(), 1);
        let group = state.groups.values().next().unwrap();
        assert_eq!(group.affected_pages.len(), 2);

        let summary = state.summary();
        assert_eq!(summary.total_scanned, 3);
        assert_eq!(summary.pages_with_diagnostics, 2);
        assert_eq!(summary.total_diagnostics, 2);
        assert_eq!(summary.unique_signatures, 1);
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn same_text_different_location_is_two_groups() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(page("https://a.test/1", vec![diag("X failed", Some("/a.js"))]));
        aggregator.ingest(page("https://a.test/2", vec![diag("X failed", Some("/b.js"))]));

        let state = aggregator.finish();
        assert_eq!(state.groups.len(), 2);
        assert!(state.groups.values().all(|g| g.affected_pages.len() == 1));
    }

    #[test]
    fn repeated_diagnostic_on_one_page_counts_page_once() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(page(
            "https://a.test/1",
            vec![diag("boom", None), diag("boom", None), diag("boom", None)],
        ));

        let state = aggregator.finish();
        assert_eq!(state.groups.len(), 1);
        assert_eq!(state.groups.values().next().unwrap().affected_pages.len(), 1);
        assert_eq!(state.summary().total_diagnostics, 3);
    }

    #[test]
    fn group_sample_is_first_occurrence_and_pages_only_grow() {
        let mut aggregator = Aggregator::new();
        let first = diag("boom", None);
        aggregator.ingest(page("https://a.test/1", vec![first.clone()]));

        let mut sizes = Vec::new();
        for i in 2..6 {
            aggregator.ingest(page(&format!("https://a.test/{}", i), vec![diag("boom", None)]));
            sizes.push(aggregator.state().groups.values().next().unwrap().affected_pages.len());
        }

        assert_eq!(sizes, vec![2, 3, 4, 5]);
        let state = aggregator.finish();
        let group = state.groups.values().next().unwrap();
        assert_eq!(group.sample, first);
        assert!(group.affected_pages.iter().all(|url| state.pages.contains_key(url)));
    }

    #[test]
    fn failed_pages_are_counted_without_groups() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(PageResult::failed("https://a.test/down", "timed out", 3));

        let state = aggregator.finish();
        assert!(state.groups.is_empty());
        assert_eq!(state.summary().pages_failed, 1);
        assert_eq!(state.summary().pages_with_diagnostics, 0);
    }

    #[test]
    fn pages_sort_by_diagnostic_count_then_url() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(page("https://a.test/b", vec![diag("1", None)]));
        aggregator.ingest(page("https://a.test/c", vec![diag("1", None), diag("2", None)]));
        aggregator.ingest(page("https://a.test/a", vec![diag("3", None)]));

        let state = aggregator.finish();
        let order: Vec<&str> = state.sorted_pages().iter().map(|p| p.url.as_str()).collect();
        assert_eq!(order, vec!["https://a.test/c", "https://a.test/a", "https://a.test/b"]);
    }

    #[test]
    fn presentation_groups_merge_noisy_variants() {
        let mut aggregator = Aggregator::new();
        aggregator.ingest(page("https://a.test/1", vec![diag("request 17 failed", None)]));
        aggregator.ingest(page("https://a.test/2", vec![diag("request 42 failed", None)]));

        let state = aggregator.finish();
        assert_eq!(state.groups.len(), 2);
        let presented = state.presentation_groups();
        assert_eq!(presented.len(), 1);
        assert_eq!(presented[0].signatures.len(), 2);
        assert_eq!(presented[0].affected_pages.len(), 2);
    }
}

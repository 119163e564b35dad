use anyhow::{Result, Context};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::crawler::aggregator::{CrawlState, ErrorGroup, PresentationGroup, Summary};
use crate::crawler::session::SessionSummary;
use crate::crawler::signature::UNKNOWN_LOCATION;
use crate::crawler::task::PageResult;

/// Progress is logged every this many records during extraction
const PROGRESS_INTERVAL: usize = 100_000;

/// One diagnostic occurrence, flattened for downstream tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub page_url: String,
    pub error_text: String,
    pub error_location: String,
    pub error_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Serializable view of a finished crawl
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport<'a> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Summary,
    pub sessions: &'a [SessionSummary],
    pub pages: Vec<&'a PageResult>,
    pub groups: Vec<&'a ErrorGroup>,
    /// Groups merged by normalized signature, for display
    pub presentation_groups: Vec<PresentationGroup>,
    pub errors: Vec<ErrorEntry>,
}

impl<'a> CrawlReport<'a> {
    pub fn from_state(state: &'a CrawlState) -> Self {
        let pages = state.sorted_pages();
        let errors = pages
            .iter()
            .flat_map(|page| {
                page.diagnostics.iter().map(move |d| ErrorEntry {
                    page_url: page.url.clone(),
                    error_text: d.text.clone(),
                    error_location: d
                        .location_url
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
                    error_type: d.kind.as_str().to_string(),
                    timestamp: d.timestamp,
                })
            })
            .collect();

        Self {
            run_id: state.run_id,
            started_at: state.started_at,
            finished_at: state.finished_at,
            summary: state.summary(),
            sessions: &state.sessions,
            pages,
            groups: state.sorted_groups(),
            presentation_groups: state.presentation_groups(),
            errors,
        }
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let file = fs::File::create(output_path)
            .context(format!("Failed to create output file: {}", output_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .context("Failed to serialize crawl report")?;
        writer.flush().context("Failed to flush crawl report")?;

        debug!("Wrote report with {} errors to {}", self.errors.len(), output_path.display());
        Ok(())
    }
}

/// Counters from an extraction run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub scanned: usize,
    pub matched: usize,
    pub duplicates: usize,
}

/// Keeps the first entry seen for each matching location
struct LocationFilter<'n> {
    needle: &'n str,
    seen: HashSet<String>,
    kept: Vec<ErrorEntry>,
    stats: ExtractStats,
}

impl<'n> LocationFilter<'n> {
    fn new(needle: &'n str) -> Self {
        Self {
            needle,
            seen: HashSet::new(),
            kept: Vec::new(),
            stats: ExtractStats::default(),
        }
    }

    fn offer(&mut self, entry: ErrorEntry) {
        self.stats.scanned += 1;
        if entry.error_location.contains(self.needle) {
            self.stats.matched += 1;
            if self.seen.insert(entry.error_location.clone()) {
                self.kept.push(entry);
            } else {
                self.stats.duplicates += 1;
            }
        }

        if self.stats.scanned % PROGRESS_INTERVAL == 0 {
            info!("Scanned {} records... Found {} matches so far.", self.stats.scanned, self.stats.matched);
        }
    }

    fn finish(self) -> (Vec<ErrorEntry>, ExtractStats) {
        (self.kept, self.stats)
    }
}

/// Keep entries whose location contains `needle`, one per location (first wins)
pub fn filter_by_location(
    entries: impl IntoIterator<Item = ErrorEntry>,
    needle: &str,
) -> (Vec<ErrorEntry>, ExtractStats) {
    let mut filter = LocationFilter::new(needle);
    for entry in entries {
        filter.offer(entry);
    }
    filter.finish()
}

/// Stream the `errors` array of a saved report into `f`, one entry at a time.
///
/// Other top-level fields are skipped without being materialized.
pub fn for_each_error(report_path: &Path, f: impl FnMut(ErrorEntry)) -> Result<()> {
    let file = fs::File::open(report_path)
        .context(format!("Failed to open report: {}", report_path.display()))?;
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(file));

    let found = ReportErrors(f)
        .deserialize(&mut de)
        .context(format!("Failed to parse report: {}", report_path.display()))?;
    de.end()
        .context(format!("Trailing data after report: {}", report_path.display()))?;

    if !found {
        anyhow::bail!("Report has no errors list: {}", report_path.display());
    }
    Ok(())
}

/// Filter a saved report without holding all of its errors in memory
pub fn extract_matching(report_path: &Path, needle: &str) -> Result<(Vec<ErrorEntry>, ExtractStats)> {
    let mut filter = LocationFilter::new(needle);
    for_each_error(report_path, |entry| filter.offer(entry))?;
    Ok(filter.finish())
}

/// Walks the report object; yields whether an `errors` field was present
struct ReportErrors<F>(F);

impl<'de, F: FnMut(ErrorEntry)> DeserializeSeed<'de> for ReportErrors<F> {
    type Value = bool;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<bool, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, F: FnMut(ErrorEntry)> Visitor<'de> for ReportErrors<F> {
    type Value = bool;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a crawl report object")
    }

    fn visit_map<A: MapAccess<'de>>(mut self, mut map: A) -> Result<bool, A::Error> {
        let mut found = false;
        while let Some(key) = map.next_key::<String>()? {
            if key == "errors" {
                map.next_value_seed(EachEntry(&mut self.0))?;
                found = true;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }
}

struct EachEntry<'f, F>(&'f mut F);

impl<'de, 'f, F: FnMut(ErrorEntry)> DeserializeSeed<'de> for EachEntry<'f, F> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'f, F: FnMut(ErrorEntry)> Visitor<'de> for EachEntry<'f, F> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a list of error entries")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while let Some(entry) = seq.next_element::<ErrorEntry>()? {
            (self.0)(entry);
        }
        Ok(())
    }
}

/// Write `Error Message,URL` rows
pub fn write_error_csv(entries: &[ErrorEntry], output_path: &Path) -> Result<()> {
    let file = fs::File::create(output_path)
        .context(format!("Failed to create output file: {}", output_path.display()))?;
    let mut file = BufWriter::new(file);

    writeln!(file, "Error Message,URL")
        .context("Failed to write CSV header to file")?;

    for entry in entries {
        writeln!(file, "{},{}", csv_field(&entry.error_text), csv_field(&entry.error_location))
            .context("Failed to write CSV row to file")?;
    }
    file.flush().context("Failed to flush CSV file")?;

    debug!("Exported {} records to CSV file: {}", entries.len(), output_path.display());
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

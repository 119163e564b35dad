use anyhow::{Result, Context};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

use crate::crawler::task::UrlTask;

/// Read a URL list file: one address per line, `#` starts a comment
pub fn read_url_file(path: &Path) -> Result<Vec<UrlTask>> {
    let contents = fs::read_to_string(path)
        .context(format!("Failed to read URL list: {}", path.display()))?;

    let tasks = parse_url_list(&contents);
    debug!("Loaded {} URLs from {}", tasks.len(), path.display());
    Ok(tasks)
}

/// Parse URL list text, skipping invalid and duplicate entries
pub fn parse_url_list(contents: &str) -> Vec<UrlTask> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match Url::parse(line) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if seen.insert(line.to_string()) {
                    tasks.push(UrlTask::new(line, tasks.len()));
                } else {
                    debug!("Skipping duplicate URL on line {}: {}", line_no + 1, line);
                }
            }
            Ok(url) => {
                warn!("Skipping unsupported scheme '{}' on line {}", url.scheme(), line_no + 1);
            }
            Err(e) => {
                warn!("Skipping invalid URL on line {} ({}): {}", line_no + 1, e, line);
            }
        }
    }

    tasks
}

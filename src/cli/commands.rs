use anyhow::{Result, Context};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::browser::ChromeLauncher;
use crate::cli::config::CrawlerConfig;
use crate::crawler::controller::CrawlerController;
use crate::storage::report::{self, CrawlReport};
use crate::storage::urls::read_url_file;

/// Command line values that override the loaded configuration
#[derive(Debug, Default)]
pub struct ScanOverrides {
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub session_size: Option<usize>,
}

impl ScanOverrides {
    fn apply(&self, config: &mut CrawlerConfig) {
        if let Some(n) = self.concurrency {
            config.crawl.max_concurrent = n;
        }
        if let Some(secs) = self.timeout {
            config.crawl.navigation_timeout_secs = secs;
        }
        if let Some(n) = self.retries {
            config.crawl.max_retries = n;
        }
        if let Some(n) = self.session_size {
            config.crawl.session_size = n;
        }
    }
}

/// Load the configuration a scan should run with
fn resolve_config(profile: Option<String>, config_path: Option<PathBuf>) -> Result<CrawlerConfig> {
    match (profile, config_path) {
        (_, Some(path)) => CrawlerConfig::load_from_file(&path),
        (Some(profile), None) => CrawlerConfig::load_profile(&profile)
            .context(format!("Failed to load profile: {}", profile)),
        (None, None) => CrawlerConfig::load_default(),
    }
}

/// Scan every URL in a list file and write the report
pub async fn scan(
    urls: PathBuf,
    profile: Option<String>,
    config_path: Option<PathBuf>,
    overrides: ScanOverrides,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = resolve_config(profile, config_path)?;
    overrides.apply(&mut config);
    config.validate()?;

    let tasks = read_url_file(&urls)?;
    if tasks.is_empty() {
        warn!("No valid URLs found in {}", urls.display());
    }

    let controller = CrawlerController::new(&config, Box::new(ChromeLauncher::new(&config.browser)));
    let state = controller.run(&tasks).await;

    // Determine output path
    let output_path = output.unwrap_or_else(|| {
        config.output.directory.join(format!(
            "error-report-{}.json",
            Utc::now().format("%Y-%m-%dT%H-%M-%S")
        ))
    });

    let report = CrawlReport::from_state(&state);
    report.write_json(&output_path)?;

    let summary = &report.summary;
    println!("Pages scanned:          {}", summary.total_scanned);
    println!("Pages with errors:      {}", summary.pages_with_diagnostics);
    println!("Pages failed:           {}", summary.pages_failed);
    println!("Total errors:           {}", summary.total_diagnostics);
    println!("Unique error groups:    {}", summary.unique_signatures);
    if summary.sessions_failed > 0 {
        println!("Browser sessions lost:  {}", summary.sessions_failed);
    }

    info!("Report written to: {}", output_path.display());

    Ok(())
}

/// Filter a saved report down to one CSV row per matching error location
pub async fn extract(report_path: PathBuf, contains: String, output: PathBuf) -> Result<()> {
    let (kept, stats) = report::extract_matching(&report_path, &contains)?;

    info!("Total records scanned: {}", stats.scanned);
    info!("Matches found: {}", stats.matched);
    info!("Duplicates removed: {}", stats.duplicates);

    if kept.is_empty() {
        println!("No matching records found. No CSV generated.");
        return Ok(());
    }

    report::write_error_csv(&kept, &output)?;
    println!("Exported {} records to {}", kept.len(), output.display());

    Ok(())
}

/// List all configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles()?;

    println!("Available profiles:");
    if profiles.is_empty() {
        println!("  No profiles found.");
    } else {
        for profile in profiles {
            println!("  - {}", profile);
        }
    }

    Ok(())
}

/// Show a configuration profile
pub async fn show_profile(profile: String) -> Result<()> {
    let config = CrawlerConfig::load_profile(&profile)?;
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    println!("Profile: {}\n{}", profile, yaml);
    Ok(())
}

/// Copy the default configuration into a site profile for editing
pub async fn save_profile(profile: String) -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    let path = config
        .save_as_profile(&profile)
        .context(format!("Failed to save profile: {}", profile))?;
    println!("Saved profile '{}' to {}", profile, path.display());
    Ok(())
}

/// Show the default configuration
pub async fn show_config() -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    println!("{}", yaml);
    Ok(())
}

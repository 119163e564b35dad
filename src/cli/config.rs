use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use tracing::{info, debug, error};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CrawlerConfig {
    pub crawl: CrawlSettings,
    pub browser: BrowserSettings,
    pub blocking: BlockingSettings,
    pub classifier: ClassifierSettings,
    pub output: OutputSettings,
}

/// Concurrency, retry and pacing settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlSettings {
    /// Pages loaded at the same time within one batch
    pub max_concurrent: usize,
    pub navigation_timeout_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff unit; retry n waits `n * retry_base_delay_ms`
    pub retry_base_delay_ms: u64,
    /// URLs handled by one browser instance before it is recycled
    pub session_size: usize,
    /// Wait after load so deferred scripts can report errors
    pub settle_delay_ms: u64,
    pub batch_cooldown_ms: u64,
    pub session_cooldown_ms: u64,
}

/// Browser launch settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: String,
    pub locale: String,
    pub extra_args: Vec<String>,
    /// Chrome binary; autodetected when unset
    pub executable: Option<PathBuf>,
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Request interception settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BlockingSettings {
    /// DevTools resource types to abort ("image", "font", ...)
    pub resource_types: Vec<String>,
    /// Document extensions that are never HTML
    pub document_extensions: Vec<String>,
}

/// Console message filtering
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Regexes that make a non-error console message reportable
    pub significant_patterns: Vec<String>,
    /// Regexes for messages caused by our own aborted loads
    pub ignored_patterns: Vec<String>,
}

/// Report output settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            navigation_timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 2000,
            session_size: 50,
            settle_delay_ms: 2000,
            batch_cooldown_ms: 1000,
            session_cooldown_ms: 2000,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            locale: "en-US".to_string(),
            extra_args: vec![],
            executable: None,
        }
    }
}

impl Default for BlockingSettings {
    fn default() -> Self {
        Self {
            resource_types: ["image", "font", "media", "stylesheet"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            document_extensions: ["pdf", "zip", "doc", "docx", "xls", "xlsx", "ppt", "pptx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            significant_patterns: vec![
                r"has been blocked by CORS policy".to_string(),
                r"Cross-Origin Request Blocked".to_string(),
                r"ReferenceError: .+ is not defined".to_string(),
            ],
            ignored_patterns: vec![
                r"net::ERR_ABORTED".to_string(),
                r"net::ERR_BLOCKED_BY_CLIENT".to_string(),
            ],
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./reports"),
        }
    }
}

impl CrawlSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn batch_cooldown(&self) -> Duration {
        Duration::from_millis(self.batch_cooldown_ms)
    }

    pub fn session_cooldown(&self) -> Duration {
        Duration::from_millis(self.session_cooldown_ms)
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "page-sentry", "page-sentry") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Path of a site profile under `config_dir`
    pub fn profile_path_in(config_dir: &Path, profile: &str) -> PathBuf {
        config_dir.join("sites").join(format!("{}.yaml", profile))
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let profile_path = Self::profile_path_in(&Self::config_dir(), profile);

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        config.validate()
            .context(format!("Invalid configuration in {}", path.display()))?;

        Ok(config)
    }

    /// Reject settings the crawler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.crawl.max_concurrent == 0 {
            anyhow::bail!("crawl.max_concurrent must be at least 1");
        }
        if self.crawl.session_size == 0 {
            anyhow::bail!("crawl.session_size must be at least 1");
        }
        if self.crawl.navigation_timeout_secs == 0 {
            anyhow::bail!("crawl.navigation_timeout_secs must be at least 1");
        }
        if self.browser.viewport.width == 0 || self.browser.viewport.height == 0 {
            anyhow::bail!("browser.viewport must have a non-zero width and height");
        }
        Ok(())
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile, returning where it was written
    pub fn save_as_profile(&self, profile: &str) -> Result<PathBuf> {
        self.save_profile_in(&Self::config_dir(), profile)
    }

    fn save_profile_in(&self, config_dir: &Path, profile: &str) -> Result<PathBuf> {
        if profile.is_empty() || profile.contains(['/', '\\']) || profile.starts_with('.') {
            anyhow::bail!("Invalid profile name: '{}'", profile);
        }
        let profile_path = Self::profile_path_in(config_dir, profile);
        self.save_to_file(&profile_path)?;
        Ok(profile_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        Self::list_profiles_in(&Self::config_dir())
    }

    fn list_profiles_in(config_dir: &Path) -> Result<Vec<String>> {
        let sites_dir = config_dir.join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(stem) = path.file_stem() {
                    if let Some(name) = stem.to_str() {
                        profiles.push(name.to_string());
                    }
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}

pub mod commands;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Write logs to the default log file
    #[arg(long, global = true, conflicts_with = "log_file")]
    pub save_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a list of pages for runtime errors
    Scan {
        /// File with one URL per line
        #[arg(required = true)]
        urls: PathBuf,

        /// Site profile to use instead of the default configuration
        #[arg(short, long, conflicts_with = "config")]
        profile: Option<String>,

        /// Explicit configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pages loaded at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Navigation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Retries per URL after the first attempt
        #[arg(long)]
        retries: Option<u32>,

        /// URLs per browser instance before it is recycled
        #[arg(long)]
        session_size: Option<usize>,

        /// Report file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pull error records for matching resource locations out of a saved report
    Extract {
        /// JSON report written by `scan`
        #[arg(required = true)]
        report: PathBuf,

        /// Substring the error location must contain
        #[arg(long, default_value = "/content/dam/")]
        contains: String,

        /// CSV output path
        #[arg(short, long, default_value = "filtered_errors.csv")]
        output: PathBuf,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to show
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,

        /// Save the default configuration as a new site profile
        #[arg(long, value_name = "NAME", conflicts_with_all = ["profile", "list"])]
        save: Option<String>,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scan { urls, profile, config, concurrency, timeout, retries, session_size, output } => {
            info!("Starting scan of {}", urls.display());
            let overrides = commands::ScanOverrides {
                concurrency,
                timeout,
                retries,
                session_size,
            };
            commands::scan(urls, profile, config, overrides, output).await
        },
        Commands::Extract { report, contains, output } => {
            info!("Extracting errors matching '{}' from {}", contains, report.display());
            commands::extract(report, contains, output).await
        },
        Commands::Config { profile, list, save } => {
            if let Some(name) = save {
                info!("Saving configuration profile: {}", name);
                commands::save_profile(name).await
            } else if list {
                info!("Listing all configuration profiles");
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                info!("Showing configuration profile: {}", profile_name);
                commands::show_profile(profile_name).await
            } else {
                info!("Showing current configuration");
                commands::show_config().await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn scan_accepts_overrides() {
        let cli = Cli::try_parse_from([
            "page-sentry", "scan", "urls.txt", "--concurrency", "4", "--retries", "0", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Scan { concurrency, retries, timeout, .. } => {
                assert_eq!(concurrency, Some(4));
                assert_eq!(retries, Some(0));
                assert_eq!(timeout, None);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn config_save_takes_a_name() {
        let cli = Cli::try_parse_from(["page-sentry", "config", "--save", "shop"]).unwrap();
        match cli.command {
            Commands::Config { save, list, profile } => {
                assert_eq!(save.as_deref(), Some("shop"));
                assert!(!list);
                assert!(profile.is_none());
            }
            _ => panic!("expected config"),
        }
        assert!(Cli::try_parse_from(["page-sentry", "config", "--save", "shop", "--list"]).is_err());
    }

    #[test]
    fn profile_and_config_conflict() {
        let parsed = Cli::try_parse_from([
            "page-sentry", "scan", "urls.txt", "--profile", "shop", "--config", "c.yaml",
        ]);
        assert!(parsed.is_err());
    }
}

use anyhow::Result;
use tracing::{info, error};

use page_sentry::{cli, utils};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Initialize logging
    let log_file = args
        .log_file
        .clone()
        .or_else(|| args.save_log.then(utils::default_log_file));
    utils::init_logging(args.verbose, log_file.as_deref())?;

    info!("Starting Page Sentry v{}", env!("CARGO_PKG_VERSION"));

    // Process commands
    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            Err(e)
        }
    }
}

// src/main.rs

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::{error, info, warn};

use vanguard_osint::app::{App, ScanSummary};
use vanguard_osint::config::Config;
use vanguard_osint::core::orchestrator::cancel_pair;
use vanguard_osint::logging;

/// OSINT reconnaissance of a single domain
#[derive(Parser, Debug)]
#[command(name = "vanguard-osint", version, about, long_about = None)]
struct Cli {
    /// Domain (or URL) to investigate
    domain: String,

    /// Configuration file, created with defaults when missing
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Directory for the JSON report (overrides output.directory)
    #[arg(short, long)]
    output: Option<String>,

    /// Per-probe deadline in seconds (overrides scan_options.timeout)
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Mirror log output to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let log_path = logging::initialize_logging(cli.verbose)?;
    info!(log = %log_path.display(), "vanguard-osint starting.");

    let mut config = Config::load_or_create(&cli.config)
        .wrap_err_with(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(directory) = cli.output {
        config.output.directory = directory;
    }
    if let Some(secs) = cli.timeout {
        config.scan_options.timeout = secs;
    }

    let app = App::new(config);
    let (cancel_handle, cancel_signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding probes.");
            cancel_handle.cancel();
        }
    });

    let report = app
        .run(&cli.domain, cancel_signal)
        .await
        .wrap_err_with(|| format!("scan of '{}' could not start", cli.domain))?;

    print!("{}", ScanSummary::from_report(&report).render());

    match app.persist(&report) {
        Ok(path) => println!("\nReport saved to {}", path.display()),
        Err(e) => {
            error!(error = %e, "Report could not be saved.");
            eprintln!("\nReport could not be saved: {}", e);
        }
    }
    Ok(())
}

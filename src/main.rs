use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleetguard::cli::{format_dry_run, format_fleet_summary, Args};
use fleetguard::config::load_fleet_file;
use fleetguard::FleetManager;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let path = args.fleet_path();
    let mut config = load_fleet_file(&path)
        .with_context(|| format!("Failed to load fleet file {}", path.display()))?;

    if let Some(strategy) = args.strategy {
        config.routing.strategy = strategy;
    }

    // Dry-run mode: print fleet info and exit
    if args.dry_run {
        println!("{}", format_dry_run(&config, &path));
        return Ok(());
    }

    let manager = FleetManager::from_config(&config).context("Failed to build fleet")?;

    info!(
        "Starting fleetguard with {} regions ({} routing)",
        config.regions.len(),
        config.routing.strategy
    );
    manager.start();

    let mut status = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    status.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Shutdown signal received");
                break;
            }
            _ = status.tick() => {
                let summary = manager.summary();
                if args.json {
                    match serde_json::to_string(&summary) {
                        Ok(json) => info!("Fleet status: {}", json),
                        Err(e) => warn!("Failed to encode fleet status: {}", e),
                    }
                } else {
                    info!("Fleet status: {}", format_fleet_summary(&summary));
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

use clap::Parser;
use ct_replicator::cli::Cli;
use ct_replicator::config::ReplicationConfig;
use ct_replicator::error::DestinationOutcome;
use ct_replicator::orchestrator;
use log::{error, info};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    let config = match ReplicationConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "starting replication run over {} set(s){}",
        config.replication_sets.len(),
        if cli.dry_run { " (dry-run)" } else { "" }
    );

    let report = match orchestrator::run(&config, cli.dry_run).await {
        Ok(r) => r,
        Err(e) => {
            error!("replication run failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    for set in &report.sets {
        if let Some(err) = &set.set_level_error {
            error!("set {}: {}", set.set_name, err);
        }
        for outcome in &set.destinations {
            match outcome {
                DestinationOutcome::Applied { destination, version } => {
                    info!("set {}: {} applied, now at version {}", set.set_name, destination, version);
                }
                DestinationOutcome::Skipped { destination, reason } => {
                    error!("set {}: {} skipped: {}", set.set_name, destination, reason);
                }
                DestinationOutcome::Failed { destination, reason } => {
                    error!("set {}: {} failed: {}", set.set_name, destination, reason);
                }
            }
        }
    }

    if report.had_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

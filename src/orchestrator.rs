//! Replication Orchestrator: drives the whole engine for every
//! configured replication set, in declaration order, isolating
//! failures so that one destination or group never affects another.

use crate::apply;
use crate::config::ReplicationConfig;
use crate::discovery;
use crate::error::{DestinationOutcome, RunReport, SetOutcome};
use crate::extract;
use crate::gateway::SqlGateway;
use crate::model::{TableDescriptor, VERSION_UNAVAILABLE};
use crate::version;
use log::{info, warn};
use std::collections::BTreeMap;

/// Runs every replication set in `config`, returning a [`RunReport`]
/// whose `had_error` flag is the single success/failure signal the
/// CLI maps to a process exit code.
pub async fn run(config: &ReplicationConfig, dry_run: bool) -> anyhow::Result<RunReport> {
    let mut report = RunReport::default();

    for set in &config.replication_sets {
        report.record_set(run_set(set, dry_run).await);
    }

    Ok(report)
}

async fn run_set(set: &crate::config::ReplicationSet, dry_run: bool) -> SetOutcome {
    let mut outcome = SetOutcome {
        set_name: set.name.clone(),
        destinations: Vec::new(),
        set_level_error: None,
    };

    let source_gateway = match SqlGateway::connect(&set.source.name, &set.source.connection_string).await {
        Ok(g) => g,
        Err(e) => {
            outcome.set_level_error = Some(format!("failed to connect to source {}: {}", set.source.name, e));
            return outcome;
        }
    };

    let discovered = match discovery::discover(&source_gateway).await {
        Ok(tables) => tables,
        Err(e) => {
            outcome.set_level_error = Some(format!("discovery failed for set {}: {}", set.name, e));
            return outcome;
        }
    };

    let (tables, dropped) = discovery::apply_filters(discovered, set.table_filter.as_deref());
    for (name, reason) in &dropped {
        warn!("set {}: dropping table {} ({})", set.name, name, reason);
    }

    if tables.is_empty() {
        warn!("set {}: no replicable tables after filtering, skipping", set.name);
        return outcome;
    }

    let mut gateways = Vec::with_capacity(set.destinations.len());
    for dest in &set.destinations {
        match SqlGateway::connect(&dest.name, &dest.connection_string).await {
            Ok(g) => gateways.push(g),
            Err(e) => {
                outcome.destinations.push(DestinationOutcome::Failed {
                    destination: dest.name.clone(),
                    reason: format!("connect failed: {e}"),
                });
            }
        }
    }

    // Group live destinations by their exact current bookkeeping
    // version. VERSION_UNAVAILABLE destinations are excluded from the
    // run but still recorded as a skip/error.
    let mut groups: BTreeMap<i64, Vec<SqlGateway>> = BTreeMap::new();
    for gateway in gateways {
        let v = version::get_current_version(&gateway, dry_run).await;
        if v == VERSION_UNAVAILABLE {
            outcome.destinations.push(DestinationOutcome::Skipped {
                destination: gateway.display_name().to_string(),
                reason: "version bookkeeping unavailable".to_string(),
            });
            continue;
        }
        groups.entry(v).or_default().push(gateway);
    }

    for (baseline, group) in groups {
        outcome
            .destinations
            .extend(run_group(&source_gateway, &tables, baseline, group, dry_run).await);
    }

    outcome
}

async fn run_group(
    source_gateway: &SqlGateway,
    tables: &[TableDescriptor],
    baseline: i64,
    group: Vec<SqlGateway>,
    dry_run: bool,
) -> Vec<DestinationOutcome> {
    let names: Vec<String> = group.iter().map(|g| g.display_name().to_string()).collect();

    info!(
        "extracting changes since version {} for destinations: {}",
        baseline,
        names.join(", ")
    );

    let batch = match extract::extract(source_gateway, tables, baseline, &names).await {
        Ok(batch) => batch,
        Err(e) => {
            warn!("extraction failed for baseline {}: {}", baseline, e);
            return names
                .into_iter()
                .map(|destination| DestinationOutcome::Skipped {
                    destination,
                    reason: format!("extraction failed: {e}"),
                })
                .collect();
        }
    };

    let mut outcomes = Vec::with_capacity(group.len());
    for gateway in &group {
        match apply::apply_batch(gateway, &batch, dry_run).await {
            Ok(()) => outcomes.push(DestinationOutcome::Applied {
                destination: gateway.display_name().to_string(),
                version: batch.source_current_version,
            }),
            Err(e) => {
                warn!("apply failed on {}: {}", gateway.display_name(), e);
                outcomes.push(DestinationOutcome::Failed {
                    destination: gateway.display_name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    outcomes
}

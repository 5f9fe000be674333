use thiserror::Error;

/// Errors raised by the Metadata Discoverer.
///
/// Fatal to the replication set that triggered it: the set is aborted
/// and the orchestrator moves on to the next one.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("catalog query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Errors raised by the Version Tracker.
///
/// Scoped to a single destination: that destination is excluded from
/// the current run.
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("SyncInfo probe failed: {0}")]
    Probe(#[from] sqlx::Error),
}

/// Errors raised by the Change Extractor.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(
        "retention exceeded for {table}: min valid version {min_valid} > baseline {baseline}"
    )]
    RetentionExceeded {
        table: String,
        min_valid: i64,
        baseline: i64,
    },

    #[error("source query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("extraction produced {found} columns for {table}, expected {expected}")]
    ColumnMismatch {
        table: String,
        expected: usize,
        found: usize,
    },
}

/// Errors raised by the Change Applier.
///
/// Scoped to a single destination: its transaction rolls back and the
/// destination remains at its previous version.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("apply failed on destination {destination}: {source}")]
    Transaction {
        destination: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Outcome of one destination's apply attempt within a group, kept for
/// `RunReport` so no failure is ever silently dropped.
#[derive(Debug, Clone)]
pub enum DestinationOutcome {
    Applied { destination: String, version: i64 },
    Skipped { destination: String, reason: String },
    Failed { destination: String, reason: String },
}

/// Outcome of one replication set, aggregating its destination outcomes.
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub set_name: String,
    pub destinations: Vec<DestinationOutcome>,
    pub set_level_error: Option<String>,
}

/// Summary returned by the orchestrator's top-level run. `had_error` is
/// the run-error flag the engine surfaces to its caller; the CLI maps
/// it directly to the process exit code.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sets: Vec<SetOutcome>,
    pub had_error: bool,
}

impl RunReport {
    pub fn record_set(&mut self, outcome: SetOutcome) {
        if outcome.set_level_error.is_some() {
            self.had_error = true;
        }
        for d in &outcome.destinations {
            if matches!(d, DestinationOutcome::Failed { .. } | DestinationOutcome::Skipped { .. }) {
                self.had_error = true;
            }
        }
        self.sets.push(outcome);
    }
}

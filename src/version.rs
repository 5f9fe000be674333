//! Version Tracker: reads or bootstraps the single-row `SyncInfo`
//! bookkeeping table on a destination.

use crate::error::VersionError;
use crate::gateway::SqlGateway;
use crate::model::{DestinationVersion, VERSION_NEVER_SYNCED, VERSION_UNAVAILABLE};
use log::{error, info};

const PROBE_SYNC_INFO: &str =
    "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = 'SyncInfo'";
const READ_VERSION: &str = "SELECT Version FROM SyncInfo";
const CURRENT_CT_VERSION: &str = "SELECT CHANGE_TRACKING_CURRENT_VERSION()";
const CREATE_SYNC_INFO: &str = "
    CREATE TABLE SyncInfo (
        Id INT NOT NULL PRIMARY KEY DEFAULT 1 CHECK (Id = 1),
        Version BIGINT NOT NULL
    )
";

/// Returns the destination's current bookkeeping version, bootstrapping
/// `SyncInfo` on first contact if needed. Never propagates an error:
/// on any failure it logs and returns [`VERSION_UNAVAILABLE`] (the
/// destination is then excluded from the run by the caller).
pub async fn get_current_version(gateway: &SqlGateway, dry_run: bool) -> DestinationVersion {
    match probe_and_resolve(gateway, dry_run).await {
        Ok(version) => version,
        Err(e) => {
            error!(
                "version probe failed for destination {}: {}",
                gateway.display_name(),
                e
            );
            VERSION_UNAVAILABLE
        }
    }
}

async fn probe_and_resolve(
    gateway: &SqlGateway,
    dry_run: bool,
) -> Result<DestinationVersion, VersionError> {
    let exists = gateway
        .scalar_i64(PROBE_SYNC_INFO)
        .await
        .map_err(VersionError::Probe)?
        .unwrap_or(0)
        > 0;

    if !exists {
        let baseline = gateway
            .scalar_i64(CURRENT_CT_VERSION)
            .await
            .map_err(VersionError::Probe)?
            .unwrap_or(VERSION_NEVER_SYNCED);

        if !dry_run {
            gateway
                .execute(CREATE_SYNC_INFO)
                .await
                .map_err(VersionError::Probe)?;
            gateway
                .execute(&format!("INSERT INTO SyncInfo (Id, Version) VALUES (1, {baseline})"))
                .await
                .map_err(VersionError::Probe)?;
            info!(
                "bootstrapped SyncInfo on {} at version {}",
                gateway.display_name(),
                baseline
            );
        }

        return Ok(baseline);
    }

    let rows = gateway.fetch_all(READ_VERSION).await.map_err(VersionError::Probe)?;
    let version = rows
        .first()
        .and_then(|row| sqlx::Row::try_get::<i64, _>(row, "Version").ok())
        .unwrap_or(VERSION_NEVER_SYNCED);
    Ok(version)
}

/// The statement the Applier runs as the last step of a successful
/// apply transaction, advancing `SyncInfo` in lockstep with the
/// committed DML.
pub fn advance_statement(new_version: i64) -> String {
    format!("UPDATE SyncInfo SET Version = {new_version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_statement_is_an_unconditional_update() {
        assert_eq!(advance_statement(7), "UPDATE SyncInfo SET Version = 7");
    }
}

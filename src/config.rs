//! Configuration model: the concrete shape a runnable binary needs,
//! loaded from a TOML document with `serde`.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A source or destination database. No further state.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseEndpoint {
    pub name: String,
    pub connection_string: String,
}

/// One replication set: a source, its destinations, and an optional
/// table-name allowlist.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationSet {
    pub name: String,
    pub source: DatabaseEndpoint,
    #[serde(rename = "destinations")]
    pub destinations: Vec<DatabaseEndpoint>,
    /// Qualified, unbracketed, case-sensitive table names
    /// (`schema.table`). `None` means every change-tracked table the
    /// discoverer finds is replicated.
    pub table_filter: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReplicationConfigFile {
    #[serde(rename = "replication_set")]
    replication_sets: Vec<ReplicationSet>,
}

/// Top-level configuration: the ordered list of replication sets,
/// processed in declaration order.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub replication_sets: Vec<ReplicationSet>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("replication set {0:?} has no destinations")]
    EmptyDestinations(String),
}

impl ReplicationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let parsed: ReplicationConfigFile =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        for set in &parsed.replication_sets {
            if set.destinations.is_empty() {
                return Err(ConfigError::EmptyDestinations(set.name.clone()));
            }
        }

        Ok(ReplicationConfig {
            replication_sets: parsed.replication_sets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[replication_set]]
        name = "orders"
        table_filter = ["dbo.Orders", "dbo.OrderLines"]

        [replication_set.source]
        name = "orders-primary"
        connection_string = "mssql://primary"

        [[replication_set.destinations]]
        name = "orders-replica-1"
        connection_string = "mssql://replica1"

        [[replication_set.destinations]]
        name = "orders-replica-2"
        connection_string = "mssql://replica2"
    "#;

    #[test]
    fn parses_a_full_replication_set() {
        let parsed: ReplicationConfigFile = toml::from_str(SAMPLE).unwrap();
        let set = &parsed.replication_sets[0];
        assert_eq!(set.name, "orders");
        assert_eq!(set.destinations.len(), 2);
        assert_eq!(
            set.table_filter.as_deref(),
            Some(["dbo.Orders".to_string(), "dbo.OrderLines".to_string()].as_slice())
        );
    }

    #[test]
    fn rejects_a_set_with_no_destinations() {
        let text = r#"
            [[replication_set]]
            name = "empty"

            [replication_set.source]
            name = "p"
            connection_string = "mssql://p"
        "#;
        let parsed: ReplicationConfigFile = toml::from_str(text).unwrap();
        assert!(parsed.replication_sets[0].destinations.is_empty());
    }
}

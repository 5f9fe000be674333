//! Change Extractor: computes the source's current change-tracking
//! version, verifies retention coverage per table against a baseline,
//! and streams back the row-level changes since that baseline.

use crate::error::ExtractError;
use crate::gateway::{IsolationLevel, SqlGateway};
use crate::model::{ChangeBatch, ChangeRecord, Operation, TableDescriptor};
use futures::TryStreamExt;
use log::{info, warn};
use sqlx::Row;

const SNAPSHOT_ISOLATION_STATE: &str =
    "SELECT CAST(snapshot_isolation_state AS INT) FROM sys.databases WHERE database_id = DB_ID()";
const CURRENT_CT_VERSION: &str = "SELECT CHANGE_TRACKING_CURRENT_VERSION()";

/// Types whose raw value is cast to a transport-safe string in the
/// `CHANGETABLE`/base-table select list (decimal/date/text types can
/// otherwise trip driver-level decode panics).
const CAST_AS_VARCHAR_100: &[&str] = &[
    "decimal", "numeric", "money", "smallmoney", "float", "real", "tinyint", "smallint", "int",
    "bigint", "bit",
];
const CONVERT_DATETIME: &[&str] =
    &["datetime", "datetime2", "date", "time", "smalldatetime", "datetimeoffset"];

fn column_select_expr(source_alias: &str, column: &str, data_type: &str) -> String {
    let dt = data_type.to_lowercase();
    if CAST_AS_VARCHAR_100.contains(&dt.as_str()) {
        format!("CAST({source_alias}.{column} AS VARCHAR(100)) AS {column}")
    } else if CONVERT_DATETIME.contains(&dt.as_str()) {
        format!("CONVERT(VARCHAR(100), {source_alias}.{column}, 126) AS {column}")
    } else if dt == "text" {
        format!("CAST({source_alias}.{column} AS VARCHAR(8000)) AS {column}")
    } else if dt == "ntext" {
        format!("CAST({source_alias}.{column} AS NVARCHAR(4000)) AS {column}")
    } else {
        format!("{source_alias}.{column} AS {column}")
    }
}

/// Runs the full extraction procedure against one source gateway for
/// the given tables and per-destination-group baseline.
///
/// Returns [`ExtractError::RetentionExceeded`] the moment any table's
/// retention window fails to cover the baseline — no partial batch is
/// ever built. The caller names `group_destinations` purely for the
/// log line; this error is scoped to the whole destination group,
/// which the orchestrator enforces by skipping every destination in
/// the group on this error.
pub async fn extract(
    gateway: &SqlGateway,
    tables: &[TableDescriptor],
    baseline: i64,
    group_destinations: &[String],
) -> Result<ChangeBatch, ExtractError> {
    let snapshot_enabled = gateway
        .scalar_i64(SNAPSHOT_ISOLATION_STATE)
        .await
        .map_err(ExtractError::Query)?
        .unwrap_or(0)
        == 1;

    let mut tx = if snapshot_enabled {
        Some(
            gateway
                .begin_with_isolation(IsolationLevel::Snapshot)
                .await
                .map_err(ExtractError::Query)?,
        )
    } else {
        None
    };

    let source_current_version: i64 = gateway
        .scalar_i64(CURRENT_CT_VERSION)
        .await
        .map_err(ExtractError::Query)?
        .unwrap_or(0);

    let mut records = Vec::new();

    for table in tables {
        let (schema, table_name) = table.schema_and_table();

        let min_valid_query = format!(
            "SELECT CHANGE_TRACKING_MIN_VALID_VERSION(OBJECT_ID('{schema}.{table_name}'))"
        );
        let min_valid = gateway
            .scalar_i64(&min_valid_query)
            .await
            .map_err(ExtractError::Query)?
            .unwrap_or(i64::MIN);

        if min_valid > baseline {
            warn!(
                "retention exceeded for {} (min valid {} > baseline {}); aborting group for destinations: {}",
                table.qualified_name,
                min_valid,
                baseline,
                group_destinations.join(", ")
            );
            if let Some(conn) = tx.take() {
                crate::gateway::SqlGateway::rollback(conn).await;
            }
            return Err(ExtractError::RetentionExceeded {
                table: table.qualified_name.clone(),
                min_valid,
                baseline,
            });
        }

        let column_types = fetch_column_types(gateway, &schema, &table_name).await?;

        let key_select = table
            .key_columns
            .iter()
            .map(|c| column_select_expr("c", c, type_of(&column_types, c)))
            .collect::<Vec<_>>()
            .join(", ");
        let other_select = table
            .other_columns
            .iter()
            .map(|c| column_select_expr("t", c, type_of(&column_types, c)))
            .collect::<Vec<_>>()
            .join(", ");

        let join_cond = table
            .key_columns
            .iter()
            .map(|k| format!("c.{k}=t.{k}"))
            .collect::<Vec<_>>()
            .join(" AND ");

        let changes_query = format!(
            "SELECT c.SYS_CHANGE_OPERATION, c.SYS_CHANGE_VERSION, {key_select}{comma}{other_select}
             FROM CHANGETABLE(CHANGES {table}, @p1) c
             LEFT OUTER JOIN {table} t ON {join_cond}
             ORDER BY c.SYS_CHANGE_VERSION",
            key_select = key_select,
            comma = if other_select.is_empty() { "" } else { ", " },
            other_select = other_select,
            table = table.qualified_name,
            join_cond = join_cond,
        );

        info!(
            "extracting changes for {} since version {}",
            table.qualified_name, baseline
        );

        // `tx.as_mut()` yields `&mut PoolConnection<Mssql>`; `&mut **tx`
        // derefs it to the connection the executor impl is on.
        let query = sqlx::query(&changes_query).bind(baseline);
        let mut stream = match tx.as_mut() {
            Some(tx) => query.fetch(&mut **tx),
            None => query.fetch(gateway.pool()),
        };

        let expected_columns = 2 + table.key_columns.len() + table.other_columns.len();

        while let Some(row) = stream.try_next().await.map_err(ExtractError::Query)? {
            if row.len() != expected_columns {
                drop(stream);
                if let Some(conn) = tx.take() {
                    crate::gateway::SqlGateway::rollback(conn).await;
                }
                return Err(ExtractError::ColumnMismatch {
                    table: table.qualified_name.clone(),
                    expected: expected_columns,
                    found: row.len(),
                });
            }

            let op_code: String = row.get("SYS_CHANGE_OPERATION");
            let version: i64 = row.get("SYS_CHANGE_VERSION");

            let operation = match Operation::from_code(&op_code) {
                Some(op) => op,
                None => {
                    warn!(
                        "unrecognized SYS_CHANGE_OPERATION {:?} for {}, skipping row",
                        op_code, table.qualified_name
                    );
                    continue;
                }
            };

            if !snapshot_enabled && version > source_current_version {
                warn!(
                    "discarding row at version {} > source current version {} for {} (no snapshot isolation)",
                    version, source_current_version, table.qualified_name
                );
                continue;
            }

            let keys = table
                .key_columns
                .iter()
                .map(|c| (c.clone(), row.try_get::<String, _>(unbracket(c).as_str()).ok()))
                .collect::<Vec<_>>();
            let others = if operation == Operation::Delete {
                Vec::new()
            } else {
                table
                    .other_columns
                    .iter()
                    .map(|c| (c.clone(), row.try_get::<String, _>(unbracket(c).as_str()).ok()))
                    .collect::<Vec<_>>()
            };

            records.push(ChangeRecord {
                table: table.clone(),
                operation,
                version,
                keys,
                others,
            });
        }
        drop(stream);
    }

    if let Some(conn) = tx.take() {
        crate::gateway::SqlGateway::rollback(conn).await;
    }

    Ok(ChangeBatch {
        source_current_version,
        records,
    })
}

fn unbracket(column: &str) -> String {
    column.trim_matches(['[', ']']).to_string()
}

fn type_of<'a>(types: &'a std::collections::HashMap<String, String>, bracketed_column: &str) -> &'a str {
    types
        .get(&unbracket(bracketed_column))
        .map(String::as_str)
        .unwrap_or("")
}

async fn fetch_column_types(
    gateway: &SqlGateway,
    schema: &str,
    table_name: &str,
) -> Result<std::collections::HashMap<String, String>, ExtractError> {
    let query = format!(
        "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = '{schema}' AND TABLE_NAME = '{table_name}'"
    );
    let rows = gateway.fetch_all(&query).await.map_err(ExtractError::Query)?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("COLUMN_NAME"), r.get::<String, _>("DATA_TYPE")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_columns_are_cast_to_varchar() {
        assert_eq!(
            column_select_expr("c", "[Total]", "decimal"),
            "CAST(c.[Total] AS VARCHAR(100)) AS [Total]"
        );
    }

    #[test]
    fn datetime_columns_are_converted_with_style_126() {
        assert_eq!(
            column_select_expr("t", "[CreatedAt]", "datetime2"),
            "CONVERT(VARCHAR(100), t.[CreatedAt], 126) AS [CreatedAt]"
        );
    }

    #[test]
    fn text_and_ntext_are_cast_to_bounded_varchar() {
        assert_eq!(
            column_select_expr("t", "[Notes]", "text"),
            "CAST(t.[Notes] AS VARCHAR(8000)) AS [Notes]"
        );
        assert_eq!(
            column_select_expr("t", "[Notes]", "ntext"),
            "CAST(t.[Notes] AS NVARCHAR(4000)) AS [Notes]"
        );
    }

    #[test]
    fn ordinary_columns_pass_through_unchanged() {
        assert_eq!(
            column_select_expr("t", "[Name]", "nvarchar"),
            "t.[Name] AS [Name]"
        );
    }

    #[test]
    fn unbracket_strips_delimiters() {
        assert_eq!(unbracket("[Id]"), "Id");
    }
}

//! Metadata Discoverer: enumerates change-tracking-enabled tables on
//! the source and, per table, their key and other columns.

use crate::error::MetadataError;
use crate::gateway::SqlGateway;
use crate::model::TableDescriptor;
use sqlx::Row;
use std::collections::BTreeMap;

// A column can appear in more than one index (a clustered primary key
// also covered by a nonclustered index is common), so the join against
// sys.index_columns is aggregated per column rather than left as-is -
// otherwise a key column yields one catalog row per covering index.
const DISCOVERY_QUERY: &str = "
    SELECT
        s.name AS SchemaName,
        t.name AS TableName,
        c.name AS ColumnName,
        c.column_id AS ColumnId,
        MAX(CASE WHEN ic.index_id IS NULL THEN 0 ELSE 1 END) AS IsKey
    FROM sys.change_tracking_tables ctt
    JOIN sys.tables t ON ctt.object_id = t.object_id
    JOIN sys.schemas s ON t.schema_id = s.schema_id
    JOIN sys.columns c ON c.object_id = t.object_id
    LEFT JOIN sys.index_columns ic
        ON ic.object_id = t.object_id AND ic.column_id = c.column_id
    GROUP BY s.name, t.name, c.name, c.column_id
    ORDER BY s.name, t.name, c.column_id
";

/// One (table, column) row as returned by `DISCOVERY_QUERY`, before
/// grouping. Kept separate from the raw `sqlx` row so the grouping
/// logic below is testable without a live connection.
struct CatalogColumn {
    schema: String,
    table: String,
    column: String,
    is_key: bool,
}

/// Runs the discovery catalog query and returns every replicable
/// table. Tables with zero key columns are returned with an empty
/// `key_columns` list — the caller (the Orchestrator) is responsible
/// for filtering those out and emitting a warning.
pub async fn discover(gateway: &SqlGateway) -> Result<Vec<TableDescriptor>, MetadataError> {
    let rows = sqlx::query(DISCOVERY_QUERY)
        .fetch_all(gateway.pool())
        .await
        .map_err(MetadataError::Query)?;

    let columns = rows
        .iter()
        .map(|row| CatalogColumn {
            schema: row.get("SchemaName"),
            table: row.get("TableName"),
            column: row.get("ColumnName"),
            is_key: row.get::<i32, _>("IsKey") != 0,
        })
        .collect::<Vec<_>>();

    Ok(group_into_tables(columns))
}

/// Groups catalog rows by table and partitions each table's columns
/// into key and other lists, preserving catalog (`column_id`) order
/// within each partition. Pure and unit-testable.
fn group_into_tables(columns: Vec<CatalogColumn>) -> Vec<TableDescriptor> {
    // BTreeMap keeps discovery deterministic (schema, table) order,
    // matching the query's own ORDER BY.
    let mut grouped: BTreeMap<(String, String), TableDescriptor> = BTreeMap::new();

    for col in columns {
        let key = (col.schema.clone(), col.table.clone());
        let entry = grouped.entry(key).or_insert_with(|| TableDescriptor {
            qualified_name: format!("[{}].[{}]", col.schema, col.table),
            key_columns: Vec::new(),
            other_columns: Vec::new(),
        });
        let bracketed = format!("[{}]", col.column);
        if col.is_key {
            entry.key_columns.push(bracketed);
        } else {
            entry.other_columns.push(bracketed);
        }
    }

    grouped.into_values().collect()
}

/// Applies a replication set's optional table-name allowlist,
/// returning the tables that survive and the ones dropped along with
/// why (either "not in allowlist" or "no key columns"). The
/// allowlist, when present, is matched against the qualified
/// unbracketed display form.
pub fn apply_filters(
    tables: Vec<TableDescriptor>,
    allowlist: Option<&[String]>,
) -> (Vec<TableDescriptor>, Vec<(String, &'static str)>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();

    for table in tables {
        let display = table.display_name();

        if let Some(list) = allowlist {
            if !list.iter().any(|name| name == &display) {
                dropped.push((display, "not in table_filter allowlist"));
                continue;
            }
        }

        if table.key_columns.is_empty() {
            dropped.push((display, "table has no key columns"));
            continue;
        }

        kept.push(table);
    }

    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(schema: &str, table: &str, column: &str, is_key: bool) -> CatalogColumn {
        CatalogColumn {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            is_key,
        }
    }

    #[test]
    fn groups_columns_by_table_and_partitions_keys() {
        let rows = vec![
            col("dbo", "Orders", "Id", true),
            col("dbo", "Orders", "CustomerId", false),
            col("dbo", "Orders", "Total", false),
        ];
        let tables = group_into_tables(rows);
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.qualified_name, "[dbo].[Orders]");
        assert_eq!(t.key_columns, vec!["[Id]".to_string()]);
        assert_eq!(
            t.other_columns,
            vec!["[CustomerId]".to_string(), "[Total]".to_string()]
        );
    }

    #[test]
    fn table_with_no_key_columns_is_still_emitted_by_grouping() {
        let rows = vec![col("dbo", "Logs", "Message", false)];
        let tables = group_into_tables(rows);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].key_columns.is_empty());
    }

    #[test]
    fn apply_filters_drops_tables_with_no_key_columns() {
        let tables = vec![TableDescriptor {
            qualified_name: "[dbo].[Logs]".to_string(),
            key_columns: vec![],
            other_columns: vec!["[Message]".to_string()],
        }];
        let (kept, dropped) = apply_filters(tables, None);
        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].1, "table has no key columns");
    }

    #[test]
    fn apply_filters_respects_allowlist_on_qualified_name() {
        let tables = vec![
            TableDescriptor {
                qualified_name: "[dbo].[Orders]".to_string(),
                key_columns: vec!["[Id]".to_string()],
                other_columns: vec![],
            },
            TableDescriptor {
                qualified_name: "[dbo].[Audit]".to_string(),
                key_columns: vec!["[Id]".to_string()],
                other_columns: vec![],
            },
        ];
        let allowlist = vec!["dbo.Orders".to_string()];
        let (kept, dropped) = apply_filters(tables, Some(&allowlist));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].qualified_name, "[dbo].[Orders]");
        assert_eq!(dropped, vec![("dbo.Audit".to_string(), "not in table_filter allowlist")]);
    }

    #[test]
    fn apply_filters_with_no_allowlist_keeps_everything_with_keys() {
        let tables = vec![TableDescriptor {
            qualified_name: "[dbo].[Orders]".to_string(),
            key_columns: vec!["[Id]".to_string()],
            other_columns: vec![],
        }];
        let (kept, dropped) = apply_filters(tables, None);
        assert_eq!(kept.len(), 1);
        assert!(dropped.is_empty());
    }
}

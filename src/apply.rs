//! Change Applier: orders a batch's changes, executes the
//! corresponding DML on one destination, and advances `SyncInfo` as
//! the final statement of the same transaction.

use crate::error::ApplyError;
use crate::gateway::{IsolationLevel, SqlGateway};
use crate::model::{ChangeBatch, ChangeRecord, ColumnValue, Operation};
use crate::version;
use log::info;

/// Sorts a batch's records by `(version, table qualified name)`
/// ascending, matching the source's commit order across tables and
/// giving deterministic replay across runs.
pub fn ordered(mut records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    records.sort_by(|a, b| {
        a.version
            .cmp(&b.version)
            .then_with(|| a.table.qualified_name.cmp(&b.table.qualified_name))
    });
    records
}

/// One generated DML statement plus its ordered bind values, in the
/// same order the statement's placeholders expect.
pub struct Statement {
    pub sql: String,
    pub params: Vec<ColumnValue>,
}

/// Builds the DML for one change record. `IDENTITY_INSERT` is emitted
/// unconditionally around inserts — a no-op for tables without
/// identity columns.
///
/// Returns `None` for an update whose table has no non-key columns:
/// there is nothing to `SET`, so the row is already up to date and no
/// statement needs to reach the destination.
pub fn build_statement(record: &ChangeRecord) -> Option<Statement> {
    let table = &record.table.qualified_name;

    match record.operation {
        Operation::Insert => {
            let all_columns: Vec<&str> = record
                .keys
                .iter()
                .chain(record.others.iter())
                .map(|(name, _)| name.as_str())
                .collect();
            let placeholders: Vec<String> =
                (1..=all_columns.len()).map(|i| format!("@p{i}")).collect();
            let sql = format!(
                "SET IDENTITY_INSERT {table} ON; INSERT INTO {table} ({cols}) VALUES ({vals}); SET IDENTITY_INSERT {table} OFF",
                table = table,
                cols = all_columns.join(", "),
                vals = placeholders.join(", "),
            );
            let params = record
                .keys
                .iter()
                .chain(record.others.iter())
                .map(|(_, v)| v.clone())
                .collect();
            Some(Statement { sql, params })
        }
        Operation::Update => {
            if record.others.is_empty() {
                return None;
            }
            let key_count = record.keys.len();
            let set_clause: Vec<String> = record
                .others
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{name}=@p{}", key_count + i + 1))
                .collect();
            let where_clause: Vec<String> = record
                .keys
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{name}=@p{}", i + 1))
                .collect();
            let sql = format!(
                "UPDATE {table} SET {set} WHERE {where_}",
                table = table,
                set = set_clause.join(", "),
                where_ = where_clause.join(" AND "),
            );
            let params = record
                .keys
                .iter()
                .chain(record.others.iter())
                .map(|(_, v)| v.clone())
                .collect();
            Some(Statement { sql, params })
        }
        Operation::Delete => {
            let where_clause: Vec<String> = record
                .keys
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{name}=@p{}", i + 1))
                .collect();
            let sql = format!(
                "DELETE FROM {table} WHERE {where_}",
                table = table,
                where_ = where_clause.join(" AND "),
            );
            let params = record.keys.iter().map(|(_, v)| v.clone()).collect();
            Some(Statement { sql, params })
        }
    }
}

/// Formats a statement's bound parameters the way dry-run mode logs
/// them: `@0 = <value>, @1 = <value>, ...`, zero-based over the full
/// ordered parameter list, independent of the `@pN` placeholder names
/// used on the wire.
pub fn format_params_for_log(params: &[ColumnValue]) -> String {
    params
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Some(s) => format!("@{i} = {s}"),
            None => format!("@{i} = NULL"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Applies an entire batch to one destination and advances `SyncInfo`
/// atomically. On any failure the transaction is rolled back, leaving
/// the destination at its previous version.
pub async fn apply_batch(
    gateway: &SqlGateway,
    batch: &ChangeBatch,
    dry_run: bool,
) -> Result<(), ApplyError> {
    let records = ordered(batch.records.clone());

    if dry_run {
        for record in &records {
            let Some(stmt) = build_statement(record) else {
                continue;
            };
            info!(
                "[dry-run] {}: {}  params: {}",
                gateway.display_name(),
                stmt.sql,
                format_params_for_log(&stmt.params)
            );
        }
        info!(
            "[dry-run] {} would advance SyncInfo to version {}",
            gateway.display_name(),
            batch.source_current_version
        );
        return Ok(());
    }

    let map_err = |source: sqlx::Error| ApplyError::Transaction {
        destination: gateway.display_name().to_string(),
        source,
    };

    let mut conn = gateway
        .begin_with_isolation(IsolationLevel::ReadUncommitted)
        .await
        .map_err(map_err)?;

    for record in &records {
        let Some(stmt) = build_statement(record) else {
            continue;
        };
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = query.bind(param.clone());
        }
        if let Err(source) = query.execute(&mut *conn).await {
            SqlGateway::rollback(conn).await;
            return Err(map_err(source));
        }
    }

    if let Err(source) = sqlx::query(&version::advance_statement(batch.source_current_version))
        .execute(&mut *conn)
        .await
    {
        SqlGateway::rollback(conn).await;
        return Err(map_err(source));
    }

    SqlGateway::commit(conn).await.map_err(map_err)?;

    info!(
        "applied {} change(s) to {}, advanced to version {}",
        records.len(),
        gateway.display_name(),
        batch.source_current_version
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TableDescriptor;

    fn table(name: &str) -> TableDescriptor {
        TableDescriptor {
            qualified_name: name.to_string(),
            key_columns: vec!["[Id]".to_string()],
            other_columns: vec!["[V]".to_string()],
        }
    }

    fn record(table_name: &str, op: Operation, version: i64, id: &str, v: Option<&str>) -> ChangeRecord {
        ChangeRecord {
            table: table(table_name),
            operation: op,
            version,
            keys: vec![("[Id]".to_string(), Some(id.to_string()))],
            others: v.map(|s| vec![("[V]".to_string(), Some(s.to_string()))]).unwrap_or_default(),
        }
    }

    #[test]
    fn ordered_sorts_by_version_then_table_name() {
        let records = vec![
            record("[dbo].[B]", Operation::Insert, 5, "1", Some("x")),
            record("[dbo].[A]", Operation::Insert, 5, "2", Some("y")),
            record("[dbo].[A]", Operation::Delete, 3, "3", None),
        ];
        let sorted = ordered(records);
        assert_eq!(sorted[0].version, 3);
        assert_eq!(sorted[1].table.qualified_name, "[dbo].[A]");
        assert_eq!(sorted[1].version, 5);
        assert_eq!(sorted[2].table.qualified_name, "[dbo].[B]");
        assert_eq!(sorted[2].version, 5);
    }

    #[test]
    fn insert_wraps_identity_insert() {
        let r = record("[dbo].[T]", Operation::Insert, 6, "42", Some("x"));
        let stmt = build_statement(&r).unwrap();
        assert_eq!(
            stmt.sql,
            "SET IDENTITY_INSERT [dbo].[T] ON; INSERT INTO [dbo].[T] ([Id], [V]) VALUES (@p1, @p2); SET IDENTITY_INSERT [dbo].[T] OFF"
        );
        assert_eq!(stmt.params, vec![Some("42".to_string()), Some("x".to_string())]);
        assert_eq!(format_params_for_log(&stmt.params), "@0 = 42, @1 = x");
    }

    #[test]
    fn update_sets_others_and_filters_on_keys_with_offset_params() {
        let r = record("[dbo].[T]", Operation::Update, 7, "2", Some("y"));
        let stmt = build_statement(&r).unwrap();
        assert_eq!(stmt.sql, "UPDATE [dbo].[T] SET [V]=@p2 WHERE [Id]=@p1");
        assert_eq!(stmt.params, vec![Some("2".to_string()), Some("y".to_string())]);
    }

    #[test]
    fn update_with_no_non_key_columns_produces_no_statement() {
        let r = record("[dbo].[T]", Operation::Update, 7, "2", None);
        assert!(build_statement(&r).is_none());
    }

    #[test]
    fn delete_uses_keys_only() {
        let r = record("[dbo].[T]", Operation::Delete, 8, "1", None);
        let stmt = build_statement(&r).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM [dbo].[T] WHERE [Id]=@p1");
        assert_eq!(stmt.params, vec![Some("1".to_string())]);
    }

    #[test]
    fn ordering_applies_update_before_later_delete() {
        let records = vec![
            record("[dbo].[T]", Operation::Delete, 8, "1", None),
            record("[dbo].[T]", Operation::Update, 7, "2", Some("y")),
        ];
        let sorted = ordered(records);
        assert_eq!(sorted[0].version, 7);
        assert_eq!(sorted[0].operation, Operation::Update);
        assert_eq!(sorted[1].version, 8);
        assert_eq!(sorted[1].operation, Operation::Delete);
    }
}

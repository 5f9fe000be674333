//! Core data model shared by every replication-engine component.
//! Table and column names carry their bracket delimiters from the
//! Metadata Discoverer onward; nothing downstream re-quotes them.

use std::fmt;

/// A change-tracking-enabled table, as discovered on the source.
///
/// Invariant: `key_columns` and `other_columns` are disjoint and
/// together cover every column of the table. A table with no key
/// columns cannot be represented here — the discoverer drops it with
/// a warning before it reaches this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Fully bracket-quoted two-part name, e.g. `[dbo].[Orders]`.
    pub qualified_name: String,
    /// Bracket-quoted key-column names, in catalog order.
    pub key_columns: Vec<String>,
    /// Bracket-quoted non-key column names, in catalog order.
    pub other_columns: Vec<String>,
}

impl TableDescriptor {
    /// The unbracketed display form used for allowlist matching,
    /// e.g. `dbo.Orders`.
    pub fn display_name(&self) -> String {
        self.qualified_name.replace(['[', ']'], "")
    }

    /// Splits `[schema].[table]` into its unbracketed parts, for
    /// catalog queries that filter on `TABLE_SCHEMA`/`TABLE_NAME`
    /// rather than accepting a bracketed identifier directly.
    pub fn schema_and_table(&self) -> (String, String) {
        let display = self.display_name();
        match display.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => (String::new(), display),
        }
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name)
    }
}

/// The kind of row-level change a `ChangeRecord` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Parses the first character of `SYS_CHANGE_OPERATION` (`I`/`U`/`D`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.chars().next()? {
            'I' => Some(Operation::Insert),
            'U' => Some(Operation::Update),
            'D' => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// A single tracked column value, captured untyped: the reader binds
/// whatever SQL Server handed back for that row/column. A `None`
/// means the database returned SQL `NULL` for the column.
pub type ColumnValue = Option<String>;

/// One row-level change extracted from `CHANGETABLE`.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub table: TableDescriptor,
    pub operation: Operation,
    /// Per-row `SYS_CHANGE_VERSION`.
    pub version: i64,
    /// Exactly `table.key_columns`, in the same order, by name.
    pub keys: Vec<(String, ColumnValue)>,
    /// Exactly `table.other_columns`, in the same order, by name.
    /// Absent/ignored for deletes.
    pub others: Vec<(String, ColumnValue)>,
}

/// The extractor's output: an immutable snapshot plus the ordered
/// changes observed up to it. Created by the Extractor, consumed by
/// the Applier, never mutated after construction.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub source_current_version: i64,
    pub records: Vec<ChangeRecord>,
}

/// A destination's bookkeeping version. `-1` is the "bookkeeping
/// unavailable" sentinel; `0` is "never synced".
pub type DestinationVersion = i64;

pub const VERSION_UNAVAILABLE: DestinationVersion = -1;
pub const VERSION_NEVER_SYNCED: DestinationVersion = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_strips_brackets() {
        let t = TableDescriptor {
            qualified_name: "[dbo].[Orders]".to_string(),
            key_columns: vec!["[Id]".to_string()],
            other_columns: vec![],
        };
        assert_eq!(t.display_name(), "dbo.Orders");
    }

    #[test]
    fn schema_and_table_splits_qualified_name() {
        let t = TableDescriptor {
            qualified_name: "[dbo].[Orders]".to_string(),
            key_columns: vec![],
            other_columns: vec![],
        };
        assert_eq!(t.schema_and_table(), ("dbo".to_string(), "Orders".to_string()));
    }

    #[test]
    fn operation_from_code_matches_first_char() {
        assert_eq!(Operation::from_code("I"), Some(Operation::Insert));
        assert_eq!(Operation::from_code("U"), Some(Operation::Update));
        assert_eq!(Operation::from_code("D"), Some(Operation::Delete));
        assert_eq!(Operation::from_code(""), None);
        assert_eq!(Operation::from_code("X"), None);
    }
}

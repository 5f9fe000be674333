//! SQL Gateway: a thin wrapper over one open connection pool to a
//! single SQL Server database. Every other component talks to the
//! database exclusively through this type.

use sqlx::mssql::{Mssql, MssqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::Pool;

/// One open connection to a SQL Server database, with the narrow set
/// of operations the replication engine needs: scalar queries, row
/// fetches, parameterless/parameterized execute, and transactions at
/// a chosen isolation level.
///
/// Closing the pool (dropping the `SqlGateway`) releases the
/// underlying connections on every exit path, including panics and
/// early returns, because `sqlx::Pool` is itself `Drop`-safe.
pub struct SqlGateway {
    pool: Pool<Mssql>,
    display_name: String,
}

impl SqlGateway {
    pub async fn connect(display_name: &str, connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = MssqlPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;
        Ok(Self {
            pool,
            display_name: display_name.to_string(),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn pool(&self) -> &Pool<Mssql> {
        &self.pool
    }

    /// Runs a scalar query, returning `None` if the single result
    /// column was SQL `NULL` or the query produced no row.
    pub async fn scalar_i64(&self, sql: &str) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(sql).fetch_optional(&self.pool).await
    }

    /// Fetches every row for a query with no result-set size limit
    /// assumed by the caller; used for catalog reads.
    pub async fn fetch_all(&self, sql: &str) -> Result<Vec<sqlx::mssql::MssqlRow>, sqlx::Error> {
        sqlx::query(sql).fetch_all(&self.pool).await
    }

    /// Checks a single boolean-ish scalar (used for
    /// `snapshot_isolation_state`, `TableHasIdentity`, etc).
    pub async fn scalar_bool(&self, sql: &str) -> Result<bool, sqlx::Error> {
        let v: Option<i32> = sqlx::query_scalar(sql).fetch_optional(&self.pool).await?;
        Ok(v.unwrap_or(0) != 0)
    }

    /// Executes a statement with no return value expected.
    pub async fn execute(&self, sql: &str) -> Result<(), sqlx::Error> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Opens a transaction against this gateway's connection pool at
    /// the given isolation level.
    ///
    /// SQL Server only accepts `SET TRANSACTION ISOLATION LEVEL` on a
    /// connection with no transaction open, so the isolation level is
    /// set on a freshly acquired connection before `BEGIN TRAN` runs
    /// on that same connection — not, as `sqlx`'s own `Transaction`
    /// type would do it, as the first statement inside one.
    pub async fn begin_with_isolation(
        &self,
        isolation: IsolationLevel,
    ) -> Result<PoolConnection<Mssql>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(isolation.set_statement()).execute(&mut *conn).await?;
        sqlx::query("BEGIN TRAN").execute(&mut *conn).await?;
        Ok(conn)
    }

    /// Commits a transaction opened by [`Self::begin_with_isolation`].
    pub async fn commit(mut conn: PoolConnection<Mssql>) -> Result<(), sqlx::Error> {
        sqlx::query("COMMIT TRAN").execute(&mut *conn).await?;
        Ok(())
    }

    /// Rolls back a transaction opened by [`Self::begin_with_isolation`].
    /// Best-effort: the connection is being discarded regardless, so a
    /// failed rollback is not itself treated as fatal.
    pub async fn rollback(mut conn: PoolConnection<Mssql>) {
        let _ = sqlx::query("ROLLBACK TRAN").execute(&mut *conn).await;
    }
}

/// Transaction isolation levels used by the engine. The Extractor
/// opens a snapshot-isolation transaction on the source when
/// available; the Applier always opens read-uncommitted on the
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Snapshot,
    ReadUncommitted,
}

impl IsolationLevel {
    fn set_statement(self) -> &'static str {
        match self {
            IsolationLevel::Snapshot => "SET TRANSACTION ISOLATION LEVEL SNAPSHOT",
            IsolationLevel::ReadUncommitted => "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_statements_are_explicit() {
        assert_eq!(
            IsolationLevel::Snapshot.set_statement(),
            "SET TRANSACTION ISOLATION LEVEL SNAPSHOT"
        );
        assert_eq!(
            IsolationLevel::ReadUncommitted.set_statement(),
            "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED"
        );
    }
}

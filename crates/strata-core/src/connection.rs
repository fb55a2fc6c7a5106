//! Database access traits.
//!
//! - [`Executor`] - anything that can run SQL: a connection or an open transaction
//! - [`Connection`] - an executor that can start transactions
//! - [`TransactionOps`] - an open transaction that must be committed or rolled back
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! The update pipeline and the migrator are generic over [`Executor`], so the
//! same code runs inside or outside a transaction. Every operation takes a `Cx`
//! for cancellation and returns an asupersync `Outcome`.

use crate::dialect::Dialect;
use crate::row::{ResultSet, Row};
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Transactions can see uncommitted changes from others.
    ReadUncommitted,

    /// Transactions only see committed changes from others.
    /// This is the default for PostgreSQL.
    #[default]
    ReadCommitted,

    /// Transactions see a consistent snapshot of the database.
    RepeatableRead,

    /// Transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Something that can execute SQL against a database.
pub trait Executor: Send + Sync {
    /// The SQL dialect spoken by the underlying database.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a statement (DDL, INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Execute a multi-statement command and return one [`ResultSet`] per
    /// row-returning statement, in statement order.
    ///
    /// Statements that return no rows (plain INSERT/UPDATE/DELETE without
    /// RETURNING) produce no result set.
    fn query_multi(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<ResultSet>, crate::Error>> + Send;
}

/// A database connection that can open transactions.
///
/// # Example
///
/// ```rust,ignore
/// let tx = conn.begin(&cx).await?;
/// tx.execute(&cx, "DELETE FROM \"Blogs\" WHERE \"Id\" = $1", &[Value::Int(1)]).await?;
/// tx.commit(&cx).await?;
/// ```
pub trait Connection: Executor {
    /// The transaction type returned by this connection.
    type Tx<'conn>: TransactionOps
    where
        Self: 'conn;

    /// Begin a transaction with the default isolation level.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, crate::Error>> + Send {
        self.begin_with(cx, IsolationLevel::default())
    }

    /// Begin a transaction with a specific isolation level.
    fn begin_with(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx<'_>, crate::Error>> + Send;
}

/// An open transaction.
///
/// Transactions must be explicitly committed or rolled back; both consume
/// the transaction.
pub trait TransactionOps: Executor {
    /// Commit the transaction, making all changes permanent.
    fn commit(self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;

    /// Rollback the transaction, discarding all changes.
    fn rollback(self, cx: &Cx) -> impl Future<Output = Outcome<(), crate::Error>> + Send;
}

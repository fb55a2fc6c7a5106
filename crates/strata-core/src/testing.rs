//! A scripted, in-memory [`Connection`] for tests.
//!
//! [`ScriptedConnection`] records every statement it is asked to run and
//! answers from a queue of canned [`Scripted`] responses, or from a responder
//! closure when a test needs a stateful fake. With nothing queued it answers
//! with no rows, zero rows affected and no result sets.

use crate::connection::{Connection, Executor, IsolationLevel, TransactionOps};
use crate::dialect::Dialect;
use crate::error::Error;
use crate::row::{ResultSet, Row};
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A canned response for the next statement.
#[derive(Debug)]
pub enum Scripted {
    /// Rows for a query (or a single result set for a multi-statement command).
    Rows(Vec<Row>),
    /// Rows affected for an execute.
    Affected(u64),
    /// Result sets for a multi-statement command.
    ResultSets(Vec<ResultSet>),
    /// Fail the statement.
    Fail(Error),
}

/// Which executor entry point ran a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Query,
    Execute,
    QueryMulti,
}

/// A statement the connection was asked to run.
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    pub kind: CallKind,
    pub sql: String,
    pub params: Vec<Value>,
    pub in_transaction: bool,
}

/// Transaction lifecycle events, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    Begin(IsolationLevel),
    Commit,
    Rollback,
}

type Responder = Box<dyn FnMut(&ExecutedStatement) -> Option<Scripted> + Send>;

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<Scripted>,
    responder: Option<Responder>,
    statements: Vec<ExecutedStatement>,
    events: Vec<TransactionEvent>,
    in_transaction: bool,
}

/// A connection whose responses are scripted by the test.
///
/// Clones share the same script and log.
#[derive(Clone)]
pub struct ScriptedConnection {
    dialect: Dialect,
    state: Arc<Mutex<ScriptState>>,
}

impl std::fmt::Debug for ScriptedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedConnection")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl ScriptedConnection {
    /// Create a connection speaking `dialect` with an empty script.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    /// Answer statements with `responder` first; `None` falls back to the queue.
    #[must_use]
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&ExecutedStatement) -> Option<Scripted> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
        self
    }

    /// Queue a response for the next unanswered statement.
    pub fn push(&self, response: Scripted) {
        self.lock().queue.push_back(response);
    }

    /// All statements run so far.
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.lock().statements.clone()
    }

    /// SQL text of all statements run so far.
    pub fn executed_sql(&self) -> Vec<String> {
        self.lock().statements.iter().map(|s| s.sql.clone()).collect()
    }

    /// Transaction events so far.
    pub fn events(&self) -> Vec<TransactionEvent> {
        self.lock().events.clone()
    }

    /// Is a transaction currently open?
    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(&self, kind: CallKind, sql: &str, params: &[Value]) -> Option<Scripted> {
        let mut state = self.lock();
        let statement = ExecutedStatement {
            kind,
            sql: sql.to_string(),
            params: params.to_vec(),
            in_transaction: state.in_transaction,
        };
        tracing::trace!(
            sql = %statement.sql,
            params = statement.params.len(),
            in_transaction = statement.in_transaction,
            "Scripted statement"
        );

        let mut response = None;
        if let Some(responder) = state.responder.as_mut() {
            response = responder(&statement);
        }
        if response.is_none() {
            response = state.queue.pop_front();
        }
        state.statements.push(statement);
        response
    }

    fn record(&self, event: TransactionEvent) {
        let mut state = self.lock();
        state.in_transaction = matches!(event, TransactionEvent::Begin(_));
        state.events.push(event);
    }

    fn answer_query(&self, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        match self.respond(CallKind::Query, sql, params) {
            None | Some(Scripted::Affected(_)) => Outcome::Ok(Vec::new()),
            Some(Scripted::Rows(rows)) => Outcome::Ok(rows),
            Some(Scripted::ResultSets(sets)) => {
                Outcome::Ok(sets.into_iter().flat_map(ResultSet::into_rows).collect())
            }
            Some(Scripted::Fail(e)) => Outcome::Err(e),
        }
    }

    fn answer_execute(&self, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        match self.respond(CallKind::Execute, sql, params) {
            None | Some(Scripted::ResultSets(_)) => Outcome::Ok(0),
            Some(Scripted::Affected(n)) => Outcome::Ok(n),
            Some(Scripted::Rows(rows)) => Outcome::Ok(rows.len() as u64),
            Some(Scripted::Fail(e)) => Outcome::Err(e),
        }
    }

    fn answer_multi(&self, sql: &str, params: &[Value]) -> Outcome<Vec<ResultSet>, Error> {
        match self.respond(CallKind::QueryMulti, sql, params) {
            None | Some(Scripted::Affected(_)) => Outcome::Ok(Vec::new()),
            Some(Scripted::ResultSets(sets)) => Outcome::Ok(sets),
            Some(Scripted::Rows(rows)) => Outcome::Ok(vec![ResultSet::from_rows(rows)]),
            Some(Scripted::Fail(e)) => Outcome::Err(e),
        }
    }
}

impl Executor for ScriptedConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.answer_query(sql, params);
        async move { result }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.answer_execute(sql, params);
        async move { result }
    }

    fn query_multi(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<ResultSet>, Error>> + Send {
        let result = self.answer_multi(sql, params);
        async move { result }
    }
}

impl Connection for ScriptedConnection {
    type Tx<'conn>
        = ScriptedTransaction
    where
        Self: 'conn;

    fn begin_with(
        &self,
        _cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        self.record(TransactionEvent::Begin(isolation));
        let tx = ScriptedTransaction { conn: self.clone() };
        async move { Outcome::Ok(tx) }
    }
}

/// A transaction on a [`ScriptedConnection`]; shares its script and log.
#[derive(Debug)]
pub struct ScriptedTransaction {
    conn: ScriptedConnection,
}

impl Executor for ScriptedTransaction {
    fn dialect(&self) -> Dialect {
        self.conn.dialect
    }

    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.conn.query(cx, sql, params)
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.conn.execute(cx, sql, params)
    }

    fn query_multi(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<ResultSet>, Error>> + Send {
        self.conn.query_multi(cx, sql, params)
    }
}

impl TransactionOps for ScriptedTransaction {
    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.conn.record(TransactionEvent::Commit);
        async { Outcome::Ok(()) }
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.conn.record(TransactionEvent::Rollback);
        async { Outcome::Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    #[test]
    fn test_queue_then_defaults() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = ScriptedConnection::new(Dialect::Postgres);
        conn.push(Scripted::Affected(3));

        rt.block_on(async {
            assert_eq!(unwrap_outcome(conn.execute(&cx, "DELETE FROM t", &[]).await), 3);
            assert_eq!(unwrap_outcome(conn.execute(&cx, "DELETE FROM t", &[]).await), 0);
            assert!(unwrap_outcome(conn.query_multi(&cx, "SELECT 1", &[]).await).is_empty());
        });
        assert_eq!(conn.statements().len(), 3);
    }

    #[test]
    fn test_transaction_events_and_flags() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = ScriptedConnection::new(Dialect::Sqlite);

        rt.block_on(async {
            let tx = unwrap_outcome(conn.begin(&cx).await);
            unwrap_outcome(tx.execute(&cx, "INSERT INTO t VALUES (1)", &[]).await);
            unwrap_outcome(tx.commit(&cx).await);
            unwrap_outcome(conn.execute(&cx, "SELECT 1", &[]).await);
        });

        let statements = conn.statements();
        assert!(statements[0].in_transaction);
        assert!(!statements[1].in_transaction);
        assert_eq!(
            conn.events(),
            vec![
                TransactionEvent::Begin(IsolationLevel::ReadCommitted),
                TransactionEvent::Commit
            ]
        );
    }

    #[test]
    fn test_responder_takes_precedence() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = ScriptedConnection::new(Dialect::Postgres).with_responder(|stmt| {
            stmt.sql
                .starts_with("SELECT")
                .then(|| Scripted::Rows(vec![Row::new(vec!["x".into()], vec![Value::Int(1)])]))
        });
        conn.push(Scripted::Affected(9));

        rt.block_on(async {
            let rows = unwrap_outcome(conn.query(&cx, "SELECT x", &[]).await);
            assert_eq!(rows.len(), 1);
            assert_eq!(unwrap_outcome(conn.execute(&cx, "UPDATE t", &[]).await), 9);
        });
    }
}

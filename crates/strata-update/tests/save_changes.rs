//! Saving entries end to end against a scripted connection.

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use std::sync::Arc;
use strata_core::testing::{CallKind, Scripted, ScriptedConnection, TransactionEvent};
use strata_core::{
    Dialect, Error, IsolationLevel, ResultSet, Result, UpdateErrorKind, Value, ValueKind,
};
use strata_update::{
    BatchExecutor, BatchPreparer, CommandRendering, EntityMapping, EntityState,
    ModificationCommand, ParameterBuffer, PropertyMapping, ResultSetMapping,
    ReturningUpdateSqlGenerator, SaveBehavior, UpdateEntry, UpdateOptions, UpdateSqlGenerator,
};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Err(e) => e,
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn blog() -> Arc<EntityMapping> {
    EntityMapping::new("Blog", "Blogs")
        .property(PropertyMapping::new("Id", "integer", ValueKind::Int32).key().identity())
        .property(PropertyMapping::new("Name", "text", ValueKind::String))
        .build()
}

fn added(mapping: &Arc<EntityMapping>, name: &str) -> UpdateEntry {
    UpdateEntry::new(Arc::clone(mapping), EntityState::Added)
        .with_values([("Name", Value::Text(name.to_string()))])
        .unwrap()
}

fn deleted(mapping: &Arc<EntityMapping>, id: i32) -> UpdateEntry {
    UpdateEntry::new(Arc::clone(mapping), EntityState::Deleted)
        .with_values([("Id", Value::Int(id)), ("Name", Value::from("old"))])
        .unwrap()
}

fn renamed(mapping: &Arc<EntityMapping>, id: i32, name: &str) -> UpdateEntry {
    let mut entry = UpdateEntry::new(Arc::clone(mapping), EntityState::Modified)
        .with_values([("Id", Value::Int(id)), ("Name", Value::from("old"))])
        .unwrap();
    entry.set("Name", name).unwrap();
    entry
}

fn ids(values: &[i32]) -> ResultSet {
    ResultSet::new(
        vec!["Id".into()],
        values.iter().map(|id| vec![Value::Int(*id)]).collect(),
    )
}

fn sentinel() -> ResultSet {
    ResultSet::scalar("?column?", Value::Int(1))
}

fn executor(dialect: Dialect, options: UpdateOptions) -> BatchExecutor {
    BatchExecutor::new(BatchPreparer::for_dialect(dialect, options).unwrap())
}

// ==================== RETURNING Tests ====================

#[test]
fn save_changes_propagates_generated_keys() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);
    conn.push(Scripted::ResultSets(vec![sentinel(), ids(&[1, 2])]));

    let mapping = blog();
    let mut saved = vec![added(&mapping, "a"), added(&mapping, "b"), deleted(&mapping, 9)];
    let executor = executor(Dialect::Postgres, UpdateOptions::default());

    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    let statements = conn.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].kind, CallKind::QueryMulti);
    assert_eq!(
        statements[0].sql,
        "DELETE FROM \"Blogs\"\nWHERE \"Id\" = $1\nRETURNING 1;\n\
         INSERT INTO \"Blogs\" (\"Name\")\nVALUES ($2),\n($3)\nRETURNING \"Id\";\n"
    );
    assert_eq!(
        statements[0].params,
        vec![Value::Int(9), Value::from("a"), Value::from("b")]
    );
    assert!(statements[0].in_transaction);
    assert_eq!(
        conn.events(),
        vec![
            TransactionEvent::Begin(IsolationLevel::ReadCommitted),
            TransactionEvent::Commit
        ]
    );

    let summary: Vec<(usize, EntityState, Option<Value>)> = saved
        .iter()
        .map(|e| (e.ordinal(), e.state(), e.get("Id").cloned()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0, EntityState::Unchanged, Some(Value::Int(1))),
            (1, EntityState::Unchanged, Some(Value::Int(2))),
            (2, EntityState::Detached, Some(Value::Int(9))),
        ]
    );
}

#[test]
fn single_command_runs_without_transaction() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Sqlite);
    conn.push(Scripted::ResultSets(vec![sentinel()]));

    let mapping = blog();
    let executor = executor(Dialect::Sqlite, UpdateOptions::default());
    let mut saved = vec![renamed(&mapping, 4, "new")];
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    assert!(conn.events().is_empty());
    assert_eq!(saved[0].state(), EntityState::Unchanged);
    assert_eq!(saved[0].get("Name"), Some(&Value::from("new")));
    assert_eq!(saved[0].original_value(1), &Value::from("new"));
}

#[test]
fn unchanged_entries_are_returned_untouched() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);

    let mapping = blog();
    let unchanged = UpdateEntry::new(Arc::clone(&mapping), EntityState::Unchanged)
        .with_values([("Id", 3)])
        .unwrap();
    let executor = executor(Dialect::Postgres, UpdateOptions::default());
    let mut saved = vec![unchanged];
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    assert!(conn.statements().is_empty());
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].state(), EntityState::Unchanged);
}

#[test]
fn sqlite_inserts_map_each_statement_to_its_own_row() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Sqlite);
    conn.push(Scripted::ResultSets(vec![ids(&[2]), ids(&[1])]));

    let mapping = blog();
    let executor = executor(Dialect::Sqlite, UpdateOptions::default());
    let mut saved = vec![added(&mapping, "a"), added(&mapping, "b")];
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    let statements = conn.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(
        statements[0].sql,
        "INSERT INTO \"Blogs\" (\"Name\")\nVALUES (?1)\nRETURNING \"Id\";\n\
         INSERT INTO \"Blogs\" (\"Name\")\nVALUES (?2)\nRETURNING \"Id\";\n"
    );

    let keys: Vec<(Option<Value>, Option<Value>)> = saved
        .iter()
        .map(|e| (e.get("Name").cloned(), e.get("Id").cloned()))
        .collect();
    assert_eq!(
        keys,
        vec![
            (Some(Value::from("a")), Some(Value::Int(2))),
            (Some(Value::from("b")), Some(Value::Int(1))),
        ]
    );
}

#[test]
fn modified_entry_without_changes_runs_no_sql() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);

    let mapping = blog();
    let untouched = UpdateEntry::new(Arc::clone(&mapping), EntityState::Modified)
        .with_values([("Id", Value::Int(1)), ("Name", Value::from("x"))])
        .unwrap();
    let executor = executor(Dialect::Postgres, UpdateOptions::default());
    let mut saved = vec![untouched];
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    assert!(conn.statements().is_empty());
    assert!(conn.events().is_empty());
    assert_eq!(saved[0].state(), EntityState::Unchanged);
    assert_eq!(saved[0].get("Name"), Some(&Value::from("x")));
}

#[test]
fn ignored_after_save_property_leaves_nothing_to_update() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);

    let mapping = EntityMapping::new("Blog", "Blogs")
        .property(PropertyMapping::new("Id", "integer", ValueKind::Int32).key())
        .property(
            PropertyMapping::new("Created", "text", ValueKind::String)
                .after_save(SaveBehavior::Ignore),
        )
        .build();
    let mut entry = UpdateEntry::new(mapping, EntityState::Modified)
        .with_values([("Id", Value::Int(1)), ("Created", Value::from("monday"))])
        .unwrap();
    entry.set("Created", "tuesday").unwrap();

    let executor = executor(Dialect::Postgres, UpdateOptions::default());
    let mut saved = vec![entry, renamed(&blog(), 2, "kept")];
    conn.push(Scripted::ResultSets(vec![sentinel()]));
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    let sql = conn.executed_sql();
    assert_eq!(sql.len(), 1);
    assert!(sql[0].starts_with("UPDATE \"Blogs\" SET \"Name\""), "{}", sql[0]);
    assert!(saved.iter().all(|e| e.state() == EntityState::Unchanged));
}

// ==================== Failure Tests ====================

#[test]
fn zero_rows_affected_is_a_concurrency_failure_and_rolls_back() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);
    conn.push(Scripted::ResultSets(vec![sentinel()]));
    conn.push(Scripted::ResultSets(vec![ResultSet::empty(vec!["?column?".into()])]));

    let mapping = blog();
    let mut entries = vec![renamed(&mapping, 1, "x"), renamed(&mapping, 2, "y")];
    let executor = executor(Dialect::Postgres, UpdateOptions::default().with_max_batch_size(1));

    let err = rt.block_on(async { expect_err(executor.save_changes(&cx, &conn, &mut entries).await) });

    assert!(err.is_concurrency_failure());
    assert_eq!(err.entries().len(), 1);
    assert_eq!(err.entries()[0].ordinal, 1);
    assert_eq!(err.entries()[0].key, vec![Value::Int(2)]);
    assert!(err.to_string().contains(
        "expected to affect 1 row(s), but actually affected 0 row(s); data may have been modified or deleted"
    ));
    assert_eq!(
        conn.events(),
        vec![
            TransactionEvent::Begin(IsolationLevel::ReadCommitted),
            TransactionEvent::Rollback
        ]
    );
}

#[test]
fn failed_save_leaves_entries_ready_to_retry() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);
    conn.push(Scripted::ResultSets(vec![ResultSet::empty(vec!["?column?".into()])]));
    conn.push(Scripted::ResultSets(vec![sentinel()]));

    let mapping = blog();
    let mut entries = vec![renamed(&mapping, 1, "x")];
    let executor = executor(Dialect::Postgres, UpdateOptions::default());

    let err = rt.block_on(async { expect_err(executor.save_changes(&cx, &conn, &mut entries).await) });
    assert!(err.is_concurrency_failure());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state(), EntityState::Modified);
    assert_eq!(entries[0].get("Name"), Some(&Value::from("x")));
    assert_eq!(entries[0].original_value(1), &Value::from("old"));

    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut entries).await) });
    assert_eq!(entries[0].state(), EntityState::Unchanged);
    assert_eq!(conn.statements().len(), 2);
    assert_eq!(conn.statements()[0].sql, conn.statements()[1].sql);
}

#[test]
fn database_errors_are_wrapped_with_batch_entries() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);
    conn.push(Scripted::Fail(Error::Custom("disk full".into())));

    let mapping = blog();
    let executor = executor(Dialect::Postgres, UpdateOptions::default());
    let err = rt.block_on(async {
        expect_err(
            executor
                .save_changes(&cx, &conn, &mut [deleted(&mapping, 5)])
                .await,
        )
    });

    match err {
        Error::Update(update) => {
            assert_eq!(update.kind, UpdateErrorKind::Store);
            assert_eq!(update.entries.len(), 1);
            let source = update.source.expect("wrapped error keeps its cause");
            assert!(source.to_string().contains("disk full"));
        }
        other => panic!("expected a store error, got {other:?}"),
    }
}

#[test]
fn shared_column_conflict_fails_before_any_sql() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);

    let order = EntityMapping::new("Order", "Orders")
        .property(PropertyMapping::new("Id", "integer", ValueKind::Int32).key())
        .property(PropertyMapping::new("Status", "text", ValueKind::String))
        .build();
    let details = EntityMapping::new("OrderDetails", "Orders")
        .dependent(false)
        .property(PropertyMapping::new("Id", "integer", ValueKind::Int32).key())
        .property(PropertyMapping::new("Status", "text", ValueKind::String))
        .build();
    let mut main = UpdateEntry::new(order, EntityState::Modified)
        .with_values([("Id", Value::Int(1)), ("Status", Value::from("open"))])
        .unwrap();
    main.set("Status", "paid").unwrap();
    let mut dependent = UpdateEntry::new(details, EntityState::Modified)
        .with_values([("Id", Value::Int(1)), ("Status", Value::from("open"))])
        .unwrap();
    dependent.set("Status", "void").unwrap();

    let executor = executor(
        Dialect::Postgres,
        UpdateOptions::default().with_sensitive_logging(true),
    );
    let err = rt.block_on(async {
        expect_err(executor.save_changes(&cx, &conn, &mut [main, dependent]).await)
    });

    match &err {
        Error::Update(update) => assert_eq!(update.kind, UpdateErrorKind::DataConflict),
        other => panic!("expected a data conflict, got {other:?}"),
    }
    assert!(err.to_string().contains("'{Status: 'paid'}' and '{Status: 'void'}'"));
    assert!(conn.statements().is_empty());
}

// ==================== SELECT-after Tests ====================

#[test]
fn mysql_insert_selects_identity_inside_transaction() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Mysql);
    conn.push(Scripted::ResultSets(vec![ids(&[7])]));

    let mapping = blog();
    let executor = executor(Dialect::Mysql, UpdateOptions::default());
    let mut saved = vec![added(&mapping, "Ada")];
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    assert_eq!(saved[0].get("Id"), Some(&Value::Int(7)));
    let statements = conn.statements();
    assert!(statements[0].in_transaction);
    assert!(statements[0].sql.contains("LAST_INSERT_ID()"));
    assert_eq!(
        conn.events(),
        vec![
            TransactionEvent::Begin(IsolationLevel::ReadCommitted),
            TransactionEvent::Commit
        ]
    );
}

#[test]
fn mysql_rows_affected_mismatch() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Mysql);
    conn.push(Scripted::ResultSets(vec![ResultSet::scalar(
        "ROW_COUNT()",
        Value::BigInt(0),
    )]));

    let mapping = blog();
    let executor = executor(Dialect::Mysql, UpdateOptions::default());
    let err = rt.block_on(async {
        expect_err(
            executor
                .save_changes(&cx, &conn, &mut [deleted(&mapping, 3)])
                .await,
        )
    });
    assert!(err.is_concurrency_failure());
    assert_eq!(err.entries()[0].key, vec![Value::Int(3)]);
}

// ==================== Positional Mapping Tests ====================

/// Renders multi-row inserts whose returned rows may come back in any order,
/// each tagged with the position of its command.
#[derive(Debug)]
struct PositionalInsertGenerator {
    inner: ReturningUpdateSqlGenerator,
}

impl UpdateSqlGenerator for PositionalInsertGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn append_insert_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        self.inner.append_insert_operation(sql, command, position, params)
    }

    fn append_update_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        self.inner.append_update_operation(sql, command, position, params)
    }

    fn append_delete_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        self.inner.append_delete_operation(sql, command, position, params)
    }

    fn supports_bulk_insert(&self) -> bool {
        true
    }

    fn append_bulk_insert_operation(
        &self,
        sql: &mut String,
        commands: &mut [ModificationCommand],
        _position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<Vec<CommandRendering>> {
        sql.push_str("MERGE INTO \"Blogs\" USING (VALUES ");
        for (i, command) in commands.iter_mut().enumerate() {
            let view = command.view()?;
            if i > 0 {
                sql.push_str(", ");
            }
            let name = view.write_columns().next().map_or(Value::Null, |c| view.value(c).clone());
            let placeholder = params.bind(&format!("row{i}"), &name);
            sql.push_str(&format!("({placeholder}, {i})"));
        }
        sql.push_str(") AS i (\"Name\", _Position) ON FALSE\n");
        sql.push_str("WHEN NOT MATCHED THEN INSERT (\"Name\") VALUES (i.\"Name\")\n");
        sql.push_str("RETURNING \"Id\", i._Position;\n");

        let positional = ResultSetMapping::IS_POSITIONAL_RESULT_MAPPING_ENABLED;
        let mut renderings: Vec<CommandRendering> = (0..commands.len())
            .map(|_| CommandRendering::new(ResultSetMapping::NOT_LAST_IN_RESULT_SET | positional))
            .collect();
        if let Some(last) = renderings.last_mut() {
            *last = CommandRendering::new(ResultSetMapping::LAST_IN_RESULT_SET | positional);
        }
        Ok(renderings)
    }
}

#[test]
fn positional_rows_are_matched_by_trailing_ordinal() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Postgres);
    conn.push(Scripted::ResultSets(vec![ResultSet::new(
        vec!["Id".into(), "_Position".into()],
        vec![
            vec![Value::Int(21), Value::Int(2)],
            vec![Value::Int(19), Value::Int(0)],
            vec![Value::Int(20), Value::Int(1)],
        ],
    )]));

    let generator = Arc::new(PositionalInsertGenerator {
        inner: ReturningUpdateSqlGenerator::new(Dialect::Postgres),
    });
    let preparer = BatchPreparer::new(generator, UpdateOptions::default()).unwrap();
    let executor = BatchExecutor::new(preparer);

    let mapping = blog();
    let mut saved = vec![added(&mapping, "a"), added(&mapping, "b"), added(&mapping, "c")];
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    let keys: Vec<(Option<Value>, Option<Value>)> = saved
        .iter()
        .map(|e| (e.get("Name").cloned(), e.get("Id").cloned()))
        .collect();
    assert_eq!(
        keys,
        vec![
            (Some(Value::from("a")), Some(Value::Int(19))),
            (Some(Value::from("b")), Some(Value::Int(20))),
            (Some(Value::from("c")), Some(Value::Int(21))),
        ]
    );
    assert!(conn.executed_sql()[0].starts_with("MERGE INTO"));
}

//! Migrations and saving changes through the facade.

use asupersync::runtime::RuntimeBuilder;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strata::prelude::*;
use strata_core::testing::{ExecutedStatement, Scripted, ScriptedConnection, TransactionEvent};
use strata::{ResultSet, generator_for_dialect};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn blogs() -> MigrationOperation {
    MigrationOperation::CreateTable(
        CreateTableOperation::new("Blogs")
            .column(ColumnDefinition::new("Id", ValueKind::Int32).identity())
            .column(ColumnDefinition::new("Name", ValueKind::String).nullable())
            .primary_key("PK_Blogs", &["Id"]),
    )
}

// ============================================================================
// Create Table
// ============================================================================

#[test]
fn blogs_render_as_one_create_table_command() {
    for dialect in [Dialect::Postgres, Dialect::Sqlite, Dialect::Mysql] {
        let commands = generator_for_dialect(dialect)
            .generate(&[blogs()], None, &MigrationsSqlGenerationOptions::default())
            .unwrap();
        assert_eq!(commands.len(), 1, "{dialect}");

        let text = commands[0].command_text();
        assert!(text.starts_with(&format!("CREATE TABLE {} (", dialect.quote_identifier("Blogs"))));
        assert!(text.contains("PRIMARY KEY"), "{text}");
        assert!(text.ends_with(";\n"), "{text}");
        assert_eq!(text.matches(';').count(), 1, "{text}");
        assert!(!commands[0].transaction_suppressed());
    }
}

#[test]
fn postgres_blogs_table() {
    let commands = generator_for_dialect(Dialect::Postgres)
        .generate(&[blogs()], None, &MigrationsSqlGenerationOptions::default())
        .unwrap();
    let text = commands[0].command_text();
    assert!(text.contains("\"Id\" integer NOT NULL GENERATED BY DEFAULT AS IDENTITY"), "{text}");
    assert!(text.contains("    \"Name\" text,\n"), "{text}");
    assert!(text.contains("CONSTRAINT \"PK_Blogs\" PRIMARY KEY (\"Id\")"), "{text}");
}

// ============================================================================
// Diff Then Generate
// ============================================================================

#[test]
fn diff_then_generate_is_idempotent() {
    let target = RelationalModel::from_operations(&[blogs()]).unwrap();
    let differ = ModelDiffer::new();

    let operations = differ.diff(&RelationalModel::new(), &target);
    assert_eq!(operations.len(), 1);
    assert!(matches!(&operations[0], MigrationOperation::CreateTable(t) if t.name == "Blogs"));

    let commands = generator_for_dialect(Dialect::Postgres)
        .generate(&operations, Some(&target), &MigrationsSqlGenerationOptions::default())
        .unwrap();
    assert_eq!(commands.len(), 1);

    let replayed = RelationalModel::from_operations(&operations).unwrap();
    assert!(differ.diff(&replayed, &target).is_empty());
    assert!(!differ.has_differences(&replayed, &target));
}

// ============================================================================
// Migrate Then Save
// ============================================================================

#[test]
fn migrate_then_save_a_blog() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let migrator = Migrator::new(Dialect::Postgres)
        .with_migration(Migration::new("20240101000000_CreateBlogs").up(vec![blogs()]))
        .unwrap();
    // The ledger exists once its CREATE TABLE has run.
    let created = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&created);
    let conn = ScriptedConnection::new(Dialect::Postgres).with_responder(move |stmt: &ExecutedStatement| {
        if stmt.sql.starts_with("CREATE TABLE \"__EFMigrationsHistory\"") {
            flag.store(true, Ordering::SeqCst);
        }
        stmt.sql.contains("pg_catalog.pg_class").then(|| {
            let exists = Value::Bool(flag.load(Ordering::SeqCst));
            Scripted::Rows(vec![Row::new(vec!["exists".into()], vec![exists])])
        })
    });

    rt.block_on(async { unwrap_outcome(migrator.migrate(&cx, &conn, None).await) });
    let sql = conn.executed_sql();
    assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE \"__EFMigrationsHistory\"")));
    assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE \"Blogs\"")));
    assert!(sql.iter().any(|s| s.contains("'20240101000000_CreateBlogs'")));
    assert!(created.load(Ordering::SeqCst));
    assert_eq!(
        conn.events().iter().filter(|e| **e == TransactionEvent::Commit).count(),
        2
    );

    let mapping = EntityMapping::new("Blog", "Blogs")
        .property(PropertyMapping::new("Id", "integer", ValueKind::Int32).key().identity())
        .property(PropertyMapping::new("Name", "text", ValueKind::String))
        .build();
    let entry = UpdateEntry::new(Arc::clone(&mapping), EntityState::Added)
        .with_values([("Name", Value::from("strata"))])
        .unwrap();

    let conn = ScriptedConnection::new(Dialect::Postgres);
    conn.push(Scripted::ResultSets(vec![ResultSet::new(
        vec!["Id".into()],
        vec![vec![Value::Int(1)]],
    )]));
    let executor = BatchExecutor::new(
        BatchPreparer::for_dialect(Dialect::Postgres, UpdateOptions::default()).unwrap(),
    );
    let mut saved = vec![entry];
    rt.block_on(async { unwrap_outcome(executor.save_changes(&cx, &conn, &mut saved).await) });

    assert_eq!(
        conn.executed_sql(),
        vec!["INSERT INTO \"Blogs\" (\"Name\")\nVALUES ($1)\nRETURNING \"Id\";\n"]
    );
    assert_eq!(saved[0].state(), EntityState::Unchanged);
    assert_eq!(saved[0].get("Id"), Some(&Value::Int(1)));
}

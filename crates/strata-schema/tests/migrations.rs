//! Migrations end to end against a scripted connection that keeps a ledger.

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use strata_core::testing::{ExecutedStatement, Scripted, ScriptedConnection, TransactionEvent};
use strata_core::{Dialect, Error, Executor, Row, Value, ValueKind};
use strata_schema::{
    ColumnDefinition, CreateTableOperation, DropTableOperation, HistoryRepository,
    HistoryRepositoryOptions, HistoryRow, INITIAL_TARGET, Migration, MigrationOperation,
    MigrationsSqlGenerationOptions, Migrator, SqlOperation,
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

const LEDGER: &str = "\"__EFMigrationsHistory\"";

/// The ledger a SQLite database would hold, driven by the SQL it receives.
#[derive(Debug, Default)]
struct Ledger {
    exists: bool,
    rows: BTreeSet<String>,
}

fn between<'a>(sql: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = sql.find(start)? + start.len();
    let to = from + sql[from..].find(end)?;
    Some(&sql[from..to])
}

fn ledger_connection(fail_on: Option<&'static str>) -> (ScriptedConnection, Arc<Mutex<Ledger>>) {
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let state = Arc::clone(&ledger);
    let conn = ScriptedConnection::new(Dialect::Sqlite).with_responder(move |stmt: &ExecutedStatement| {
        let mut ledger = state.lock().unwrap();
        let sql = stmt.sql.as_str();
        if let Some(marker) = fail_on {
            if sql.contains(marker) {
                return Some(Scripted::Fail(Error::Custom(format!("cannot run {marker}"))));
            }
        }
        if sql.contains("sqlite_master") {
            let count = i64::from(ledger.exists);
            return Some(Scripted::Rows(vec![Row::new(vec!["COUNT(*)".into()], vec![Value::BigInt(count)])]));
        }
        if sql.contains(&format!("CREATE TABLE {LEDGER}")) || sql.contains(&format!("CREATE TABLE IF NOT EXISTS {LEDGER}")) {
            ledger.exists = true;
            return Some(Scripted::Affected(0));
        }
        if sql.starts_with(&format!("INSERT INTO {LEDGER}")) {
            let id = between(sql, "VALUES ('", "'")?;
            ledger.rows.insert(id.to_string());
            return Some(Scripted::Affected(1));
        }
        if sql.starts_with(&format!("DELETE FROM {LEDGER}")) {
            let id = between(sql, "= '", "'")?;
            let removed = ledger.rows.remove(id);
            return Some(Scripted::Affected(u64::from(removed)));
        }
        if sql.starts_with("SELECT \"MigrationId\"") {
            let names = vec!["MigrationId".to_string(), "ProductVersion".to_string()];
            let rows = ledger
                .rows
                .iter()
                .map(|id| Row::new(names.clone(), vec![Value::Text(id.clone()), Value::Text("strata/test".into())]))
                .collect();
            return Some(Scripted::Rows(rows));
        }
        None
    });
    (conn, ledger)
}

fn create_blogs() -> Migration {
    Migration::new("20240101000000_CreateBlogs")
        .up(vec![MigrationOperation::CreateTable(
            CreateTableOperation::new("Blogs")
                .column(ColumnDefinition::new("Id", ValueKind::Int32).identity())
                .column(ColumnDefinition::new("Name", ValueKind::String).nullable())
                .primary_key("PK_Blogs", &["Id"]),
        )])
        .down(vec![MigrationOperation::DropTable(DropTableOperation {
            name: "Blogs".into(),
            ..DropTableOperation::default()
        })])
}

fn index_blogs() -> Migration {
    Migration::new("20240201000000_IndexBlogs")
        .up(vec![MigrationOperation::Sql(SqlOperation {
            sql: "CREATE INDEX \"IX_Blogs_Name\" ON \"Blogs\" (\"Name\");".into(),
            ..SqlOperation::default()
        })])
        .down(vec![MigrationOperation::Sql(SqlOperation {
            sql: "DROP INDEX \"IX_Blogs_Name\";".into(),
            ..SqlOperation::default()
        })])
}

fn migrator() -> Migrator {
    Migrator::new(Dialect::Sqlite)
        .with_migration(index_blogs())
        .unwrap()
        .with_migration(create_blogs())
        .unwrap()
}

// ============================================================================
// History Repository
// ============================================================================

#[test]
fn history_round_trip() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (conn, _ledger) = ledger_connection(None);
    let history = HistoryRepository::new(Dialect::Sqlite, HistoryRepositoryOptions::default());

    rt.block_on(async {
        assert!(!unwrap_outcome(history.exists(&cx, &conn).await));
        assert!(unwrap_outcome(history.get_applied_migrations(&cx, &conn).await).is_empty());

        for command in history.get_create_commands().unwrap() {
            unwrap_outcome(command.execute(&cx, &conn).await);
        }
        assert!(unwrap_outcome(history.exists(&cx, &conn).await));

        let row = HistoryRow::new("20240101000000_CreateBlogs", "strata/test");
        let insert = history.get_insert_script(&row).unwrap();
        unwrap_outcome(conn.execute(&cx, &insert, &[]).await);
        assert_eq!(unwrap_outcome(history.get_applied_migrations(&cx, &conn).await), vec![row]);

        let delete = history.get_delete_script("20240101000000_CreateBlogs").unwrap();
        unwrap_outcome(conn.execute(&cx, &delete, &[]).await);
        assert!(unwrap_outcome(history.get_applied_migrations(&cx, &conn).await).is_empty());
    });
}

// ============================================================================
// Migrator
// ============================================================================

#[test]
fn migrate_applies_then_reverts_everything() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (conn, ledger) = ledger_connection(None);
    let migrator = migrator();

    rt.block_on(async {
        assert_eq!(
            unwrap_outcome(migrator.pending_migrations(&cx, &conn).await),
            vec!["20240101000000_CreateBlogs", "20240201000000_IndexBlogs"]
        );

        unwrap_outcome(migrator.migrate(&cx, &conn, None).await);
        assert!(unwrap_outcome(migrator.pending_migrations(&cx, &conn).await).is_empty());
        assert_eq!(ledger.lock().unwrap().rows.len(), 2);

        let sql = conn.executed_sql();
        let create = sql.iter().position(|s| s.starts_with("CREATE TABLE \"Blogs\"")).unwrap();
        let index = sql.iter().position(|s| s.starts_with("CREATE INDEX")).unwrap();
        assert!(create < index);

        // History table, then one transaction per migration.
        let events = conn.events();
        assert_eq!(events.iter().filter(|e| matches!(e, TransactionEvent::Begin(_))).count(), 3);
        assert_eq!(events.iter().filter(|e| **e == TransactionEvent::Commit).count(), 3);

        unwrap_outcome(migrator.migrate(&cx, &conn, Some(INITIAL_TARGET)).await);
        assert!(ledger.lock().unwrap().rows.is_empty());
        let sql = conn.executed_sql();
        let drop_index = sql.iter().position(|s| s.starts_with("DROP INDEX")).unwrap();
        let drop_table = sql.iter().position(|s| s.starts_with("DROP TABLE \"Blogs\"")).unwrap();
        assert!(drop_index < drop_table);
    });
}

#[test]
fn migrate_to_target_stops_there() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (conn, ledger) = ledger_connection(None);
    let migrator = migrator();

    rt.block_on(async {
        unwrap_outcome(migrator.migrate(&cx, &conn, Some("20240101000000_CreateBlogs")).await);
        assert_eq!(
            unwrap_outcome(migrator.applied_migrations(&cx, &conn).await),
            vec!["20240101000000_CreateBlogs"]
        );

        // Already there: nothing runs but the probes.
        let before = conn.executed_sql().len();
        unwrap_outcome(migrator.migrate(&cx, &conn, Some("20240101000000_CreateBlogs")).await);
        let ran: Vec<String> = conn.executed_sql()[before..].to_vec();
        assert!(ran.iter().all(|s| s.starts_with("SELECT")));
        assert_eq!(ledger.lock().unwrap().rows.len(), 1);

        let err = expect_err(migrator.migrate(&cx, &conn, Some("20990101000000_Nope")).await);
        assert!(err.to_string().contains("20990101000000_Nope"));
    });
}

#[test]
fn failed_migration_rolls_back() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (conn, ledger) = ledger_connection(Some("CREATE INDEX"));
    let migrator = migrator();

    rt.block_on(async {
        let err = expect_err(migrator.migrate(&cx, &conn, None).await);
        assert!(err.to_string().contains("CREATE INDEX"));
    });

    assert_eq!(conn.events().last(), Some(&TransactionEvent::Rollback));
    let ledger = ledger.lock().unwrap();
    assert!(ledger.rows.contains("20240101000000_CreateBlogs"));
    assert!(!ledger.rows.contains("20240201000000_IndexBlogs"));
}

#[test]
fn suppressed_commands_run_outside_the_transaction() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (conn, _ledger) = ledger_connection(None);
    let migrator = Migrator::new(Dialect::Sqlite)
        .with_migration(Migration::new("20240301000000_Vacuum").up(vec![
            MigrationOperation::Sql(SqlOperation {
                sql: "UPDATE \"Blogs\" SET \"Name\" = trim(\"Name\");".into(),
                ..SqlOperation::default()
            }),
            MigrationOperation::Sql(SqlOperation {
                sql: "VACUUM;".into(),
                suppress_transaction: true,
                ..SqlOperation::default()
            }),
        ]))
        .unwrap();

    rt.block_on(async {
        unwrap_outcome(migrator.migrate(&cx, &conn, None).await);
    });

    let statements = conn.statements();
    let in_tx = |prefix: &str| {
        statements
            .iter()
            .find(|s| s.sql.starts_with(prefix))
            .map(|s| s.in_transaction)
            .unwrap()
    };
    assert!(in_tx("UPDATE \"Blogs\""));
    assert!(!in_tx("VACUUM"));
    // The ledger row commits with the migration's own statements.
    assert!(in_tx("INSERT INTO \"__EFMigrationsHistory\""));
}

#[test]
fn no_transactions_option_runs_everything_bare() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (conn, _ledger) = ledger_connection(None);
    let migrator = migrator().with_options(MigrationsSqlGenerationOptions::new().with_no_transactions(true));

    rt.block_on(async {
        unwrap_outcome(migrator.migrate(&cx, &conn, None).await);
    });
    assert!(conn.events().is_empty());
    assert!(conn.statements().iter().all(|s| !s.in_transaction));
}

// ============================================================================
// Scripts
// ============================================================================

#[test]
fn idempotent_script_guards_every_command() {
    let migrator = Migrator::new(Dialect::Postgres)
        .with_migration(create_blogs())
        .unwrap()
        .with_migration(index_blogs())
        .unwrap();
    let options = MigrationsSqlGenerationOptions::new().with_idempotent(true);
    let script = migrator.generate_script(None, None, &options).unwrap();

    // Two migrations, each one DDL command plus its ledger insert.
    assert_eq!(script.matches("DO $EF$\nBEGIN\n    IF NOT EXISTS(").count(), 4);
    assert_eq!(script.matches("    END IF;\nEND $EF$;\n").count(), 4);
    assert_eq!(script.matches("START TRANSACTION;").count(), 2);
    for id in ["20240101000000_CreateBlogs", "20240201000000_IndexBlogs"] {
        assert_eq!(
            script
                .matches(&format!("WHERE \"MigrationId\" = '{id}') THEN"))
                .count(),
            2
        );
    }

    let down = migrator
        .generate_script(Some("20240201000000_IndexBlogs"), Some(INITIAL_TARGET), &options)
        .unwrap();
    assert_eq!(down.matches("    IF EXISTS(").count(), 4);
    assert!(down.contains("        DROP TABLE \"Blogs\";\n"));
}

#[test]
fn pending_without_ledger_lists_everything() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let conn = ScriptedConnection::new(Dialect::Sqlite);
    conn.push(Scripted::Rows(vec![Row::new(vec!["COUNT(*)".into()], vec![Value::BigInt(0)])]));

    let pending = rt.block_on(async { unwrap_outcome(migrator().pending_migrations(&cx, &conn).await) });
    assert_eq!(pending.len(), 2);
    assert_eq!(conn.executed_sql().len(), 1);
}

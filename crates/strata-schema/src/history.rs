//! The migrations history ledger.
//!
//! The ledger is a two-column table recording which migrations have been
//! applied. Its DDL is produced by the dialect's migrations SQL generator from
//! a synthetic `CreateTable` operation, the same path user tables take.

use crate::command::MigrationCommand;
use crate::generator::{
    MigrationsSqlGenerationOptions, MigrationsSqlGenerator, generator_for_dialect,
    unsupported_operation,
};
use crate::operations::{ColumnDefinition, CreateTableOperation, MigrationOperation, SchemaOperation};
use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use strata_core::{Dialect, Error, Executor, Result, SchemaErrorKind, ValueKind};

/// Default ledger table name.
pub const DEFAULT_HISTORY_TABLE: &str = "__EFMigrationsHistory";

/// Product version recorded for migrations applied by this build.
pub const PRODUCT_VERSION: &str = concat!("strata/", env!("CARGO_PKG_VERSION"));

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub migration_id: String,
    pub product_version: String,
}

impl HistoryRow {
    pub fn new(migration_id: impl Into<String>, product_version: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            product_version: product_version.into(),
        }
    }
}

/// Where the ledger lives and what it records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryRepositoryOptions {
    pub table_name: String,
    pub table_schema: Option<String>,
    pub product_version: String,
}

impl Default for HistoryRepositoryOptions {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_HISTORY_TABLE.to_string(),
            table_schema: None,
            product_version: PRODUCT_VERSION.to_string(),
        }
    }
}

impl HistoryRepositoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    #[must_use]
    pub fn with_table_schema(mut self, table_schema: impl Into<String>) -> Self {
        self.table_schema = Some(table_schema.into());
        self
    }

    #[must_use]
    pub fn with_product_version(mut self, product_version: impl Into<String>) -> Self {
        self.product_version = product_version.into();
        self
    }
}

#[derive(Debug)]
struct HistoryColumns {
    migration_id: String,
    product_version: String,
}

/// Reads and writes the migrations history ledger.
#[derive(Debug)]
pub struct HistoryRepository {
    dialect: Dialect,
    options: HistoryRepositoryOptions,
    generator: Box<dyn MigrationsSqlGenerator>,
    columns: OnceLock<HistoryColumns>,
}

impl HistoryRepository {
    pub fn new(dialect: Dialect, options: HistoryRepositoryOptions) -> Self {
        Self::with_generator(generator_for_dialect(dialect), options)
    }

    /// Use `generator` for the ledger DDL.
    pub fn with_generator(generator: Box<dyn MigrationsSqlGenerator>, options: HistoryRepositoryOptions) -> Self {
        Self {
            dialect: generator.dialect(),
            options,
            generator,
            columns: OnceLock::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn options(&self) -> &HistoryRepositoryOptions {
        &self.options
    }

    /// The synthetic operation the ledger table is created from.
    pub fn table_operation(&self) -> CreateTableOperation {
        let mut op = CreateTableOperation::new(self.options.table_name.as_str())
            .column(ColumnDefinition::new("MigrationId", ValueKind::String).max_length(150))
            .column(ColumnDefinition::new("ProductVersion", ValueKind::String).max_length(32));
        let pk_name = format!("PK_{}", self.options.table_name);
        op = op.primary_key(pk_name, &["MigrationId"]);
        if let Some(schema) = &self.options.table_schema {
            op = op.schema(schema.as_str());
        }
        op
    }

    fn columns(&self) -> &HistoryColumns {
        self.columns.get_or_init(|| {
            let op = self.table_operation();
            let name = |i: usize| op.columns.get(i).map(|c| c.name.clone()).unwrap_or_default();
            HistoryColumns {
                migration_id: name(0),
                product_version: name(1),
            }
        })
    }

    fn table_name(&self) -> String {
        self.dialect
            .delimit_name(&self.options.table_name, self.options.table_schema.as_deref())
    }

    // ========================================================================
    // Scripts
    // ========================================================================

    /// Commands creating the ledger (and its schema, where schemas exist).
    pub fn get_create_commands(&self) -> Result<Vec<MigrationCommand>> {
        let mut operations = Vec::with_capacity(2);
        if let Some(schema) = &self.options.table_schema {
            if self.dialect != Dialect::Sqlite {
                operations.push(MigrationOperation::EnsureSchema(SchemaOperation {
                    name: schema.clone(),
                    ..SchemaOperation::default()
                }));
            }
        }
        operations.push(MigrationOperation::CreateTable(self.table_operation()));
        self.generator
            .generate(&operations, None, &MigrationsSqlGenerationOptions::default())
    }

    pub fn get_create_script(&self) -> Result<String> {
        Ok(self
            .get_create_commands()?
            .iter()
            .map(MigrationCommand::command_text)
            .collect())
    }

    /// The create script, safe to run when the ledger already exists.
    pub fn get_create_if_not_exists_script(&self) -> Result<String> {
        let script = self.get_create_script()?;
        Ok(script.replacen("CREATE TABLE ", "CREATE TABLE IF NOT EXISTS ", 1))
    }

    pub fn get_insert_script(&self, row: &HistoryRow) -> Result<String> {
        if row.migration_id.is_empty() || row.product_version.is_empty() {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                "A history row needs a non-empty migration id and product version.",
            ));
        }
        let columns = self.columns();
        Ok(format!(
            "INSERT INTO {} ({}, {})\nVALUES ({}, {});\n",
            self.table_name(),
            self.dialect.quote_identifier(&columns.migration_id),
            self.dialect.quote_identifier(&columns.product_version),
            self.dialect.string_literal(&row.migration_id),
            self.dialect.string_literal(&row.product_version)
        ))
    }

    pub fn get_delete_script(&self, migration_id: &str) -> Result<String> {
        if migration_id.is_empty() {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                "Deleting a history row needs a non-empty migration id.",
            ));
        }
        Ok(format!(
            "DELETE FROM {}\nWHERE {} = {};\n",
            self.table_name(),
            self.dialect.quote_identifier(&self.columns().migration_id),
            self.dialect.string_literal(migration_id)
        ))
    }

    fn applied_condition(&self, migration_id: &str) -> String {
        format!(
            "SELECT 1 FROM {} WHERE {} = {}",
            self.table_name(),
            self.dialect.quote_identifier(&self.columns().migration_id),
            self.dialect.string_literal(migration_id)
        )
    }

    /// Opens a block that runs only if `migration_id` has not been applied.
    pub fn get_begin_if_not_exists_script(&self, migration_id: &str) -> Result<String> {
        self.begin_if(migration_id, "IF NOT EXISTS", "BeginIfNotExists")
    }

    /// Opens a block that runs only if `migration_id` has been applied.
    pub fn get_begin_if_exists_script(&self, migration_id: &str) -> Result<String> {
        self.begin_if(migration_id, "IF EXISTS", "BeginIfExists")
    }

    /// Closes a block opened by either begin script.
    pub fn get_end_if_script(&self) -> Result<String> {
        match self.dialect {
            Dialect::Postgres => Ok("    END IF;\nEND $EF$;\n".to_string()),
            Dialect::Sqlite | Dialect::Mysql => Err(unsupported_operation(self.generator.name(), "EndIf")),
        }
    }

    fn begin_if(&self, migration_id: &str, test: &str, kind: &str) -> Result<String> {
        match self.dialect {
            Dialect::Postgres => Ok(format!(
                "DO $EF$\nBEGIN\n    {}({}) THEN\n",
                test,
                self.applied_condition(migration_id)
            )),
            Dialect::Sqlite | Dialect::Mysql => Err(unsupported_operation(self.generator.name(), kind)),
        }
    }

    fn exists_sql(&self) -> String {
        let table = self.dialect.string_literal(&self.options.table_name);
        match self.dialect {
            Dialect::Postgres => {
                let schema = self
                    .options
                    .table_schema
                    .as_deref()
                    .map_or_else(|| "current_schema()".to_string(), |s| self.dialect.string_literal(s));
                format!(
                    "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_class c \
                     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                     WHERE n.nspname = {} AND c.relname = {});",
                    schema, table
                )
            }
            Dialect::Sqlite => format!(
                "SELECT COUNT(*) FROM \"sqlite_master\" WHERE \"name\" = {} AND \"type\" = 'table';",
                table
            ),
            Dialect::Mysql => {
                let schema = self
                    .options
                    .table_schema
                    .as_deref()
                    .map_or_else(|| "DATABASE()".to_string(), |s| self.dialect.string_literal(s));
                format!(
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = {} AND table_name = {};",
                    schema, table
                )
            }
        }
    }

    fn applied_sql(&self) -> String {
        let columns = self.columns();
        let id = self.dialect.quote_identifier(&columns.migration_id);
        format!(
            "SELECT {}, {} FROM {} ORDER BY {};",
            id,
            self.dialect.quote_identifier(&columns.product_version),
            self.table_name(),
            id
        )
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Does the ledger table exist?
    ///
    /// A missing database answers `false`: nothing has been applied to it.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(table = %self.options.table_name))]
    pub async fn exists<E: Executor>(&self, cx: &Cx, conn: &E) -> Outcome<bool, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let rows = match conn.query(cx, &self.exists_sql(), &[]).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) if e.is_database_missing() => {
                tracing::debug!(error = %e, "Database does not exist; no history");
                return Outcome::Ok(false);
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let exists = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(strata_core::Value::as_bool)
            .unwrap_or(false);
        tracing::debug!(exists, "Probed history table");
        Outcome::Ok(exists)
    }

    /// Applied migrations, ordered by id. Empty if the ledger does not exist.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn get_applied_migrations<E: Executor>(&self, cx: &Cx, conn: &E) -> Outcome<Vec<HistoryRow>, Error> {
        if !strata_core::try_outcome!(self.exists(cx, conn).await) {
            return Outcome::Ok(Vec::new());
        }
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let rows = strata_core::try_outcome!(conn.query(cx, &self.applied_sql(), &[]).await);
        let mut applied = Vec::with_capacity(rows.len());
        for row in &rows {
            let (migration_id, product_version) = match (row.get_as::<String>(0), row.get_as::<String>(1)) {
                (Ok(id), Ok(version)) => (id, version),
                (Err(e), _) | (_, Err(e)) => return Outcome::Err(e),
            };
            applied.push(HistoryRow {
                migration_id,
                product_version,
            });
        }
        tracing::debug!(applied = applied.len(), "Read migrations history");
        Outcome::Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use strata_core::testing::{Scripted, ScriptedConnection};
    use strata_core::{QueryError, QueryErrorKind, Row, Value};

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(value) => value,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    // ========================================================================
    // Script Tests
    // ========================================================================

    #[test]
    fn test_create_script_postgres() {
        let history = HistoryRepository::new(Dialect::Postgres, HistoryRepositoryOptions::default());
        assert_eq!(
            history.get_create_script().unwrap(),
            "CREATE TABLE \"__EFMigrationsHistory\" (\n    \
             \"MigrationId\" character varying(150) NOT NULL,\n    \
             \"ProductVersion\" character varying(32) NOT NULL,\n    \
             CONSTRAINT \"PK___EFMigrationsHistory\" PRIMARY KEY (\"MigrationId\")\n);\n"
        );
        assert!(history
            .get_create_if_not_exists_script()
            .unwrap()
            .starts_with("CREATE TABLE IF NOT EXISTS \"__EFMigrationsHistory\" (\n"));
    }

    #[test]
    fn test_create_script_with_schema() {
        let options = HistoryRepositoryOptions::new()
            .with_table_name("migrations")
            .with_table_schema("ops");
        let pg = HistoryRepository::new(Dialect::Postgres, options.clone());
        let commands = pg.get_create_commands().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].command_text().contains("CREATE SCHEMA \"ops\";"));
        assert!(commands[1].command_text().starts_with("CREATE TABLE \"ops\".\"migrations\" ("));

        let sqlite = HistoryRepository::new(Dialect::Sqlite, options);
        let commands = sqlite.get_create_commands().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].command_text().starts_with("CREATE TABLE \"migrations\" ("));
    }

    #[test]
    fn test_insert_and_delete_scripts() {
        let history = HistoryRepository::new(Dialect::Sqlite, HistoryRepositoryOptions::default());
        assert_eq!(
            history
                .get_insert_script(&HistoryRow::new("20240101000000_Init", "strata/1.0"))
                .unwrap(),
            "INSERT INTO \"__EFMigrationsHistory\" (\"MigrationId\", \"ProductVersion\")\n\
             VALUES ('20240101000000_Init', 'strata/1.0');\n"
        );
        assert_eq!(
            history.get_delete_script("20240101000000_Init").unwrap(),
            "DELETE FROM \"__EFMigrationsHistory\"\nWHERE \"MigrationId\" = '20240101000000_Init';\n"
        );
        assert!(history.get_insert_script(&HistoryRow::new("", "v")).is_err());
        assert!(history.get_delete_script("").is_err());
    }

    #[test]
    fn test_guards() {
        let pg = HistoryRepository::new(Dialect::Postgres, HistoryRepositoryOptions::default());
        assert_eq!(
            pg.get_begin_if_not_exists_script("20240101000000_Init").unwrap(),
            "DO $EF$\nBEGIN\n    IF NOT EXISTS(SELECT 1 FROM \"__EFMigrationsHistory\" \
             WHERE \"MigrationId\" = '20240101000000_Init') THEN\n"
        );
        assert!(pg
            .get_begin_if_exists_script("20240101000000_Init")
            .unwrap()
            .contains("    IF EXISTS(SELECT 1"));
        assert_eq!(pg.get_end_if_script().unwrap(), "    END IF;\nEND $EF$;\n");

        let mysql = HistoryRepository::new(Dialect::Mysql, HistoryRepositoryOptions::default());
        assert!(mysql.get_begin_if_not_exists_script("20240101000000_Init").is_err());
        assert!(mysql.get_end_if_script().is_err());
    }

    // ========================================================================
    // Query Tests
    // ========================================================================

    #[test]
    fn test_exists_reads_probe() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let history = HistoryRepository::new(Dialect::Sqlite, HistoryRepositoryOptions::default());

        let conn = ScriptedConnection::new(Dialect::Sqlite);
        conn.push(Scripted::Rows(vec![Row::new(vec!["COUNT(*)".into()], vec![Value::BigInt(1)])]));
        assert!(unwrap_outcome(rt.block_on(async { history.exists(&cx, &conn).await })));
        assert!(conn.executed_sql()[0].contains("sqlite_master"));

        let empty = ScriptedConnection::new(Dialect::Sqlite);
        assert!(!unwrap_outcome(rt.block_on(async { history.exists(&cx, &empty).await })));
    }

    #[test]
    fn test_missing_database_is_not_an_error() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let history = HistoryRepository::new(Dialect::Postgres, HistoryRepositoryOptions::default());
        let conn = ScriptedConnection::new(Dialect::Postgres);
        conn.push(Scripted::Fail(Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: None,
            sqlstate: Some("3D000".into()),
            message: "database \"blogging\" does not exist".into(),
            source: None,
        })));

        assert!(!unwrap_outcome(rt.block_on(async { history.exists(&cx, &conn).await })));
        assert!(unwrap_outcome(rt.block_on(async {
            history.get_applied_migrations(&cx, &conn).await
        }))
        .is_empty());
    }

    #[test]
    fn test_applied_migrations_are_read_in_order() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let history = HistoryRepository::new(Dialect::Postgres, HistoryRepositoryOptions::default());
        let conn = ScriptedConnection::new(Dialect::Postgres);
        conn.push(Scripted::Rows(vec![Row::new(vec!["exists".into()], vec![Value::Bool(true)])]));
        let names = vec!["MigrationId".to_string(), "ProductVersion".to_string()];
        conn.push(Scripted::Rows(vec![
            Row::new(names.clone(), vec![Value::Text("20240101000000_Init".into()), Value::Text("strata/1.0".into())]),
            Row::new(names, vec![Value::Text("20240201000000_Posts".into()), Value::Text("strata/1.0".into())]),
        ]));

        let applied = unwrap_outcome(rt.block_on(async { history.get_applied_migrations(&cx, &conn).await }));
        assert_eq!(
            applied,
            vec![
                HistoryRow::new("20240101000000_Init", "strata/1.0"),
                HistoryRow::new("20240201000000_Posts", "strata/1.0"),
            ]
        );
        assert_eq!(
            conn.executed_sql()[1],
            "SELECT \"MigrationId\", \"ProductVersion\" FROM \"__EFMigrationsHistory\" ORDER BY \"MigrationId\";"
        );
    }
}

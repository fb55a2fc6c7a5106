//! Applying, reverting and scripting migrations.

use crate::command::MigrationCommand;
use crate::generator::{MigrationsSqlGenerationOptions, MigrationsSqlGenerator, generator_for_dialect};
use crate::history::{HistoryRepository, HistoryRepositoryOptions, HistoryRow};
use crate::model::RelationalModel;
use crate::operations::MigrationOperation;
use asupersync::{Cx, Outcome};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use strata_core::{
    Connection, Dialect, Error, Executor, Result, SchemaErrorKind, TransactionOps, try_outcome,
};

/// Target that reverts every migration.
pub const INITIAL_TARGET: &str = "0";

/// One migration: the operations that apply it and the ones that revert it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Timestamp-prefixed id, e.g. `20240101120000_CreateBlogs`.
    pub id: String,
    #[serde(default)]
    pub up: Vec<MigrationOperation>,
    #[serde(default)]
    pub down: Vec<MigrationOperation>,
    /// The model after `up` runs; resolves column types the operations omit.
    #[serde(default)]
    pub target_model: Option<RelationalModel>,
}

impl Migration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn up(mut self, operations: Vec<MigrationOperation>) -> Self {
        self.up = operations;
        self
    }

    #[must_use]
    pub fn down(mut self, operations: Vec<MigrationOperation>) -> Self {
        self.down = operations;
        self
    }

    #[must_use]
    pub fn target_model(mut self, model: RelationalModel) -> Self {
        self.target_model = Some(model);
        self
    }
}

fn migration_id_regex() -> Result<&'static Regex> {
    static ID: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    ID.get_or_init(|| Regex::new(r"^\d{14}_[A-Za-z0-9_]+$"))
        .as_ref()
        .map_err(|e| Error::schema(SchemaErrorKind::Migration, format!("invalid migration id pattern: {e}")))
}

/// Brings a database to a target migration.
///
/// Migrations are kept sorted by id; ids are timestamp-prefixed so this is
/// the order they were authored in.
#[derive(Debug)]
pub struct Migrator {
    migrations: Vec<Migration>,
    generator: Box<dyn MigrationsSqlGenerator>,
    history: HistoryRepository,
    options: MigrationsSqlGenerationOptions,
}

impl Migrator {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            migrations: Vec::new(),
            generator: generator_for_dialect(dialect),
            history: HistoryRepository::new(dialect, HistoryRepositoryOptions::default()),
            options: MigrationsSqlGenerationOptions::default(),
        }
    }

    /// Render migrations with `generator` instead of the dialect's built-in one.
    #[must_use]
    pub fn with_generator(mut self, generator: Box<dyn MigrationsSqlGenerator>) -> Self {
        self.generator = generator;
        self
    }

    #[must_use]
    pub fn with_history_options(mut self, options: HistoryRepositoryOptions) -> Self {
        self.history = HistoryRepository::new(self.generator.dialect(), options);
        self
    }

    /// Options used by [`Migrator::migrate`].
    #[must_use]
    pub fn with_options(mut self, options: MigrationsSqlGenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.generator.dialect()
    }

    pub fn history(&self) -> &HistoryRepository {
        &self.history
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Register a migration. Ids must be unique and timestamp-prefixed.
    pub fn add_migration(&mut self, migration: Migration) -> Result<()> {
        if !migration_id_regex()?.is_match(&migration.id) {
            return Err(Error::schema(
                SchemaErrorKind::Migration,
                format!(
                    "'{}' is not a valid migration id; expected a 14-digit timestamp, an underscore and a name.",
                    migration.id
                ),
            ));
        }
        match self.migrations.binary_search_by(|m| m.id.as_str().cmp(&migration.id)) {
            Ok(_) => Err(Error::schema(
                SchemaErrorKind::Migration,
                format!("The migration '{}' is registered twice.", migration.id),
            )),
            Err(position) => {
                self.migrations.insert(position, migration);
                Ok(())
            }
        }
    }

    /// Builder form of [`Migrator::add_migration`].
    pub fn with_migration(mut self, migration: Migration) -> Result<Self> {
        self.add_migration(migration)?;
        Ok(self)
    }

    /// How many migrations, from the first, make up `target`.
    fn target_count(&self, target: Option<&str>) -> Result<usize> {
        match target {
            None => Ok(self.migrations.len()),
            Some(INITIAL_TARGET) => Ok(0),
            Some(id) => self
                .migrations
                .iter()
                .position(|m| m.id == id)
                .map(|i| i + 1)
                .ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::Migration,
                        format!("The migration '{}' was not found.", id),
                    )
                }),
        }
    }

    fn apply_commands(&self, index: usize, options: &MigrationsSqlGenerationOptions) -> Result<Vec<MigrationCommand>> {
        let migration = &self.migrations[index];
        let mut commands = self
            .generator
            .generate(&migration.up, migration.target_model.as_ref(), options)?;
        let row = HistoryRow::new(migration.id.as_str(), self.history.options().product_version.as_str());
        commands.push(MigrationCommand::new(self.history.get_insert_script(&row)?, false));
        Ok(commands)
    }

    /// `down` runs against the model of the migration before this one.
    fn revert_commands(&self, index: usize, options: &MigrationsSqlGenerationOptions) -> Result<Vec<MigrationCommand>> {
        let migration = &self.migrations[index];
        let previous_model = index
            .checked_sub(1)
            .and_then(|i| self.migrations[i].target_model.as_ref());
        let mut commands = self.generator.generate(&migration.down, previous_model, options)?;
        commands.push(MigrationCommand::new(self.history.get_delete_script(&migration.id)?, false));
        Ok(commands)
    }

    // ========================================================================
    // Database
    // ========================================================================

    /// Ids of the migrations recorded in the ledger, in order.
    pub async fn applied_migrations<E: Executor>(&self, cx: &Cx, conn: &E) -> Outcome<Vec<String>, Error> {
        let rows = try_outcome!(self.history.get_applied_migrations(cx, conn).await);
        Outcome::Ok(rows.into_iter().map(|row| row.migration_id).collect())
    }

    /// Ids of the registered migrations not yet in the ledger, in order.
    pub async fn pending_migrations<E: Executor>(&self, cx: &Cx, conn: &E) -> Outcome<Vec<String>, Error> {
        let applied: BTreeSet<String> = try_outcome!(self.applied_migrations(cx, conn).await)
            .into_iter()
            .collect();
        Outcome::Ok(
            self.migrations
                .iter()
                .filter(|m| !applied.contains(&m.id))
                .map(|m| m.id.clone())
                .collect(),
        )
    }

    /// Apply or revert migrations until `target` is the last one applied.
    ///
    /// `None` targets the latest migration and [`INITIAL_TARGET`] reverts all
    /// of them. Migrations after the target are reverted newest first, then
    /// pending migrations up to the target are applied oldest first. Each
    /// migration's commands and ledger row commit together.
    #[tracing::instrument(level = "info", skip(self, cx, conn))]
    pub async fn migrate<C: Connection>(&self, cx: &Cx, conn: &C, target: Option<&str>) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let count = match self.target_count(target) {
            Ok(count) => count,
            Err(e) => return Outcome::Err(e),
        };

        if !try_outcome!(self.history.exists(cx, conn).await) {
            tracing::info!(table = %self.history.options().table_name, "Creating migrations history table");
            let commands = match self.history.get_create_commands() {
                Ok(commands) => commands,
                Err(e) => return Outcome::Err(e),
            };
            try_outcome!(self.execute_commands(cx, conn, &commands).await);
        }

        let applied: BTreeSet<String> = try_outcome!(self.applied_migrations(cx, conn).await)
            .into_iter()
            .collect();
        for id in applied.iter().filter(|id| !self.migrations.iter().any(|m| &m.id == *id)) {
            tracing::warn!(migration = %id, "Applied migration is not registered with this migrator");
        }

        let start = std::time::Instant::now();
        let mut reverted = 0usize;
        for index in (count..self.migrations.len()).rev() {
            let id = &self.migrations[index].id;
            if !applied.contains(id) {
                continue;
            }
            let commands = match self.revert_commands(index, &self.options) {
                Ok(commands) => commands,
                Err(e) => return Outcome::Err(e),
            };
            try_outcome!(self.execute_commands(cx, conn, &commands).await);
            tracing::info!(migration = %id, commands = commands.len(), "Reverted migration");
            reverted += 1;
        }

        let mut applied_now = 0usize;
        for index in 0..count {
            let id = &self.migrations[index].id;
            if applied.contains(id) {
                continue;
            }
            let commands = match self.apply_commands(index, &self.options) {
                Ok(commands) => commands,
                Err(e) => return Outcome::Err(e),
            };
            try_outcome!(self.execute_commands(cx, conn, &commands).await);
            tracing::info!(migration = %id, commands = commands.len(), "Applied migration");
            applied_now += 1;
        }

        if reverted == 0 && applied_now == 0 {
            tracing::info!("Database is already up to date");
        } else {
            tracing::info!(
                applied = applied_now,
                reverted,
                elapsed_ms = start.elapsed().as_millis(),
                "Migration complete"
            );
        }
        Outcome::Ok(())
    }

    /// Run commands, grouping consecutive transactional ones into one
    /// transaction. Suppressed commands, and every command when
    /// `no_transactions` is set, run on the bare connection.
    async fn execute_commands<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        commands: &[MigrationCommand],
    ) -> Outcome<(), Error> {
        let mut i = 0;
        while i < commands.len() {
            if self.options.no_transactions || commands[i].transaction_suppressed() {
                try_outcome!(commands[i].execute(cx, conn).await);
                i += 1;
                continue;
            }

            let end = commands[i..]
                .iter()
                .position(MigrationCommand::transaction_suppressed)
                .map_or(commands.len(), |offset| i + offset);
            let tx = match conn.begin(cx).await {
                Outcome::Ok(tx) => tx,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match execute_all(cx, &tx, &commands[i..end]).await {
                Outcome::Ok(()) => match tx.commit(cx).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                },
                Outcome::Err(e) => {
                    rollback(cx, tx).await;
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => {
                    rollback(cx, tx).await;
                    return Outcome::Cancelled(r);
                }
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            i = end;
        }
        Outcome::Ok(())
    }

    // ========================================================================
    // Scripts
    // ========================================================================

    /// A script moving a database from migration `from` to migration `to`.
    ///
    /// `from` defaults to [`INITIAL_TARGET`] and `to` to the latest migration.
    /// Scripts moving forward start by creating the ledger if it is missing.
    /// An idempotent script guards every command with a ledger check, so it
    /// can be replayed against a database in any state between the two.
    pub fn generate_script(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        options: &MigrationsSqlGenerationOptions,
    ) -> Result<String> {
        let from_count = self.target_count(Some(from.unwrap_or(INITIAL_TARGET)))?;
        let to_count = self.target_count(to)?;
        let options = options.clone().with_script(true);
        let dialect = self.generator.dialect();

        let mut script = String::new();
        if from_count <= to_count {
            script.push_str(&self.history.get_create_if_not_exists_script()?);
            script.push_str(dialect.batch_terminator());
            for index in from_count..to_count {
                let commands = self.apply_commands(index, &options)?;
                self.append_migration_script(&mut script, &self.migrations[index].id, &commands, &options, true)?;
            }
        } else {
            for index in (to_count..from_count).rev() {
                let commands = self.revert_commands(index, &options)?;
                self.append_migration_script(&mut script, &self.migrations[index].id, &commands, &options, false)?;
            }
        }

        tracing::debug!(
            from = from.unwrap_or(INITIAL_TARGET),
            to = to.unwrap_or("latest"),
            idempotent = options.idempotent,
            bytes = script.len(),
            "Generated migration script"
        );
        Ok(script)
    }

    fn append_migration_script(
        &self,
        script: &mut String,
        migration_id: &str,
        commands: &[MigrationCommand],
        options: &MigrationsSqlGenerationOptions,
        applying: bool,
    ) -> Result<()> {
        let dialect = self.generator.dialect();
        let mut in_transaction = false;
        for command in commands {
            if !options.no_transactions {
                if command.transaction_suppressed() && in_transaction {
                    script.push_str(dialect.commit_transaction_statement());
                    script.push('\n');
                    script.push_str(dialect.batch_terminator());
                    in_transaction = false;
                } else if !command.transaction_suppressed() && !in_transaction {
                    script.push_str(dialect.start_transaction_statement());
                    script.push('\n');
                    script.push_str(dialect.batch_terminator());
                    in_transaction = true;
                }
            }

            if options.idempotent {
                let begin = if applying {
                    self.history.get_begin_if_not_exists_script(migration_id)?
                } else {
                    self.history.get_begin_if_exists_script(migration_id)?
                };
                script.push_str(&begin);
                script.push_str(&indent(command.command_text()));
                script.push_str(&self.history.get_end_if_script()?);
            } else {
                script.push_str(command.command_text());
            }
            script.push_str(dialect.batch_terminator());
        }
        if in_transaction {
            script.push_str(dialect.commit_transaction_statement());
            script.push('\n');
            script.push_str(dialect.batch_terminator());
        }
        Ok(())
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                "\n".to_string()
            } else {
                format!("        {}\n", line)
            }
        })
        .collect()
}

async fn execute_all<E: Executor>(cx: &Cx, conn: &E, commands: &[MigrationCommand]) -> Outcome<(), Error> {
    for command in commands {
        try_outcome!(command.execute(cx, conn).await);
    }
    Outcome::Ok(())
}

async fn rollback<T: TransactionOps>(cx: &Cx, tx: T) {
    match tx.rollback(cx).await {
        Outcome::Ok(()) => tracing::debug!("Rolled back failed migration"),
        Outcome::Err(e) => tracing::warn!(error = %e, "Rollback after failed migration did not succeed"),
        Outcome::Cancelled(_) | Outcome::Panicked(_) => {
            tracing::warn!("Rollback after failed migration did not complete");
        }
    }
}

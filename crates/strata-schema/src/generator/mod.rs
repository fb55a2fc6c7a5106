//! Migrations SQL generation.
//!
//! A [`MigrationsSqlGenerator`] turns an ordered list of [`MigrationOperation`]s
//! into [`MigrationCommand`]s. Every operation kind has its own trait method
//! with a default rendering, so a provider overrides exactly the kinds it
//! renders differently:
//!
//! - [`PostgresMigrationsSqlGenerator`]: identity columns, sequences, renames,
//!   schemas and concurrent indexes
//! - [`SqliteMigrationsSqlGenerator`]: inline `AUTOINCREMENT` keys and renames;
//!   rejects operations SQLite cannot express with `ALTER TABLE`
//! - [`MysqlMigrationsSqlGenerator`]: `AUTO_INCREMENT`, `MODIFY COLUMN`, no sequences
//!
//! Seed-data operations are not rendered here: they become non-tracked
//! [`ModificationCommand`]s rendered by the dialect's [`UpdateSqlGenerator`].

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlMigrationsSqlGenerator;
pub use postgres::PostgresMigrationsSqlGenerator;
pub use sqlite::SqliteMigrationsSqlGenerator;

use crate::command::{MigrationCommand, MigrationCommandListBuilder};
use crate::model::RelationalModel;
use crate::operations::{
    AddCheckConstraintOperation, AddColumnOperation, AddForeignKeyOperation,
    AddPrimaryKeyOperation, AddUniqueConstraintOperation, AlterColumnOperation,
    AlterSequenceOperation, ColumnDefinition, CreateIndexOperation, CreateSequenceOperation,
    CreateTableOperation, DeleteDataOperation, DropColumnOperation, DropConstraintOperation,
    DropIndexOperation, DropSequenceOperation, DropTableOperation, ExtensionOperation,
    InsertDataOperation, MigrationOperation, RenameColumnOperation, RenameIndexOperation,
    RenameSequenceOperation, RenameTableOperation, RestartSequenceOperation, SchemaOperation,
    SequenceOptions, SqlOperation, UpdateDataOperation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strata_core::{
    ColumnFacets, Dialect, Error, Result, SchemaErrorKind, TypeMappingSource, Value, ValueKind,
};
use strata_update::{
    ColumnFlags, ColumnModification, EntityState, ModificationCommand, ParameterBuffer,
    UpdateSqlGenerator, update_generator_for_dialect,
};

/// Options for one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsSqlGenerationOptions {
    /// The commands are destined for a SQL script rather than execution.
    pub script: bool,
    /// The script must be safe to run against a partially migrated database.
    pub idempotent: bool,
    /// Never wrap commands in transactions.
    pub no_transactions: bool,
}

impl MigrationsSqlGenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_script(mut self, script: bool) -> Self {
        self.script = script;
        self
    }

    #[must_use]
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    #[must_use]
    pub fn with_no_transactions(mut self, no_transactions: bool) -> Self {
        self.no_transactions = no_transactions;
        self
    }
}

/// What every per-operation method can see besides its operation.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    /// The model the operations migrate to, if known.
    pub model: Option<&'a RelationalModel>,
    pub options: &'a MigrationsSqlGenerationOptions,
}

impl<'a> GenerationContext<'a> {
    pub fn new(model: Option<&'a RelationalModel>, options: &'a MigrationsSqlGenerationOptions) -> Self {
        Self { model, options }
    }

    /// Does the target model use `column` in a key, constraint or index?
    pub fn is_key_or_index_column(&self, table: &str, schema: Option<&str>, column: &str) -> bool {
        self.model
            .and_then(|model| model.table(table, schema))
            .is_some_and(|t| t.is_key_or_index_column(column))
    }
}

/// Renders migration operations as SQL for one dialect.
///
/// Generators are stateless and may be shared between threads.
pub trait MigrationsSqlGenerator: Send + Sync + fmt::Debug {
    /// Name used in error messages.
    fn name(&self) -> &'static str;

    fn dialect(&self) -> Dialect;

    fn type_mappings(&self) -> &dyn TypeMappingSource;

    /// Renders seed-data commands.
    fn update_generator(&self) -> Arc<dyn UpdateSqlGenerator> {
        update_generator_for_dialect(self.dialect())
    }

    /// Render `operations`, in order, into commands.
    fn generate(
        &self,
        operations: &[MigrationOperation],
        model: Option<&RelationalModel>,
        options: &MigrationsSqlGenerationOptions,
    ) -> Result<Vec<MigrationCommand>> {
        tracing::debug!(
            generator = self.name(),
            dialect = %self.dialect(),
            operations = operations.len(),
            idempotent = options.idempotent,
            "Generating migration SQL"
        );

        let ctx = GenerationContext::new(model, options);
        let mut builder = MigrationCommandListBuilder::new(self.dialect());
        for operation in operations {
            self.generate_operation(operation, &ctx, &mut builder)?;
        }
        let commands = builder.build();

        for command in &commands {
            tracing::trace!(
                sql = %command.command_text(),
                suppressed = command.transaction_suppressed(),
                "Generated migration command"
            );
        }
        Ok(commands)
    }

    /// Dispatch one operation to its per-kind method.
    fn generate_operation(
        &self,
        operation: &MigrationOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        tracing::debug!(
            generator = self.name(),
            operation = operation.kind_name(),
            table = operation.table(),
            "Generating operation SQL"
        );

        match operation {
            MigrationOperation::EnsureSchema(op) => self.ensure_schema(op, ctx, builder),
            MigrationOperation::DropSchema(op) => self.drop_schema(op, ctx, builder),
            MigrationOperation::CreateTable(op) => self.create_table(op, ctx, builder),
            MigrationOperation::DropTable(op) => self.drop_table(op, ctx, builder),
            MigrationOperation::RenameTable(op) => self.rename_table(op, ctx, builder),
            MigrationOperation::AddColumn(op) => self.add_column(op, ctx, builder),
            MigrationOperation::DropColumn(op) => self.drop_column(op, ctx, builder),
            MigrationOperation::AlterColumn(op) => self.alter_column(op, ctx, builder),
            MigrationOperation::RenameColumn(op) => self.rename_column(op, ctx, builder),
            MigrationOperation::AddPrimaryKey(op) => self.add_primary_key(op, ctx, builder),
            MigrationOperation::DropPrimaryKey(op) => self.drop_primary_key(op, ctx, builder),
            MigrationOperation::AddUniqueConstraint(op) => {
                self.add_unique_constraint(op, ctx, builder)
            }
            MigrationOperation::DropUniqueConstraint(op) => {
                self.drop_unique_constraint(op, ctx, builder)
            }
            MigrationOperation::AddCheckConstraint(op) => {
                self.add_check_constraint(op, ctx, builder)
            }
            MigrationOperation::DropCheckConstraint(op) => {
                self.drop_check_constraint(op, ctx, builder)
            }
            MigrationOperation::AddForeignKey(op) => self.add_foreign_key(op, ctx, builder),
            MigrationOperation::DropForeignKey(op) => self.drop_foreign_key(op, ctx, builder),
            MigrationOperation::CreateIndex(op) => self.create_index(op, ctx, builder),
            MigrationOperation::DropIndex(op) => self.drop_index(op, ctx, builder),
            MigrationOperation::RenameIndex(op) => self.rename_index(op, ctx, builder),
            MigrationOperation::CreateSequence(op) => self.create_sequence(op, ctx, builder),
            MigrationOperation::AlterSequence(op) => self.alter_sequence(op, ctx, builder),
            MigrationOperation::DropSequence(op) => self.drop_sequence(op, ctx, builder),
            MigrationOperation::RenameSequence(op) => self.rename_sequence(op, ctx, builder),
            MigrationOperation::RestartSequence(op) => self.restart_sequence(op, ctx, builder),
            MigrationOperation::InsertData(op) => self.insert_data(op, ctx, builder),
            MigrationOperation::DeleteData(op) => self.delete_data(op, ctx, builder),
            MigrationOperation::UpdateData(op) => self.update_data(op, ctx, builder),
            MigrationOperation::Sql(op) => self.sql(op, ctx, builder),
            MigrationOperation::Extension(op) => self.extension(op, ctx, builder),
        }
    }

    // ========================================================================
    // Column rendering hooks
    // ========================================================================

    /// `"Name" type [NOT NULL] [identity] [DEFAULT ..]`, appended to `sql`.
    fn column_definition(
        &self,
        table: &str,
        schema: Option<&str>,
        column: &ColumnDefinition,
        key_or_index: bool,
        ctx: &GenerationContext<'_>,
        sql: &mut String,
    ) -> Result<()> {
        sql.push_str(&self.dialect().quote_identifier(&column.name));

        if let Some(computed) = &column.computed_column_sql {
            if !column.is_type_unknown() {
                sql.push(' ');
                sql.push_str(&self.column_type(table, schema, column, key_or_index, ctx)?);
            }
            sql.push_str(&self.computed_column_clause(column, computed)?);
            return Ok(());
        }

        let store_type = self.column_type(table, schema, column, key_or_index, ctx)?;
        sql.push(' ');
        sql.push_str(&store_type);
        if !column.is_nullable {
            sql.push_str(" NOT NULL");
        }
        if column.is_identity() {
            if let Some(identity) = self.identity_clause(column) {
                sql.push(' ');
                sql.push_str(identity);
            }
        }
        if let Some(default) = self.default_value(column, Some(&store_type))? {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default);
        }
        if let Some(comment) = &column.comment {
            if let Some(clause) = self.column_comment_clause(comment) {
                sql.push_str(&clause);
            }
        }
        Ok(())
    }

    /// Resolve the store type of `column`.
    ///
    /// An explicit type wins. Otherwise a target-model column with the same
    /// facets lends its already resolved type, and failing that the type
    /// mapping source derives one from the kind and facets.
    fn column_type(
        &self,
        table: &str,
        schema: Option<&str>,
        column: &ColumnDefinition,
        key_or_index: bool,
        ctx: &GenerationContext<'_>,
    ) -> Result<String> {
        if let Some(store_type) = &column.column_type {
            return Ok(store_type.clone());
        }

        let existing = ctx.model.and_then(|model| model.column(table, schema, &column.name));
        let key_or_index = key_or_index || ctx.is_key_or_index_column(table, schema, &column.name);
        let facets = match (column.facets(key_or_index), existing) {
            (Some(facets), Some(existing)) => {
                if existing.same_facets(column) {
                    if let Some(store_type) = &existing.column_type {
                        return Ok(store_type.clone());
                    }
                }
                facets
            }
            (Some(facets), None) => facets,
            (None, Some(existing)) => {
                if let Some(store_type) = &existing.column_type {
                    return Ok(store_type.clone());
                }
                existing
                    .facets(key_or_index)
                    .ok_or_else(|| untyped_column(table, column, SchemaErrorKind::Invalid))?
            }
            (None, None) => {
                let kind = if ctx.model.is_none() {
                    SchemaErrorKind::MissingModel
                } else {
                    SchemaErrorKind::Invalid
                };
                return Err(untyped_column(table, column, kind));
            }
        };

        self.type_mappings()
            .find_mapping(&facets)
            .map(|mapping| mapping.store_type)
            .ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::Invalid,
                    format!(
                        "No store type mapping found for column '{}' of kind {:?} on table '{}'.",
                        column.name, facets.kind, table
                    ),
                )
            })
    }

    /// The DEFAULT expression for `column`, if it has one.
    ///
    /// A SQL default is used verbatim; a value default is rendered as a
    /// literal of the column's store type. A NULL default renders nothing.
    fn default_value(&self, column: &ColumnDefinition, store_type: Option<&str>) -> Result<Option<String>> {
        if let Some(sql) = &column.default_value_sql {
            return Ok(Some(format!("({})", sql)));
        }
        let Some(value) = column.default_value.as_ref().filter(|v| !v.is_null()) else {
            return Ok(None);
        };

        let mappings = self.type_mappings();
        let mapping = store_type
            .and_then(|t| mappings.find_mapping_for_store_type(t))
            .or_else(|| mappings.find_mapping_for_value(value))
            .ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::Invalid,
                    format!(
                        "No type mapping can render the default value of column '{}'.",
                        column.name
                    ),
                )
            })?;
        mapping.generate_sql_literal(value).map(Some)
    }

    /// Keyword(s) that make an identity column generate its values.
    fn identity_clause(&self, _column: &ColumnDefinition) -> Option<&'static str> {
        None
    }

    fn computed_column_clause(&self, column: &ColumnDefinition, sql: &str) -> Result<String> {
        let stored = if column.is_stored == Some(true) { " STORED" } else { "" };
        Ok(format!(" GENERATED ALWAYS AS ({}){}", sql, stored))
    }

    /// Inline column comment, for dialects that declare comments in the column.
    fn column_comment_clause(&self, _comment: &str) -> Option<String> {
        None
    }

    // ========================================================================
    // Sequence option hooks
    // ========================================================================

    /// Sequence options after `CREATE SEQUENCE` or `ALTER SEQUENCE`.
    ///
    /// Creation only names options that differ from the defaults; alteration
    /// names every option so the statement is unambiguous.
    fn sequence_options(&self, options: &SequenceOptions, for_alter: bool) -> String {
        let mut sql = String::new();
        if for_alter || options.increment_by != 1 {
            sql.push_str(&format!(" INCREMENT BY {}", options.increment_by));
        }
        match options.min_value {
            Some(min) => sql.push_str(&format!(" MINVALUE {}", min)),
            None if for_alter => sql.push_str(" NO MINVALUE"),
            None => {}
        }
        match options.max_value {
            Some(max) => sql.push_str(&format!(" MAXVALUE {}", max)),
            None if for_alter => sql.push_str(" NO MAXVALUE"),
            None => {}
        }
        if options.is_cyclic {
            sql.push_str(" CYCLE");
        } else if for_alter {
            sql.push_str(" NO CYCLE");
        }
        if let Some(cache) = self.sequence_cache_clause(options, for_alter) {
            sql.push_str(&cache);
        }
        sql
    }

    fn sequence_cache_clause(&self, options: &SequenceOptions, _for_alter: bool) -> Option<String> {
        match (options.is_cached, options.cache_size) {
            (true, Some(size)) => Some(format!(" CACHE {}", size)),
            // Keeps the store's cache setting.
            (true, None) => None,
            (false, _) => Some(" NO CACHE".to_string()),
        }
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    fn ensure_schema(
        &self,
        _op: &SchemaOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "EnsureSchema"))
    }

    fn drop_schema(
        &self,
        _op: &SchemaOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "DropSchema"))
    }

    // ========================================================================
    // Tables
    // ========================================================================

    fn create_table(
        &self,
        op: &CreateTableOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let sql = create_table_sql(self, op, ctx, None)?;
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn drop_table(
        &self,
        op: &DropTableOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let name = self.dialect().delimit_name(&op.name, op.schema.as_deref());
        builder.append(&format!("DROP TABLE {}", name)).end_statement(false);
        Ok(())
    }

    fn rename_table(
        &self,
        _op: &RenameTableOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "RenameTable"))
    }

    // ========================================================================
    // Columns
    // ========================================================================

    fn add_column(
        &self,
        op: &AddColumnOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut sql = format!(
            "ALTER TABLE {} ADD ",
            self.dialect().delimit_name(&op.table, op.schema.as_deref())
        );
        self.column_definition(&op.table, op.schema.as_deref(), &op.column, false, ctx, &mut sql)?;
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn drop_column(
        &self,
        op: &DropColumnOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let dialect = self.dialect();
        builder
            .append(&format!(
                "ALTER TABLE {} DROP COLUMN {}",
                dialect.delimit_name(&op.table, op.schema.as_deref()),
                dialect.quote_identifier(&op.name)
            ))
            .end_statement(false);
        Ok(())
    }

    fn alter_column(
        &self,
        _op: &AlterColumnOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "AlterColumn"))
    }

    fn rename_column(
        &self,
        _op: &RenameColumnOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "RenameColumn"))
    }

    // ========================================================================
    // Keys and constraints
    // ========================================================================

    fn add_primary_key(
        &self,
        op: &AddPrimaryKeyOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let dialect = self.dialect();
        builder
            .append(&format!(
                "ALTER TABLE {} ADD {}",
                dialect.delimit_name(&op.table, op.schema.as_deref()),
                primary_key_clause(dialect, op)
            ))
            .end_statement(false);
        Ok(())
    }

    fn drop_primary_key(
        &self,
        op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder.append(&drop_constraint_sql(self.dialect(), op)).end_statement(false);
        Ok(())
    }

    fn add_unique_constraint(
        &self,
        op: &AddUniqueConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let dialect = self.dialect();
        builder
            .append(&format!(
                "ALTER TABLE {} ADD {}",
                dialect.delimit_name(&op.table, op.schema.as_deref()),
                unique_clause(dialect, op)
            ))
            .end_statement(false);
        Ok(())
    }

    fn drop_unique_constraint(
        &self,
        op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder.append(&drop_constraint_sql(self.dialect(), op)).end_statement(false);
        Ok(())
    }

    fn add_check_constraint(
        &self,
        op: &AddCheckConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let dialect = self.dialect();
        builder
            .append(&format!(
                "ALTER TABLE {} ADD {}",
                dialect.delimit_name(&op.table, op.schema.as_deref()),
                check_clause(dialect, op)
            ))
            .end_statement(false);
        Ok(())
    }

    fn drop_check_constraint(
        &self,
        op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder.append(&drop_constraint_sql(self.dialect(), op)).end_statement(false);
        Ok(())
    }

    fn add_foreign_key(
        &self,
        op: &AddForeignKeyOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let dialect = self.dialect();
        builder
            .append(&format!(
                "ALTER TABLE {} ADD {}",
                dialect.delimit_name(&op.table, op.schema.as_deref()),
                foreign_key_clause(dialect, op)
            ))
            .end_statement(false);
        Ok(())
    }

    fn drop_foreign_key(
        &self,
        op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder.append(&drop_constraint_sql(self.dialect(), op)).end_statement(false);
        Ok(())
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    fn create_index(
        &self,
        op: &CreateIndexOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let sql = create_index_sql(self.dialect(), op, "");
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn drop_index(
        &self,
        op: &DropIndexOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let name = self.dialect().delimit_name(&op.name, op.schema.as_deref());
        builder.append(&format!("DROP INDEX {}", name)).end_statement(false);
        Ok(())
    }

    fn rename_index(
        &self,
        _op: &RenameIndexOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "RenameIndex"))
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    fn create_sequence(
        &self,
        op: &CreateSequenceOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut sql = format!(
            "CREATE SEQUENCE {}",
            self.dialect().delimit_name(&op.name, op.schema.as_deref())
        );
        if op.kind != ValueKind::Int64 {
            let mapping = self
                .type_mappings()
                .find_mapping(&ColumnFacets::for_kind(op.kind))
                .ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::Invalid,
                        format!("No store type mapping found for sequence '{}'.", op.name),
                    )
                })?;
            sql.push_str(" AS ");
            sql.push_str(&mapping.store_type);
        }
        sql.push_str(&format!(" START WITH {}", op.start_value));
        sql.push_str(&self.sequence_options(&op.options, false));
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn alter_sequence(
        &self,
        op: &AlterSequenceOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let sql = format!(
            "ALTER SEQUENCE {}{}",
            self.dialect().delimit_name(&op.name, op.schema.as_deref()),
            self.sequence_options(&op.options, true)
        );
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn drop_sequence(
        &self,
        op: &DropSequenceOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let name = self.dialect().delimit_name(&op.name, op.schema.as_deref());
        builder.append(&format!("DROP SEQUENCE {}", name)).end_statement(false);
        Ok(())
    }

    fn rename_sequence(
        &self,
        _op: &RenameSequenceOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "RenameSequence"))
    }

    fn restart_sequence(
        &self,
        _op: &RestartSequenceOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "RestartSequence"))
    }

    // ========================================================================
    // Data
    // ========================================================================

    fn insert_data(
        &self,
        op: &InsertDataOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut commands = insert_data_commands(op, ctx)?;
        let sql = render_data_commands(self.update_generator().as_ref(), &mut commands, true)?;
        builder.append(&sql).end_command(false);
        Ok(())
    }

    fn delete_data(
        &self,
        op: &DeleteDataOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut commands = delete_data_commands(op, ctx)?;
        let sql = render_data_commands(self.update_generator().as_ref(), &mut commands, false)?;
        builder.append(&sql).end_command(false);
        Ok(())
    }

    fn update_data(
        &self,
        op: &UpdateDataOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut commands = update_data_commands(op, ctx)?;
        let sql = render_data_commands(self.update_generator().as_ref(), &mut commands, false)?;
        builder.append(&sql).end_command(false);
        Ok(())
    }

    /// Raw SQL, passed through as its own command.
    fn sql(
        &self,
        op: &SqlOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder
            .append_line(op.sql.trim_end())
            .end_command(op.suppress_transaction);
        Ok(())
    }

    /// Provider-specific operations. A generator that knows an extension
    /// kind overrides this; every other kind is an error.
    fn extension(
        &self,
        op: &ExtensionOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(Error::schema(
            SchemaErrorKind::UnknownOperation,
            format!(
                "{} does not know how to generate SQL for the operation '{}'.",
                self.name(),
                op.kind
            ),
        ))
    }
}

/// Create the migrations SQL generator for the given dialect.
pub fn generator_for_dialect(dialect: Dialect) -> Box<dyn MigrationsSqlGenerator> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteMigrationsSqlGenerator::new()),
        Dialect::Mysql => Box::new(MysqlMigrationsSqlGenerator::new()),
        Dialect::Postgres => Box::new(PostgresMigrationsSqlGenerator::new()),
    }
}

/// The error a generator reports for an operation kind it cannot render.
pub fn unsupported_operation(generator: &str, kind: &str) -> Error {
    Error::schema(
        SchemaErrorKind::UnsupportedOperation,
        format!(
            "Migration SQL generation missing for '{}' operations in {}.",
            kind, generator
        ),
    )
}

fn untyped_column(table: &str, column: &ColumnDefinition, kind: SchemaErrorKind) -> Error {
    Error::schema(
        kind,
        format!(
            "Column '{}' on table '{}' has neither a store type nor a kind; \
             a target model declaring the column is needed to resolve its type.",
            column.name, table
        ),
    )
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// `"a", "b"`
pub fn column_list(dialect: Dialect, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn constraint_prefix(dialect: Dialect, name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!("CONSTRAINT {} ", dialect.quote_identifier(name))
    }
}

/// `CONSTRAINT "PK" PRIMARY KEY ("a")`
pub fn primary_key_clause(dialect: Dialect, op: &AddPrimaryKeyOperation) -> String {
    format!(
        "{}PRIMARY KEY ({})",
        constraint_prefix(dialect, &op.name),
        column_list(dialect, &op.columns)
    )
}

/// `CONSTRAINT "AK" UNIQUE ("a")`
pub fn unique_clause(dialect: Dialect, op: &AddUniqueConstraintOperation) -> String {
    format!(
        "{}UNIQUE ({})",
        constraint_prefix(dialect, &op.name),
        column_list(dialect, &op.columns)
    )
}

/// `CONSTRAINT "CK" CHECK (sql)`
pub fn check_clause(dialect: Dialect, op: &AddCheckConstraintOperation) -> String {
    format!("{}CHECK ({})", constraint_prefix(dialect, &op.name), op.sql)
}

/// `CONSTRAINT "FK" FOREIGN KEY ("a") REFERENCES "p" ("b") [ON UPDATE ..] [ON DELETE ..]`
///
/// `NO ACTION` is the database default and is never rendered.
pub fn foreign_key_clause(dialect: Dialect, op: &AddForeignKeyOperation) -> String {
    let mut sql = format!(
        "{}FOREIGN KEY ({}) REFERENCES {}",
        constraint_prefix(dialect, &op.name),
        column_list(dialect, &op.columns),
        dialect.delimit_name(&op.principal_table, op.principal_schema.as_deref())
    );
    if !op.principal_columns.is_empty() {
        sql.push_str(&format!(" ({})", column_list(dialect, &op.principal_columns)));
    }
    if let Some(action) = op.on_update.as_sql() {
        sql.push_str(" ON UPDATE ");
        sql.push_str(action);
    }
    if let Some(action) = op.on_delete.as_sql() {
        sql.push_str(" ON DELETE ");
        sql.push_str(action);
    }
    sql
}

/// `ALTER TABLE "t" DROP CONSTRAINT "name"`
pub fn drop_constraint_sql(dialect: Dialect, op: &DropConstraintOperation) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        dialect.delimit_name(&op.table, op.schema.as_deref()),
        dialect.quote_identifier(&op.name)
    )
}

/// `CREATE [UNIQUE] INDEX {modifier}"ix" ON "t" ("a") [WHERE filter]`
pub fn create_index_sql(dialect: Dialect, op: &CreateIndexOperation, modifier: &str) -> String {
    let mut sql = format!(
        "CREATE {}INDEX {}{} ON {} ({})",
        if op.is_unique { "UNIQUE " } else { "" },
        modifier,
        dialect.quote_identifier(&op.name),
        dialect.delimit_name(&op.table, op.schema.as_deref()),
        column_list(dialect, &op.columns)
    );
    if let Some(filter) = &op.filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    sql
}

/// The unterminated `CREATE TABLE` statement for `op`.
///
/// `inline_key` names a column whose definition carries the primary key
/// inline (followed by `inline_key_suffix`); the table-level primary key
/// constraint is then omitted.
pub fn create_table_sql<G: MigrationsSqlGenerator + ?Sized>(
    generator: &G,
    op: &CreateTableOperation,
    ctx: &GenerationContext<'_>,
    inline_key: Option<(&str, &str)>,
) -> Result<String> {
    if op.columns.is_empty() {
        return Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!("CREATE TABLE for '{}' declares no columns.", op.name),
        ));
    }

    let dialect = generator.dialect();
    let mut lines = Vec::with_capacity(op.columns.len() + 1);
    for column in &op.columns {
        let mut line = String::new();
        generator.column_definition(
            &op.name,
            op.schema.as_deref(),
            column,
            op.is_key_column(&column.name),
            ctx,
            &mut line,
        )?;
        if let Some((key_column, suffix)) = inline_key {
            if key_column == column.name {
                line.push_str(suffix);
            }
        }
        lines.push(line);
    }

    if let Some(pk) = op.primary_key.as_ref().filter(|_| inline_key.is_none()) {
        lines.push(primary_key_clause(dialect, pk));
    }
    lines.extend(op.unique_constraints.iter().map(|u| unique_clause(dialect, u)));
    lines.extend(op.check_constraints.iter().map(|c| check_clause(dialect, c)));
    lines.extend(op.foreign_keys.iter().map(|fk| foreign_key_clause(dialect, fk)));

    let mut sql = format!(
        "CREATE TABLE {} (\n",
        dialect.delimit_name(&op.name, op.schema.as_deref())
    );
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            sql.push_str(",\n");
        }
        sql.push_str("    ");
        sql.push_str(line);
    }
    sql.push_str("\n)");
    Ok(sql)
}

// ============================================================================
// Seed Data
// ============================================================================

fn dimension_error(table: &str, what: &str, found: usize, expected: usize, row: usize) -> Error {
    Error::schema(
        SchemaErrorKind::Invalid,
        format!(
            "The number of {} ({}) in row {} doesn't match the number of columns ({}) \
             for the data operation on table '{}'. Provide the same number of values and columns.",
            what, found, row, expected, table
        ),
    )
}

fn data_column_types(
    table: &str,
    schema: Option<&str>,
    columns: &[String],
    declared: Option<&Vec<String>>,
    ctx: &GenerationContext<'_>,
) -> Result<Vec<Option<String>>> {
    if columns.is_empty() {
        return Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!("The data operation on table '{}' names no columns.", table),
        ));
    }
    match declared {
        Some(types) if types.len() != columns.len() => Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!(
                "The number of column types ({}) doesn't match the number of columns ({}) \
                 for the data operation on table '{}'.",
                types.len(),
                columns.len(),
                table
            ),
        )),
        Some(types) => Ok(types.iter().cloned().map(Some).collect()),
        None => Ok(columns
            .iter()
            .map(|c| {
                ctx.model
                    .and_then(|model| model.column(table, schema, c))
                    .and_then(|column| column.column_type.clone())
            })
            .collect()),
    }
}

fn key_modifications(
    command: &mut ModificationCommand,
    columns: &[String],
    types: &[Option<String>],
    values: &[Value],
) {
    for ((column, column_type), value) in columns.iter().zip(types).zip(values) {
        command.add_column_modification(ColumnModification::detached(
            column,
            column_type.clone(),
            value.clone(),
            Some(value.clone()),
            ColumnFlags {
                is_key: true,
                is_condition: true,
                ..ColumnFlags::default()
            },
            false,
        ));
    }
}

fn write_modifications(
    command: &mut ModificationCommand,
    columns: &[String],
    types: &[Option<String>],
    values: &[Value],
) {
    for ((column, column_type), value) in columns.iter().zip(types).zip(values) {
        command.add_column_modification(ColumnModification::detached(
            column,
            column_type.clone(),
            value.clone(),
            None,
            ColumnFlags {
                is_write: true,
                ..ColumnFlags::default()
            },
            false,
        ));
    }
}

/// One non-tracked insert command per row of `op`.
pub fn insert_data_commands(
    op: &InsertDataOperation,
    ctx: &GenerationContext<'_>,
) -> Result<Vec<ModificationCommand>> {
    let types = data_column_types(
        &op.table,
        op.schema.as_deref(),
        &op.columns,
        op.column_types.as_ref(),
        ctx,
    )?;
    op.values
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != op.columns.len() {
                return Err(dimension_error(&op.table, "values", row.len(), op.columns.len(), i));
            }
            let mut command =
                ModificationCommand::non_tracked(&op.table, op.schema.clone(), EntityState::Added, false);
            write_modifications(&mut command, &op.columns, &types, row);
            Ok(command)
        })
        .collect()
}

/// One non-tracked delete command per key row of `op`.
pub fn delete_data_commands(
    op: &DeleteDataOperation,
    ctx: &GenerationContext<'_>,
) -> Result<Vec<ModificationCommand>> {
    let types = data_column_types(
        &op.table,
        op.schema.as_deref(),
        &op.key_columns,
        op.key_column_types.as_ref(),
        ctx,
    )?;
    op.key_values
        .iter()
        .enumerate()
        .map(|(i, key)| {
            if key.len() != op.key_columns.len() {
                return Err(dimension_error(&op.table, "key values", key.len(), op.key_columns.len(), i));
            }
            let mut command = ModificationCommand::non_tracked(
                &op.table,
                op.schema.clone(),
                EntityState::Deleted,
                false,
            );
            key_modifications(&mut command, &op.key_columns, &types, key);
            Ok(command)
        })
        .collect()
}

/// One non-tracked update command per row of `op`.
pub fn update_data_commands(
    op: &UpdateDataOperation,
    ctx: &GenerationContext<'_>,
) -> Result<Vec<ModificationCommand>> {
    if op.key_values.len() != op.values.len() {
        return Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!(
                "The number of key rows ({}) doesn't match the number of value rows ({}) \
                 for the data operation on table '{}'.",
                op.key_values.len(),
                op.values.len(),
                op.table
            ),
        ));
    }
    let schema = op.schema.as_deref();
    let key_types = data_column_types(
        &op.table,
        schema,
        &op.key_columns,
        op.key_column_types.as_ref(),
        ctx,
    )?;
    let types = data_column_types(&op.table, schema, &op.columns, op.column_types.as_ref(), ctx)?;

    op.key_values
        .iter()
        .zip(&op.values)
        .enumerate()
        .map(|(i, (key, row))| {
            if key.len() != op.key_columns.len() {
                return Err(dimension_error(&op.table, "key values", key.len(), op.key_columns.len(), i));
            }
            if row.len() != op.columns.len() {
                return Err(dimension_error(&op.table, "values", row.len(), op.columns.len(), i));
            }
            let mut command = ModificationCommand::non_tracked(
                &op.table,
                op.schema.clone(),
                EntityState::Modified,
                false,
            );
            key_modifications(&mut command, &op.key_columns, &key_types, key);
            write_modifications(&mut command, &op.columns, &types, row);
            Ok(command)
        })
        .collect()
}

/// Render seed-data commands with `generator`, as one multi-row insert when
/// `bulk` is set and the generator supports it.
pub fn render_data_commands(
    generator: &dyn UpdateSqlGenerator,
    commands: &mut [ModificationCommand],
    bulk: bool,
) -> Result<String> {
    let mut sql = String::new();
    let mut params = ParameterBuffer::new(generator.dialect());
    if bulk && generator.supports_bulk_insert() {
        generator.append_bulk_insert_operation(&mut sql, commands, 0, &mut params)?;
    } else {
        for (position, command) in commands.iter_mut().enumerate() {
            generator.append_command(&mut sql, command, position, &mut params)?;
        }
    }
    debug_assert!(params.is_empty(), "seed data renders literals only");
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RelationalModel, Table};
    use crate::operations::ReferentialAction;
    use strata_core::DialectTypeMappingSource;

    /// A generator with no overrides: every default rendering.
    #[derive(Debug)]
    struct AnsiGenerator {
        type_mappings: DialectTypeMappingSource,
    }

    impl AnsiGenerator {
        fn new() -> Self {
            Self {
                type_mappings: DialectTypeMappingSource::new(Dialect::Postgres),
            }
        }
    }

    impl MigrationsSqlGenerator for AnsiGenerator {
        fn name(&self) -> &'static str {
            "AnsiGenerator"
        }

        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        fn type_mappings(&self) -> &dyn TypeMappingSource {
            &self.type_mappings
        }
    }

    fn generate(op: MigrationOperation) -> Result<Vec<MigrationCommand>> {
        AnsiGenerator::new().generate(&[op], None, &MigrationsSqlGenerationOptions::default())
    }

    fn sql(op: MigrationOperation) -> String {
        let commands = generate(op).unwrap();
        assert_eq!(commands.len(), 1);
        commands[0].command_text().to_string()
    }

    fn schema_error_kind(err: &Error) -> SchemaErrorKind {
        match err {
            Error::Schema(e) => e.kind,
            other => panic!("expected a schema error, got {other}"),
        }
    }

    fn blogs() -> CreateTableOperation {
        CreateTableOperation::new("Blogs")
            .column(ColumnDefinition::new("Id", ValueKind::Int32).identity())
            .column(ColumnDefinition::new("Name", ValueKind::String).nullable())
            .primary_key("PK_Blogs", &["Id"])
    }

    // ========================================================================
    // Tables and Columns
    // ========================================================================

    #[test]
    fn test_create_table_layout() {
        assert_eq!(
            sql(MigrationOperation::CreateTable(blogs())),
            "CREATE TABLE \"Blogs\" (\n    \"Id\" integer NOT NULL,\n    \"Name\" text,\n    \
             CONSTRAINT \"PK_Blogs\" PRIMARY KEY (\"Id\")\n);\n"
        );
    }

    #[test]
    fn test_create_table_with_foreign_key_actions() {
        let op = CreateTableOperation::new("Posts")
            .schema("blog")
            .column(ColumnDefinition::new("Id", ValueKind::Int32))
            .column(ColumnDefinition::new("BlogId", ValueKind::Int32))
            .primary_key("PK_Posts", &["Id"])
            .foreign_key(
                AddForeignKeyOperation::new("FK_Posts_Blogs", &["BlogId"], "Blogs", &["Id"])
                    .on_delete(ReferentialAction::Cascade),
            );
        let text = sql(MigrationOperation::CreateTable(op));
        assert!(text.starts_with("CREATE TABLE \"blog\".\"Posts\" (\n"));
        assert!(text.contains(
            "CONSTRAINT \"FK_Posts_Blogs\" FOREIGN KEY (\"BlogId\") REFERENCES \"Blogs\" (\"Id\") ON DELETE CASCADE"
        ));
        assert!(!text.contains("NO ACTION"));
    }

    #[test]
    fn test_default_values() {
        let add = |column: ColumnDefinition| {
            sql(MigrationOperation::AddColumn(AddColumnOperation {
                table: "Blogs".into(),
                column,
                ..AddColumnOperation::default()
            }))
        };

        assert_eq!(
            add(ColumnDefinition::new("Rating", ValueKind::Int32).default_value(3)),
            "ALTER TABLE \"Blogs\" ADD \"Rating\" integer NOT NULL DEFAULT 3;\n"
        );
        assert_eq!(
            add(ColumnDefinition::new("Title", ValueKind::String).default_value("it's")),
            "ALTER TABLE \"Blogs\" ADD \"Title\" text NOT NULL DEFAULT 'it''s';\n"
        );
        assert_eq!(
            add(ColumnDefinition::new("Created", ValueKind::DateTime).default_sql("now()")),
            "ALTER TABLE \"Blogs\" ADD \"Created\" timestamp without time zone NOT NULL DEFAULT (now());\n"
        );
        assert_eq!(
            add(ColumnDefinition::new("Note", ValueKind::String)
                .nullable()
                .default_value(Value::Null)),
            "ALTER TABLE \"Blogs\" ADD \"Note\" text;\n"
        );
    }

    #[test]
    fn test_column_type_reuses_model_store_type() {
        let model = RelationalModel::new().with_table(Table {
            name: "Blogs".into(),
            columns: vec![ColumnDefinition::new("Name", ValueKind::String).column_type("citext")],
            ..Table::default()
        });
        let ctx_options = MigrationsSqlGenerationOptions::default();
        let ctx = GenerationContext::new(Some(&model), &ctx_options);
        let generator = AnsiGenerator::new();

        let same = ColumnDefinition::new("Name", ValueKind::String);
        assert_eq!(generator.column_type("Blogs", None, &same, false, &ctx).unwrap(), "citext");

        let wider = ColumnDefinition::new("Name", ValueKind::String).max_length(20);
        assert_eq!(
            generator.column_type("Blogs", None, &wider, false, &ctx).unwrap(),
            "character varying(20)"
        );
    }

    #[test]
    fn test_untyped_column_without_model() {
        let column = ColumnDefinition {
            name: "Mystery".into(),
            ..ColumnDefinition::default()
        };
        let options = MigrationsSqlGenerationOptions::default();
        let ctx = GenerationContext::new(None, &options);
        let err = AnsiGenerator::new()
            .column_type("Blogs", None, &column, false, &ctx)
            .unwrap_err();
        assert_eq!(schema_error_kind(&err), SchemaErrorKind::MissingModel);
    }

    #[test]
    fn test_computed_column() {
        let op = MigrationOperation::AddColumn(AddColumnOperation {
            table: "Lines".into(),
            column: ColumnDefinition::new("Total", ValueKind::Int32).computed("\"Qty\" * \"Price\"", true),
            ..AddColumnOperation::default()
        });
        assert_eq!(
            sql(op),
            "ALTER TABLE \"Lines\" ADD \"Total\" integer GENERATED ALWAYS AS (\"Qty\" * \"Price\") STORED;\n"
        );
    }

    // ========================================================================
    // Unsupported and Unknown Operations
    // ========================================================================

    #[test]
    fn test_unsupported_operations_fail_loudly() {
        let alter = MigrationOperation::AlterColumn(AlterColumnOperation {
            table: "Blogs".into(),
            column: ColumnDefinition::new("Name", ValueKind::String),
            old_column: ColumnDefinition::new("Name", ValueKind::String).nullable(),
            ..AlterColumnOperation::default()
        });
        let err = generate(alter).unwrap_err();
        assert_eq!(schema_error_kind(&err), SchemaErrorKind::UnsupportedOperation);
        let message = err.to_string();
        assert!(message.contains("AlterColumn"));
        assert!(message.contains("AnsiGenerator"));

        for op in [
            MigrationOperation::EnsureSchema(SchemaOperation {
                name: "blog".into(),
                ..SchemaOperation::default()
            }),
            MigrationOperation::RenameTable(RenameTableOperation::default()),
            MigrationOperation::RestartSequence(RestartSequenceOperation::default()),
        ] {
            let err = generate(op).unwrap_err();
            assert_eq!(schema_error_kind(&err), SchemaErrorKind::UnsupportedOperation);
        }
    }

    #[test]
    fn test_unknown_extension_names_generator_and_kind() {
        let err = generate(MigrationOperation::Extension(ExtensionOperation {
            kind: "CreateHypertable".into(),
            payload: serde_json::json!({ "table": "Readings" }),
            ..ExtensionOperation::default()
        }))
        .unwrap_err();
        assert_eq!(schema_error_kind(&err), SchemaErrorKind::UnknownOperation);
        assert!(err.to_string().contains("AnsiGenerator"));
        assert!(err.to_string().contains("CreateHypertable"));
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    #[test]
    fn test_sequence_options_create_versus_alter() {
        let mut create = CreateSequenceOperation::new("OrderNumbers");
        create.kind = ValueKind::Int32;
        create.start_value = 1000;
        create.options.increment_by = 5;
        assert_eq!(
            sql(MigrationOperation::CreateSequence(create)),
            "CREATE SEQUENCE \"OrderNumbers\" AS integer START WITH 1000 INCREMENT BY 5;\n"
        );

        let alter = AlterSequenceOperation {
            name: "OrderNumbers".into(),
            options: SequenceOptions {
                is_cached: false,
                ..SequenceOptions::default()
            },
            ..AlterSequenceOperation::default()
        };
        assert_eq!(
            sql(MigrationOperation::AlterSequence(alter)),
            "ALTER SEQUENCE \"OrderNumbers\" INCREMENT BY 1 NO MINVALUE NO MAXVALUE NO CYCLE NO CACHE;\n"
        );
    }

    fn alter_order_numbers(is_cached: bool, cache_size: Option<i64>) -> String {
        sql(MigrationOperation::AlterSequence(AlterSequenceOperation {
            name: "OrderNumbers".into(),
            options: SequenceOptions {
                is_cached,
                cache_size,
                ..SequenceOptions::default()
            },
            ..AlterSequenceOperation::default()
        }))
    }

    #[test]
    fn test_alter_sequence_cached_without_size_keeps_cache() {
        assert_eq!(
            alter_order_numbers(true, None),
            "ALTER SEQUENCE \"OrderNumbers\" INCREMENT BY 1 NO MINVALUE NO MAXVALUE NO CYCLE;\n"
        );
    }

    #[test]
    fn test_alter_sequence_cached_with_size() {
        assert_eq!(
            alter_order_numbers(true, Some(20)),
            "ALTER SEQUENCE \"OrderNumbers\" INCREMENT BY 1 NO MINVALUE NO MAXVALUE NO CYCLE CACHE 20;\n"
        );
    }

    #[test]
    fn test_alter_sequence_uncached() {
        let sql = alter_order_numbers(false, Some(20));
        assert!(sql.ends_with(" NO CYCLE NO CACHE;\n"), "{sql}");
    }

    // ========================================================================
    // Seed Data
    // ========================================================================

    #[test]
    fn test_insert_data_renders_one_multi_row_insert() {
        let op = MigrationOperation::InsertData(InsertDataOperation {
            table: "Blogs".into(),
            columns: vec!["Id".into(), "Name".into()],
            values: vec![
                vec![Value::Int(1), Value::Text("One".into())],
                vec![Value::Int(2), Value::Text("Two".into())],
            ],
            ..InsertDataOperation::default()
        });
        assert_eq!(
            sql(op),
            "INSERT INTO \"Blogs\" (\"Id\", \"Name\")\nVALUES (1, 'One'),\n(2, 'Two');\n"
        );
    }

    #[test]
    fn test_delete_and_update_data() {
        let delete = MigrationOperation::DeleteData(DeleteDataOperation {
            table: "Blogs".into(),
            key_columns: vec!["Id".into()],
            key_values: vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            ..DeleteDataOperation::default()
        });
        assert_eq!(
            sql(delete),
            "DELETE FROM \"Blogs\"\nWHERE \"Id\" = 1;\nDELETE FROM \"Blogs\"\nWHERE \"Id\" = 2;\n"
        );

        let update = MigrationOperation::UpdateData(UpdateDataOperation {
            table: "Blogs".into(),
            key_columns: vec!["Id".into()],
            key_values: vec![vec![Value::Int(1)]],
            columns: vec!["Name".into()],
            values: vec![vec![Value::Text("Renamed".into())]],
            ..UpdateDataOperation::default()
        });
        assert_eq!(
            sql(update),
            "UPDATE \"Blogs\" SET \"Name\" = 'Renamed'\nWHERE \"Id\" = 1;\n"
        );
    }

    #[test]
    fn test_seed_data_dimension_mismatch_is_invalid() {
        let op = MigrationOperation::InsertData(InsertDataOperation {
            table: "Blogs".into(),
            columns: vec!["Id".into(), "Name".into()],
            values: vec![vec![Value::Int(1)]],
            ..InsertDataOperation::default()
        });
        let err = generate(op).unwrap_err();
        assert_eq!(schema_error_kind(&err), SchemaErrorKind::Invalid);
        assert!(err.to_string().contains("'Blogs'"));

        let op = MigrationOperation::UpdateData(UpdateDataOperation {
            table: "Blogs".into(),
            key_columns: vec!["Id".into()],
            key_values: vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            columns: vec!["Name".into()],
            values: vec![vec![Value::Text("x".into())]],
            ..UpdateDataOperation::default()
        });
        assert_eq!(schema_error_kind(&generate(op).unwrap_err()), SchemaErrorKind::Invalid);
    }

    // ========================================================================
    // Commands
    // ========================================================================

    #[test]
    fn test_sql_operation_keeps_its_own_command() {
        let commands = AnsiGenerator::new()
            .generate(
                &[
                    MigrationOperation::CreateTable(blogs()),
                    MigrationOperation::Sql(SqlOperation {
                        sql: "VACUUM".into(),
                        suppress_transaction: true,
                        ..SqlOperation::default()
                    }),
                    MigrationOperation::DropTable(DropTableOperation {
                        name: "Legacy".into(),
                        ..DropTableOperation::default()
                    }),
                ],
                None,
                &MigrationsSqlGenerationOptions::default(),
            )
            .unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1].command_text(), "VACUUM\n");
        assert!(commands[1].transaction_suppressed());
        assert!(!commands[2].transaction_suppressed());
    }

    #[test]
    fn test_options_from_json() {
        let options: MigrationsSqlGenerationOptions =
            serde_json::from_str(r#"{ "idempotent": true }"#).unwrap();
        assert_eq!(
            options,
            MigrationsSqlGenerationOptions::new().with_idempotent(true)
        );
    }
}

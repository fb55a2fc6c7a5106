//! MySQL migrations SQL generator.
//!
//! MySQL indexes and constraints are scoped to their table, so every drop or
//! rename names the table. Columns change through `MODIFY COLUMN` with a full
//! definition, and comments are declared inline.

use super::{
    GenerationContext, MigrationsSqlGenerator, create_index_sql, create_table_sql,
    unsupported_operation,
};
use crate::command::MigrationCommandListBuilder;
use crate::operations::{
    AlterColumnOperation, AlterSequenceOperation, ColumnDefinition, CreateIndexOperation,
    CreateSequenceOperation, CreateTableOperation, DropConstraintOperation, DropIndexOperation,
    DropSequenceOperation, RenameColumnOperation, RenameIndexOperation, RenameSequenceOperation,
    RenameTableOperation, RestartSequenceOperation, SchemaOperation,
};
use strata_core::{
    Dialect, DialectTypeMappingSource, Error, Result, SchemaErrorKind, TypeMappingSource,
};

const DIALECT: Dialect = Dialect::Mysql;

/// Migrations SQL generator for MySQL.
#[derive(Debug, Clone, Copy)]
pub struct MysqlMigrationsSqlGenerator {
    type_mappings: DialectTypeMappingSource,
}

impl MysqlMigrationsSqlGenerator {
    pub const fn new() -> Self {
        Self {
            type_mappings: DialectTypeMappingSource::new(DIALECT),
        }
    }

    fn drop_table_scoped(&self, op: &DropConstraintOperation, what: &str, builder: &mut MigrationCommandListBuilder) {
        builder
            .append(&format!(
                "ALTER TABLE {} DROP {} {}",
                DIALECT.delimit_name(&op.table, op.schema.as_deref()),
                what,
                DIALECT.quote_identifier(&op.name)
            ))
            .end_statement(false);
    }
}

impl Default for MysqlMigrationsSqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn owning_table<'a>(table: Option<&'a str>, index: &str, action: &str) -> Result<&'a str> {
    table.ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::Invalid,
            format!(
                "MySQL needs the owning table to {} index '{}'; set the operation's table.",
                action, index
            ),
        )
    })
}

impl MigrationsSqlGenerator for MysqlMigrationsSqlGenerator {
    fn name(&self) -> &'static str {
        "MysqlMigrationsSqlGenerator"
    }

    fn dialect(&self) -> Dialect {
        DIALECT
    }

    fn type_mappings(&self) -> &dyn TypeMappingSource {
        &self.type_mappings
    }

    fn identity_clause(&self, _column: &ColumnDefinition) -> Option<&'static str> {
        Some("AUTO_INCREMENT")
    }

    fn column_comment_clause(&self, comment: &str) -> Option<String> {
        Some(format!(" COMMENT {}", DIALECT.string_literal(comment)))
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// A MySQL schema is a database.
    fn ensure_schema(
        &self,
        op: &SchemaOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder
            .append(&format!("CREATE DATABASE IF NOT EXISTS {}", DIALECT.quote_identifier(&op.name)))
            .end_statement(false);
        Ok(())
    }

    // ========================================================================
    // Tables and Columns
    // ========================================================================

    fn create_table(
        &self,
        op: &CreateTableOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut sql = create_table_sql(self, op, ctx, None)?;
        if let Some(comment) = &op.comment {
            sql.push_str(" COMMENT=");
            sql.push_str(&DIALECT.string_literal(comment));
        }
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn rename_table(
        &self,
        op: &RenameTableOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let new_name = op.new_name.as_deref().unwrap_or(&op.name);
        let new_schema = op.new_schema.as_deref().or(op.schema.as_deref());
        if new_name == op.name && new_schema == op.schema.as_deref() {
            return Ok(());
        }
        builder
            .append(&format!(
                "ALTER TABLE {} RENAME {}",
                DIALECT.delimit_name(&op.name, op.schema.as_deref()),
                DIALECT.delimit_name(new_name, new_schema)
            ))
            .end_statement(false);
        Ok(())
    }

    fn alter_column(
        &self,
        op: &AlterColumnOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let schema = op.schema.as_deref();
        let mut sql = format!("ALTER TABLE {} MODIFY COLUMN ", DIALECT.delimit_name(&op.table, schema));
        self.column_definition(&op.table, schema, &op.column, false, ctx, &mut sql)?;
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn rename_column(
        &self,
        op: &RenameColumnOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder
            .append(&format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                DIALECT.delimit_name(&op.table, op.schema.as_deref()),
                DIALECT.quote_identifier(&op.name),
                DIALECT.quote_identifier(&op.new_name)
            ))
            .end_statement(false);
        Ok(())
    }

    // ========================================================================
    // Keys and Constraints
    // ========================================================================

    fn drop_primary_key(
        &self,
        op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder
            .append(&format!(
                "ALTER TABLE {} DROP PRIMARY KEY",
                DIALECT.delimit_name(&op.table, op.schema.as_deref())
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
        self.drop_table_scoped(op, "KEY", builder);
        Ok(())
    }

    fn drop_check_constraint(
        &self,
        op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        self.drop_table_scoped(op, "CHECK", builder);
        Ok(())
    }

    fn drop_foreign_key(
        &self,
        op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        self.drop_table_scoped(op, "FOREIGN KEY", builder);
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
        if op.filter.is_some() {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!("Index '{}' has a filter; MySQL does not support filtered indexes.", op.name),
            ));
        }
        builder.append(&create_index_sql(DIALECT, op, "")).end_statement(false);
        Ok(())
    }

    fn drop_index(
        &self,
        op: &DropIndexOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let table = owning_table(op.table.as_deref(), &op.name, "drop")?;
        builder
            .append(&format!(
                "DROP INDEX {} ON {}",
                DIALECT.quote_identifier(&op.name),
                DIALECT.delimit_name(table, op.schema.as_deref())
            ))
            .end_statement(false);
        Ok(())
    }

    fn rename_index(
        &self,
        op: &RenameIndexOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let table = owning_table(op.table.as_deref(), &op.name, "rename")?;
        builder
            .append(&format!(
                "ALTER TABLE {} RENAME INDEX {} TO {}",
                DIALECT.delimit_name(table, op.schema.as_deref()),
                DIALECT.quote_identifier(&op.name),
                DIALECT.quote_identifier(&op.new_name)
            ))
            .end_statement(false);
        Ok(())
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    fn create_sequence(
        &self,
        _op: &CreateSequenceOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "CreateSequence"))
    }

    fn alter_sequence(
        &self,
        _op: &AlterSequenceOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "AlterSequence"))
    }

    fn drop_sequence(
        &self,
        _op: &DropSequenceOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "DropSequence"))
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
}

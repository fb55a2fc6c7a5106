//! SQLite migrations SQL generator.
//!
//! SQLite's `ALTER TABLE` can only rename tables and add, drop or rename
//! columns. Constraint and sequence operations are rejected rather than
//! emulated; callers that need them rebuild the table themselves.

use super::{GenerationContext, MigrationsSqlGenerator, create_table_sql, unsupported_operation};
use crate::command::MigrationCommandListBuilder;
use crate::operations::{
    AddCheckConstraintOperation, AddForeignKeyOperation, AddPrimaryKeyOperation,
    AddUniqueConstraintOperation, AlterSequenceOperation, CreateSequenceOperation,
    CreateTableOperation, DropConstraintOperation, DropSequenceOperation, RenameColumnOperation,
    RenameTableOperation,
};
use strata_core::{Dialect, DialectTypeMappingSource, Result, TypeMappingSource};

const DIALECT: Dialect = Dialect::Sqlite;

/// Migrations SQL generator for SQLite.
#[derive(Debug, Clone, Copy)]
pub struct SqliteMigrationsSqlGenerator {
    type_mappings: DialectTypeMappingSource,
}

impl SqliteMigrationsSqlGenerator {
    pub const fn new() -> Self {
        Self {
            type_mappings: DialectTypeMappingSource::new(DIALECT),
        }
    }
}

impl Default for SqliteMigrationsSqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationsSqlGenerator for SqliteMigrationsSqlGenerator {
    fn name(&self) -> &'static str {
        "SqliteMigrationsSqlGenerator"
    }

    fn dialect(&self) -> Dialect {
        DIALECT
    }

    fn type_mappings(&self) -> &dyn TypeMappingSource {
        &self.type_mappings
    }

    /// A single-column identity key becomes an inline
    /// `PRIMARY KEY AUTOINCREMENT`, the only way SQLite generates keys.
    fn create_table(
        &self,
        op: &CreateTableOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let inline_key = op.primary_key.as_ref().and_then(|pk| match pk.columns.as_slice() {
            [column] => op
                .columns
                .iter()
                .find(|c| &c.name == column && c.is_identity())
                .map(|c| {
                    let constraint = if pk.name.is_empty() {
                        String::new()
                    } else {
                        format!(" CONSTRAINT {}", DIALECT.quote_identifier(&pk.name))
                    };
                    (c.name.as_str(), format!("{} PRIMARY KEY AUTOINCREMENT", constraint))
                }),
            _ => None,
        });

        let sql = create_table_sql(
            self,
            op,
            ctx,
            inline_key.as_ref().map(|(column, suffix)| (*column, suffix.as_str())),
        )?;
        builder.append(&sql).end_statement(false);
        Ok(())
    }

    fn rename_table(
        &self,
        op: &RenameTableOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let Some(new_name) = op.new_name.as_deref().filter(|n| *n != op.name) else {
            return Ok(());
        };
        builder
            .append(&format!(
                "ALTER TABLE {} RENAME TO {}",
                DIALECT.quote_identifier(&op.name),
                DIALECT.quote_identifier(new_name)
            ))
            .end_statement(false);
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
                DIALECT.quote_identifier(&op.table),
                DIALECT.quote_identifier(&op.name),
                DIALECT.quote_identifier(&op.new_name)
            ))
            .end_statement(false);
        Ok(())
    }

    fn add_primary_key(
        &self,
        _op: &AddPrimaryKeyOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "AddPrimaryKey"))
    }

    fn drop_primary_key(
        &self,
        _op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "DropPrimaryKey"))
    }

    fn add_unique_constraint(
        &self,
        _op: &AddUniqueConstraintOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "AddUniqueConstraint"))
    }

    fn drop_unique_constraint(
        &self,
        _op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "DropUniqueConstraint"))
    }

    fn add_check_constraint(
        &self,
        _op: &AddCheckConstraintOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "AddCheckConstraint"))
    }

    fn drop_check_constraint(
        &self,
        _op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "DropCheckConstraint"))
    }

    fn add_foreign_key(
        &self,
        _op: &AddForeignKeyOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "AddForeignKey"))
    }

    fn drop_foreign_key(
        &self,
        _op: &DropConstraintOperation,
        _ctx: &GenerationContext<'_>,
        _builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        Err(unsupported_operation(self.name(), "DropForeignKey"))
    }

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
}

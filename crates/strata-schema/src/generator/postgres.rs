//! PostgreSQL migrations SQL generator.
//!
//! PostgreSQL can alter nearly everything in place: column types, nullability,
//! defaults and identity each get their own `ALTER COLUMN` statement, and
//! tables, columns, indexes and sequences rename without rebuilds.

use super::{
    GenerationContext, MigrationsSqlGenerator, create_index_sql, create_table_sql,
};
use crate::command::MigrationCommandListBuilder;
use crate::operations::{
    AddColumnOperation, AlterColumnOperation, CONCURRENT_INDEX_ANNOTATION, ColumnDefinition,
    CreateIndexOperation, CreateTableOperation, RenameColumnOperation, RenameIndexOperation,
    RenameSequenceOperation, RenameTableOperation, RestartSequenceOperation, SchemaOperation,
    SequenceOptions, annotation_flag,
};
use strata_core::{
    Dialect, DialectTypeMappingSource, Error, Result, SchemaErrorKind, TypeMappingSource,
};

const DIALECT: Dialect = Dialect::Postgres;

/// Migrations SQL generator for PostgreSQL.
#[derive(Debug, Clone, Copy)]
pub struct PostgresMigrationsSqlGenerator {
    type_mappings: DialectTypeMappingSource,
}

impl PostgresMigrationsSqlGenerator {
    pub const fn new() -> Self {
        Self {
            type_mappings: DialectTypeMappingSource::new(DIALECT),
        }
    }

    fn comment_on_column(&self, table: &str, schema: Option<&str>, column: &str, comment: Option<&str>) -> String {
        format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            DIALECT.delimit_name(table, schema),
            DIALECT.quote_identifier(column),
            comment.map_or_else(|| "NULL".to_string(), |c| DIALECT.string_literal(c))
        )
    }
}

impl Default for PostgresMigrationsSqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationsSqlGenerator for PostgresMigrationsSqlGenerator {
    fn name(&self) -> &'static str {
        "PostgresMigrationsSqlGenerator"
    }

    fn dialect(&self) -> Dialect {
        DIALECT
    }

    fn type_mappings(&self) -> &dyn TypeMappingSource {
        &self.type_mappings
    }

    fn identity_clause(&self, _column: &ColumnDefinition) -> Option<&'static str> {
        Some("GENERATED BY DEFAULT AS IDENTITY")
    }

    fn computed_column_clause(&self, column: &ColumnDefinition, sql: &str) -> Result<String> {
        if column.is_stored != Some(true) {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!(
                    "Computed column '{}' must be stored; PostgreSQL has no virtual generated columns.",
                    column.name
                ),
            ));
        }
        Ok(format!(" GENERATED ALWAYS AS ({}) STORED", sql))
    }

    fn sequence_cache_clause(&self, options: &SequenceOptions, for_alter: bool) -> Option<String> {
        match (options.is_cached, options.cache_size) {
            (true, Some(size)) => Some(format!(" CACHE {}", size)),
            (true, None) if for_alter => Some(" CACHE 1".to_string()),
            (true, None) => None,
            (false, _) => Some(" CACHE 1".to_string()),
        }
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Idempotent scripts already wrap every command in a `DO` block, which
    /// cannot nest, so they get the plain `IF NOT EXISTS` form.
    fn ensure_schema(
        &self,
        op: &SchemaOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        if op.name == "public" {
            return Ok(());
        }
        if ctx.options.idempotent {
            builder
                .append(&format!("CREATE SCHEMA IF NOT EXISTS {}", DIALECT.quote_identifier(&op.name)))
                .end_statement(false);
            return Ok(());
        }
        builder.append(&format!(
            "DO $EF$\nBEGIN\n    IF NOT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = {}) THEN\n        \
             CREATE SCHEMA {};\n    END IF;\nEND $EF$",
            DIALECT.string_literal(&op.name),
            DIALECT.quote_identifier(&op.name)
        ));
        builder.end_statement(false);
        Ok(())
    }

    fn drop_schema(
        &self,
        op: &SchemaOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder
            .append(&format!("DROP SCHEMA {}", DIALECT.quote_identifier(&op.name)))
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
        let schema = op.schema.as_deref();
        builder.append_statement(&create_table_sql(self, op, ctx, None)?);
        if let Some(comment) = &op.comment {
            builder.append_statement(&format!(
                "COMMENT ON TABLE {} IS {}",
                DIALECT.delimit_name(&op.name, schema),
                DIALECT.string_literal(comment)
            ));
        }
        for column in &op.columns {
            if let Some(comment) = &column.comment {
                builder.append_statement(&self.comment_on_column(&op.name, schema, &column.name, Some(comment)));
            }
        }
        builder.end_command(false);
        Ok(())
    }

    fn rename_table(
        &self,
        op: &RenameTableOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut name = op.name.as_str();
        if let Some(new_name) = op.new_name.as_deref().filter(|n| *n != op.name) {
            builder.append_statement(&format!(
                "ALTER TABLE {} RENAME TO {}",
                DIALECT.delimit_name(name, op.schema.as_deref()),
                DIALECT.quote_identifier(new_name)
            ));
            name = new_name;
        }
        if let Some(new_schema) = op.new_schema.as_deref().filter(|s| Some(*s) != op.schema.as_deref()) {
            builder.append_statement(&format!(
                "ALTER TABLE {} SET SCHEMA {}",
                DIALECT.delimit_name(name, op.schema.as_deref()),
                DIALECT.quote_identifier(new_schema)
            ));
        }
        builder.end_command(false);
        Ok(())
    }

    fn add_column(
        &self,
        op: &AddColumnOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let schema = op.schema.as_deref();
        let mut sql = format!("ALTER TABLE {} ADD ", DIALECT.delimit_name(&op.table, schema));
        self.column_definition(&op.table, schema, &op.column, false, ctx, &mut sql)?;
        builder.append_statement(&sql);
        if let Some(comment) = &op.column.comment {
            builder.append_statement(&self.comment_on_column(&op.table, schema, &op.column.name, Some(comment)));
        }
        builder.end_command(false);
        Ok(())
    }

    /// One statement per changed facet, all in one command. An alteration
    /// that changes nothing renders nothing.
    fn alter_column(
        &self,
        op: &AlterColumnOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let schema = op.schema.as_deref();
        let (column, old) = (&op.column, &op.old_column);
        if column.computed_column_sql != old.computed_column_sql {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!(
                    "Column '{}' on table '{}' cannot change its computed expression in place; \
                     drop and re-add the column.",
                    column.name, op.table
                ),
            ));
        }

        let alter = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            DIALECT.delimit_name(&op.table, schema),
            DIALECT.quote_identifier(&column.name)
        );

        let store_type = if column.is_type_unknown() {
            None
        } else {
            Some(self.column_type(&op.table, schema, column, false, ctx)?)
        };
        if op.changes_type() {
            if let Some(store_type) = &store_type {
                builder.append_statement(&format!("{} TYPE {}", alter, store_type));
            }
        }

        if column.is_nullable != old.is_nullable {
            let verb = if column.is_nullable { "DROP" } else { "SET" };
            builder.append_statement(&format!("{} {} NOT NULL", alter, verb));
        }

        if column.default_value != old.default_value || column.default_value_sql != old.default_value_sql {
            match self.default_value(column, store_type.as_deref())? {
                Some(default) => builder.append_statement(&format!("{} SET DEFAULT {}", alter, default)),
                None => builder.append_statement(&format!("{} DROP DEFAULT", alter)),
            };
        }

        match (old.is_identity(), column.is_identity()) {
            (false, true) => {
                builder.append_statement(&format!("{} ADD GENERATED BY DEFAULT AS IDENTITY", alter));
            }
            (true, false) => {
                builder.append_statement(&format!("{} DROP IDENTITY", alter));
            }
            _ => {}
        }

        if column.comment != old.comment {
            builder.append_statement(&self.comment_on_column(&op.table, schema, &column.name, column.comment.as_deref()));
        }

        builder.end_command(false);
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
    // Indexes
    // ========================================================================

    /// Concurrent builds cannot run inside a transaction block, so their
    /// command suppresses the migration transaction.
    fn create_index(
        &self,
        op: &CreateIndexOperation,
        ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let concurrently = annotation_flag(&op.annotations, CONCURRENT_INDEX_ANNOTATION);
        if concurrently && ctx.options.idempotent {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!(
                    "Index '{}' is created concurrently, which cannot run inside the \
                     DO blocks of an idempotent script.",
                    op.name
                ),
            ));
        }
        let modifier = if concurrently { "CONCURRENTLY " } else { "" };
        builder
            .append(&create_index_sql(DIALECT, op, modifier))
            .end_statement(concurrently);
        Ok(())
    }

    fn rename_index(
        &self,
        op: &RenameIndexOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        builder
            .append(&format!(
                "ALTER INDEX {} RENAME TO {}",
                DIALECT.delimit_name(&op.name, op.schema.as_deref()),
                DIALECT.quote_identifier(&op.new_name)
            ))
            .end_statement(false);
        Ok(())
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    fn rename_sequence(
        &self,
        op: &RenameSequenceOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let mut name = op.name.as_str();
        if let Some(new_name) = op.new_name.as_deref().filter(|n| *n != op.name) {
            builder.append_statement(&format!(
                "ALTER SEQUENCE {} RENAME TO {}",
                DIALECT.delimit_name(name, op.schema.as_deref()),
                DIALECT.quote_identifier(new_name)
            ));
            name = new_name;
        }
        if let Some(new_schema) = op.new_schema.as_deref().filter(|s| Some(*s) != op.schema.as_deref()) {
            builder.append_statement(&format!(
                "ALTER SEQUENCE {} SET SCHEMA {}",
                DIALECT.delimit_name(name, op.schema.as_deref()),
                DIALECT.quote_identifier(new_schema)
            ));
        }
        builder.end_command(false);
        Ok(())
    }

    fn restart_sequence(
        &self,
        op: &RestartSequenceOperation,
        _ctx: &GenerationContext<'_>,
        builder: &mut MigrationCommandListBuilder,
    ) -> Result<()> {
        let name = DIALECT.delimit_name(&op.name, op.schema.as_deref());
        let sql = match op.start_value {
            Some(start) => format!("ALTER SEQUENCE {} RESTART WITH {}", name, start),
            None => format!("ALTER SEQUENCE {} RESTART", name),
        };
        builder.append(&sql).end_statement(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::MigrationsSqlGenerationOptions;
    use crate::operations::{CreateSequenceOperation, MigrationOperation};
    use strata_core::ValueKind;

    fn render(ops: &[MigrationOperation]) -> Vec<String> {
        PostgresMigrationsSqlGenerator::new()
            .generate(ops, None, &MigrationsSqlGenerationOptions::default())
            .unwrap()
            .into_iter()
            .map(|c| c.command_text().to_string())
            .collect()
    }

    fn alter(column: ColumnDefinition, old_column: ColumnDefinition) -> MigrationOperation {
        MigrationOperation::AlterColumn(AlterColumnOperation {
            table: "Blogs".into(),
            column,
            old_column,
            ..AlterColumnOperation::default()
        })
    }

    #[test]
    fn test_identity_key_column() {
        let op = CreateTableOperation::new("Blogs")
            .column(ColumnDefinition::new("Id", ValueKind::Int32).identity())
            .primary_key("PK_Blogs", &["Id"]);
        assert_eq!(
            render(&[MigrationOperation::CreateTable(op)]),
            vec![
                "CREATE TABLE \"Blogs\" (\n    \"Id\" integer NOT NULL GENERATED BY DEFAULT AS IDENTITY,\n    \
                 CONSTRAINT \"PK_Blogs\" PRIMARY KEY (\"Id\")\n);\n"
            ]
        );
    }

    #[test]
    fn test_table_and_column_comments_share_the_command() {
        let op = CreateTableOperation::new("Blogs")
            .column(ColumnDefinition::new("Name", ValueKind::String).comment("Display name"))
            .comment("All blogs");
        let commands = render(&[MigrationOperation::CreateTable(op)]);
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("COMMENT ON TABLE \"Blogs\" IS 'All blogs';\n"));
        assert!(commands[0].contains("COMMENT ON COLUMN \"Blogs\".\"Name\" IS 'Display name';\n"));
    }

    #[test]
    fn test_alter_column_statements() {
        let old = ColumnDefinition::new("Name", ValueKind::String).nullable();
        let new = ColumnDefinition::new("Name", ValueKind::String)
            .max_length(100)
            .default_value("untitled");
        assert_eq!(
            render(&[alter(new, old)]),
            vec![
                "ALTER TABLE \"Blogs\" ALTER COLUMN \"Name\" TYPE character varying(100);\n\
                 ALTER TABLE \"Blogs\" ALTER COLUMN \"Name\" SET NOT NULL;\n\
                 ALTER TABLE \"Blogs\" ALTER COLUMN \"Name\" SET DEFAULT 'untitled';\n"
            ]
        );
    }

    #[test]
    fn test_alter_column_identity_and_no_change() {
        let old = ColumnDefinition::new("Id", ValueKind::Int32);
        let new = ColumnDefinition::new("Id", ValueKind::Int32).identity();
        assert_eq!(
            render(&[alter(new.clone(), old.clone())]),
            vec!["ALTER TABLE \"Blogs\" ALTER COLUMN \"Id\" ADD GENERATED BY DEFAULT AS IDENTITY;\n"]
        );
        assert_eq!(
            render(&[alter(old.clone(), new)]),
            vec!["ALTER TABLE \"Blogs\" ALTER COLUMN \"Id\" DROP IDENTITY;\n"]
        );
        assert!(render(&[alter(old.clone(), old)]).is_empty());
    }

    #[test]
    fn test_virtual_computed_column_is_rejected() {
        let op = MigrationOperation::AddColumn(AddColumnOperation {
            table: "Lines".into(),
            column: ColumnDefinition::new("Total", ValueKind::Int32).computed("\"Qty\" * 2", false),
            ..AddColumnOperation::default()
        });
        let result = PostgresMigrationsSqlGenerator::new().generate(
            &[op],
            None,
            &MigrationsSqlGenerationOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ensure_schema() {
        let public = MigrationOperation::EnsureSchema(SchemaOperation {
            name: "public".into(),
            ..SchemaOperation::default()
        });
        assert!(render(&[public]).is_empty());

        let blog = MigrationOperation::EnsureSchema(SchemaOperation {
            name: "blog".into(),
            ..SchemaOperation::default()
        });
        assert_eq!(
            render(&[blog]),
            vec![
                "DO $EF$\nBEGIN\n    IF NOT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = 'blog') THEN\n        \
                 CREATE SCHEMA \"blog\";\n    END IF;\nEND $EF$;\n"
            ]
        );
    }

    #[test]
    fn test_renames() {
        let commands = render(&[
            MigrationOperation::RenameTable(RenameTableOperation {
                name: "Blog".into(),
                new_name: Some("Blogs".into()),
                new_schema: Some("archive".into()),
                ..RenameTableOperation::default()
            }),
            MigrationOperation::RenameColumn(RenameColumnOperation {
                name: "Title".into(),
                new_name: "Name".into(),
                table: "Blogs".into(),
                ..RenameColumnOperation::default()
            }),
            MigrationOperation::RenameIndex(RenameIndexOperation {
                name: "IX_Old".into(),
                new_name: "IX_New".into(),
                ..RenameIndexOperation::default()
            }),
        ]);
        assert_eq!(
            commands,
            vec![
                "ALTER TABLE \"Blog\" RENAME TO \"Blogs\";\nALTER TABLE \"Blogs\" SET SCHEMA \"archive\";\n",
                "ALTER TABLE \"Blogs\" RENAME COLUMN \"Title\" TO \"Name\";\n",
                "ALTER INDEX \"IX_Old\" RENAME TO \"IX_New\";\n",
            ]
        );
    }

    #[test]
    fn test_concurrent_index_suppresses_transaction() {
        let op = CreateIndexOperation {
            name: "IX_Blogs_Name".into(),
            table: "Blogs".into(),
            columns: vec!["Name".into()],
            annotations: [(CONCURRENT_INDEX_ANNOTATION.to_string(), serde_json::Value::Bool(true))]
                .into_iter()
                .collect(),
            ..CreateIndexOperation::default()
        };
        let generator = PostgresMigrationsSqlGenerator::new();
        let commands = generator
            .generate(
                &[MigrationOperation::CreateIndex(op.clone())],
                None,
                &MigrationsSqlGenerationOptions::default(),
            )
            .unwrap();
        assert_eq!(
            commands[0].command_text(),
            "CREATE INDEX CONCURRENTLY \"IX_Blogs_Name\" ON \"Blogs\" (\"Name\");\n"
        );
        assert!(commands[0].transaction_suppressed());

        let idempotent = MigrationsSqlGenerationOptions::new().with_idempotent(true);
        assert!(generator
            .generate(&[MigrationOperation::CreateIndex(op)], None, &idempotent)
            .is_err());
    }

    #[test]
    fn test_sequences() {
        let mut create = CreateSequenceOperation::new("Orders");
        create.options.cache_size = Some(20);
        assert_eq!(
            render(&[
                MigrationOperation::CreateSequence(create),
                MigrationOperation::RestartSequence(RestartSequenceOperation {
                    name: "Orders".into(),
                    start_value: Some(500),
                    ..RestartSequenceOperation::default()
                }),
            ]),
            vec![
                "CREATE SEQUENCE \"Orders\" START WITH 1 CACHE 20;\n",
                "ALTER SEQUENCE \"Orders\" RESTART WITH 500;\n",
            ]
        );
    }
}

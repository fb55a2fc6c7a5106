use super::{
    CommandRendering, ParameterBuffer, UpdateSqlGenerator, append_delete_command_header,
    append_insert_command_header, append_update_command_header, append_values,
    append_values_header, append_where_clause, append_where_condition,
};
use crate::column::ColumnModification;
use crate::command::{CommandView, ModificationCommand};
use crate::result_set::ResultSetMapping;
use strata_core::{Dialect, Error, Result};

/// Reads generated values with a `SELECT` issued after the write.
///
/// The select is guarded by the dialect's rows-affected function so a write
/// that matched no row returns no row. Writes with nothing to read select
/// the affected count itself.
#[derive(Debug, Clone, Copy)]
pub struct SelectAfterUpdateSqlGenerator {
    dialect: Dialect,
}

impl SelectAfterUpdateSqlGenerator {
    /// A generator for a dialect with rows-affected and last-identity
    /// functions.
    pub fn new(dialect: Dialect) -> Result<Self> {
        match dialect {
            Dialect::Mysql | Dialect::Sqlite => Ok(Self { dialect }),
            Dialect::Postgres => Err(Error::config(
                "select-after update SQL generation needs a rows-affected function; use RETURNING on postgres",
            )),
        }
    }

    pub const fn mysql() -> Self {
        Self {
            dialect: Dialect::Mysql,
        }
    }

    fn rows_affected_function(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => "changes()",
            Dialect::Mysql | Dialect::Postgres => "ROW_COUNT()",
        }
    }

    fn identity_function(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => "last_insert_rowid()",
            Dialect::Mysql | Dialect::Postgres => "LAST_INSERT_ID()",
        }
    }

    fn terminate(&self, sql: &mut String) {
        sql.push_str(self.dialect.statement_terminator());
        sql.push('\n');
    }

    /// `SELECT "a" FROM "t" WHERE ROW_COUNT() = 1 AND "Id" = LAST_INSERT_ID();`
    fn append_select_affected(
        &self,
        sql: &mut String,
        view: &CommandView<'_>,
        read_columns: &[&ColumnModification],
        inserting: bool,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        sql.push_str("SELECT ");
        for (i, column) in read_columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&self.dialect.quote_identifier(column.column_name()));
        }
        sql.push_str("\nFROM ");
        sql.push_str(&self.dialect.delimit_name(view.table, view.schema));
        sql.push_str("\nWHERE ");
        sql.push_str(self.rows_affected_function());
        sql.push_str(" = 1");

        for column in view.key_columns() {
            sql.push_str(" AND ");
            if inserting && column.is_read() {
                sql.push_str(&self.dialect.quote_identifier(column.column_name()));
                sql.push_str(" = ");
                sql.push_str(self.identity_function());
            } else {
                append_where_condition(sql, self.dialect, view, column, !inserting, params)?;
            }
        }
        self.terminate(sql);
        Ok(CommandRendering::new(ResultSetMapping::LAST_IN_RESULT_SET).in_transaction())
    }

    /// `SELECT ROW_COUNT();`
    fn append_select_affected_count(&self, sql: &mut String) -> CommandRendering {
        sql.push_str("SELECT ");
        sql.push_str(self.rows_affected_function());
        self.terminate(sql);
        CommandRendering::new(
            ResultSetMapping::LAST_IN_RESULT_SET | ResultSetMapping::RESULT_SET_WITH_ROWS_AFFECTED_ONLY,
        )
    }
}

impl UpdateSqlGenerator for SelectAfterUpdateSqlGenerator {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn append_insert_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        _position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        let view = command.view()?;
        let writes: Vec<&ColumnModification> = view.write_columns().collect();
        let reads: Vec<&ColumnModification> = view.read_columns().collect();

        append_insert_command_header(sql, self.dialect, &view, &writes);
        append_values_header(sql, self.dialect, &writes);
        append_values(sql, self.dialect, &view, &writes, params)?;
        self.terminate(sql);

        if reads.is_empty() {
            return Ok(CommandRendering::new(ResultSetMapping::NO_RESULTS));
        }
        self.append_select_affected(sql, &view, &reads, true, params)
    }

    fn append_update_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        _position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        let tracked = command.is_tracked();
        let view = command.view()?;
        let writes: Vec<&ColumnModification> = view.write_columns().collect();
        let reads: Vec<&ColumnModification> = view.read_columns().collect();

        append_update_command_header(sql, self.dialect, &view, &writes, params)?;
        append_where_clause(sql, self.dialect, &view, params)?;
        self.terminate(sql);

        if !reads.is_empty() {
            self.append_select_affected(sql, &view, &reads, false, params)
        } else if tracked {
            Ok(self.append_select_affected_count(sql))
        } else {
            Ok(CommandRendering::new(ResultSetMapping::NO_RESULTS))
        }
    }

    fn append_delete_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        _position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        let tracked = command.is_tracked();
        let view = command.view()?;

        append_delete_command_header(sql, self.dialect, &view);
        append_where_clause(sql, self.dialect, &view, params)?;
        self.terminate(sql);

        if tracked {
            Ok(self.append_select_affected_count(sql))
        } else {
            Ok(CommandRendering::new(ResultSetMapping::NO_RESULTS))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntityMapping, EntityState, PropertyMapping, UpdateEntry};
    use strata_core::{Value, ValueKind};

    fn command(state: EntityState, values: Vec<(&'static str, Value)>) -> ModificationCommand {
        let mapping = EntityMapping::new("Blog", "Blogs")
            .property(PropertyMapping::new("Id", "int", ValueKind::Int32).key().identity())
            .property(PropertyMapping::new("Name", "longtext", ValueKind::String))
            .build();
        let mut command = ModificationCommand::new("Blogs", None, false);
        command
            .add_entry(UpdateEntry::new(mapping, state).with_values(values).unwrap(), true)
            .unwrap();
        command
    }

    #[test]
    fn test_insert_selects_identity() {
        let generator = SelectAfterUpdateSqlGenerator::mysql();
        let mut sql = String::new();
        let mut params = ParameterBuffer::new(Dialect::Mysql);
        let mut command = command(EntityState::Added, vec![("Name", Value::from("Ada"))]);
        let rendering = generator
            .append_command(&mut sql, &mut command, 0, &mut params)
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `Blogs` (`Name`)\nVALUES (?);\n\
             SELECT `Id`\nFROM `Blogs`\nWHERE ROW_COUNT() = 1 AND `Id` = LAST_INSERT_ID();\n"
        );
        assert_eq!(rendering.mapping, ResultSetMapping::LAST_IN_RESULT_SET);
        assert!(rendering.requires_transaction);
    }

    #[test]
    fn test_delete_selects_affected_count() {
        let generator = SelectAfterUpdateSqlGenerator::mysql();
        let mut sql = String::new();
        let mut params = ParameterBuffer::new(Dialect::Mysql);
        let mut command = command(EntityState::Deleted, vec![("Id", Value::Int(5))]);
        let rendering = generator
            .append_command(&mut sql, &mut command, 0, &mut params)
            .unwrap();
        assert_eq!(sql, "DELETE FROM `Blogs`\nWHERE `Id` = ?;\nSELECT ROW_COUNT();\n");
        assert!(rendering.mapping.is_rows_affected_only());
        assert!(rendering.mapping.is_last_in_result_set());
        assert!(!rendering.requires_transaction);
        assert_eq!(params.values(), &[Value::Int(5)]);
    }

    #[test]
    fn test_sqlite_functions() {
        let generator = SelectAfterUpdateSqlGenerator::new(Dialect::Sqlite).unwrap();
        let mut sql = String::new();
        let mut params = ParameterBuffer::new(Dialect::Sqlite);
        let mut command = command(EntityState::Added, vec![("Name", Value::from("Ada"))]);
        generator
            .append_command(&mut sql, &mut command, 0, &mut params)
            .unwrap();
        assert!(sql.ends_with("WHERE changes() = 1 AND \"Id\" = last_insert_rowid();\n"));
    }

    #[test]
    fn test_postgres_is_rejected() {
        assert!(SelectAfterUpdateSqlGenerator::new(Dialect::Postgres).is_err());
    }
}

use super::{
    CommandRendering, ParameterBuffer, UpdateSqlGenerator, append_delete_command_header,
    append_insert_command_header, append_returning_clause, append_update_command_header,
    append_values, append_values_header, append_where_clause,
};
use crate::column::ColumnModification;
use crate::command::ModificationCommand;
use crate::result_set::ResultSetMapping;
use strata_core::{Dialect, Result};

/// Reads generated values back through `RETURNING`.
///
/// Updates and deletes with nothing to read return a literal `1` so a
/// missing row reveals a concurrency failure the same way for every
/// statement kind.
#[derive(Debug, Clone, Copy)]
pub struct ReturningUpdateSqlGenerator {
    dialect: Dialect,
}

impl ReturningUpdateSqlGenerator {
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn finish_with_sentinel(
        &self,
        sql: &mut String,
        read_columns: &[&ColumnModification],
        tracked: bool,
    ) -> CommandRendering {
        let mapping = if read_columns.is_empty() && !tracked {
            ResultSetMapping::NO_RESULTS
        } else {
            append_returning_clause(sql, self.dialect, read_columns);
            ResultSetMapping::LAST_IN_RESULT_SET
        };
        sql.push_str(self.dialect.statement_terminator());
        sql.push('\n');
        CommandRendering::new(mapping)
    }
}

impl UpdateSqlGenerator for ReturningUpdateSqlGenerator {
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

        let mapping = if reads.is_empty() {
            ResultSetMapping::NO_RESULTS
        } else {
            append_returning_clause(sql, self.dialect, &reads);
            ResultSetMapping::LAST_IN_RESULT_SET
        };
        sql.push_str(self.dialect.statement_terminator());
        sql.push('\n');
        Ok(CommandRendering::new(mapping))
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
        Ok(self.finish_with_sentinel(sql, &reads, tracked))
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
        Ok(self.finish_with_sentinel(sql, &[], tracked))
    }

    /// SQLite leaves the row order of `RETURNING` unspecified, so its
    /// inserts stay one statement per row.
    fn supports_bulk_insert(&self) -> bool {
        self.dialect != Dialect::Sqlite
    }

    fn append_bulk_insert_operation(
        &self,
        sql: &mut String,
        commands: &mut [ModificationCommand],
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<Vec<CommandRendering>> {
        let has_writes = match commands.first_mut() {
            Some(first) => first.view()?.write_columns().next().is_some(),
            None => return Ok(Vec::new()),
        };
        if commands.len() == 1 || !has_writes {
            return commands
                .iter_mut()
                .enumerate()
                .map(|(offset, command)| {
                    self.append_insert_operation(sql, command, position + offset, params)
                })
                .collect();
        }

        let views = commands
            .iter_mut()
            .map(ModificationCommand::view)
            .collect::<Result<Vec<_>>>()?;
        let writes: Vec<&ColumnModification> = views[0].write_columns().collect();
        let reads: Vec<&ColumnModification> = views[0].read_columns().collect();

        append_insert_command_header(sql, self.dialect, &views[0], &writes);
        append_values_header(sql, self.dialect, &writes);
        for (i, view) in views.iter().enumerate() {
            if i > 0 {
                sql.push_str(",\n");
            }
            let row: Vec<&ColumnModification> = view.write_columns().collect();
            append_values(sql, self.dialect, view, &row, params)?;
        }

        let renderings = if reads.is_empty() {
            vec![CommandRendering::new(ResultSetMapping::NO_RESULTS); views.len()]
        } else {
            append_returning_clause(sql, self.dialect, &reads);
            let mut renderings =
                vec![CommandRendering::new(ResultSetMapping::NOT_LAST_IN_RESULT_SET); views.len()];
            if let Some(last) = renderings.last_mut() {
                *last = CommandRendering::new(ResultSetMapping::LAST_IN_RESULT_SET);
            }
            renderings
        };
        sql.push_str(self.dialect.statement_terminator());
        sql.push('\n');

        tracing::debug!(
            table = views[0].table,
            rows = views.len(),
            "Rendered multi-row insert"
        );
        Ok(renderings)
    }
}

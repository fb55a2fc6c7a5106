//! Update SQL generation.
//!
//! An [`UpdateSqlGenerator`] renders one [`ModificationCommand`] at a time
//! into a batch's command text and reports, as a [`ResultSetMapping`], what
//! the statement contributes to the batch's result stream. Two strategies
//! ship with the crate:
//!
//! - [`ReturningUpdateSqlGenerator`]: read-back columns come back through a
//!   `RETURNING` clause (PostgreSQL, SQLite).
//! - [`SelectAfterUpdateSqlGenerator`]: a `SELECT` after the write fetches
//!   read-back columns or the affected row count (MySQL).
//!
//! The free functions in this module render the statement fragments both
//! strategies share, so a provider-specific generator can reuse them.

mod returning;
mod select_after;

pub use returning::ReturningUpdateSqlGenerator;
pub use select_after::SelectAfterUpdateSqlGenerator;

use crate::column::{ColumnModification, ParameterNameGenerator};
use crate::command::{CommandView, ModificationCommand};
use crate::entry::EntityState;
use crate::result_set::ResultSetMapping;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strata_core::{
    Dialect, Error, Result, TypeMapping, UpdateError, UpdateErrorKind, Value, ValueKind,
};

/// Parameters bound by one batch.
///
/// With numbered placeholders a parameter name binds once and every later
/// reference reuses its position; with positional `?` placeholders every
/// reference binds its own copy of the value.
#[derive(Debug)]
pub struct ParameterBuffer {
    dialect: Dialect,
    names: ParameterNameGenerator,
    values: Vec<Value>,
    positions: HashMap<String, usize>,
}

impl ParameterBuffer {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            names: ParameterNameGenerator::new(),
            values: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Bind `value` under `name`, returning the placeholder to render.
    pub fn bind(&mut self, name: &str, value: &Value) -> String {
        if !self.dialect.numbered_placeholders() {
            self.values.push(value.clone());
            return self.dialect.placeholder(self.values.len());
        }
        if let Some(&position) = self.positions.get(name) {
            return self.dialect.placeholder(position);
        }
        self.values.push(value.clone());
        let position = self.values.len();
        self.positions.insert(name.to_string(), position);
        self.dialect.placeholder(position)
    }

    /// Bind the current value of `column`.
    pub fn bind_current(&mut self, column: &ColumnModification, entries: &[crate::UpdateEntry]) -> String {
        let name = column.parameter_name(&mut self.names);
        self.bind(name, column.value(entries))
    }

    /// Bind the original value of `column`.
    pub fn bind_original(&mut self, column: &ColumnModification, entries: &[crate::UpdateEntry]) -> String {
        let name = column.original_parameter_name(&mut self.names);
        self.bind(name, column.original_value(entries))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Forget all bindings (a batch re-rendering its text).
    pub fn clear(&mut self) {
        self.names.reset();
        self.values.clear();
        self.positions.clear();
    }
}

/// What rendering one command produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRendering {
    pub mapping: ResultSetMapping,
    /// The statements must run in one transaction to be read back correctly.
    pub requires_transaction: bool,
}

impl CommandRendering {
    pub const fn new(mapping: ResultSetMapping) -> Self {
        Self {
            mapping,
            requires_transaction: false,
        }
    }

    #[must_use]
    pub const fn in_transaction(mut self) -> Self {
        self.requires_transaction = true;
        self
    }
}

/// Renders modification commands as SQL for one dialect.
///
/// Generators are stateless and shared between batches.
pub trait UpdateSqlGenerator: Send + Sync + fmt::Debug {
    fn dialect(&self) -> Dialect;

    fn append_insert_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering>;

    fn append_update_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering>;

    fn append_delete_operation(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering>;

    /// Can adjacent inserts into one table render as one multi-row INSERT?
    fn supports_bulk_insert(&self) -> bool {
        false
    }

    /// Render `commands`, all inserts into the same table with the same
    /// columns, returning one rendering per command.
    fn append_bulk_insert_operation(
        &self,
        sql: &mut String,
        commands: &mut [ModificationCommand],
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<Vec<CommandRendering>> {
        commands
            .iter_mut()
            .enumerate()
            .map(|(offset, command)| {
                self.append_insert_operation(sql, command, position + offset, params)
            })
            .collect()
    }

    /// Render `command` according to its state.
    fn append_command(
        &self,
        sql: &mut String,
        command: &mut ModificationCommand,
        position: usize,
        params: &mut ParameterBuffer,
    ) -> Result<CommandRendering> {
        let state = command.entity_state();
        tracing::debug!(
            table = command.table(),
            state = %state,
            position,
            "Rendering modification command"
        );
        match state {
            EntityState::Added => self.append_insert_operation(sql, command, position, params),
            EntityState::Modified => self.append_update_operation(sql, command, position, params),
            EntityState::Deleted => self.append_delete_operation(sql, command, position, params),
            EntityState::Unchanged | EntityState::Detached => Err(Error::Update(UpdateError::new(
                UpdateErrorKind::InvalidState,
                format!(
                    "Cannot render a modification command for table '{}' in state '{}'.",
                    command.table(),
                    state
                ),
                command.entry_descriptors(),
            ))),
        }
    }
}

/// The update SQL generator each dialect uses by default.
pub fn update_generator_for_dialect(dialect: Dialect) -> Arc<dyn UpdateSqlGenerator> {
    if dialect.supports_returning() {
        Arc::new(ReturningUpdateSqlGenerator::new(dialect))
    } else {
        Arc::new(SelectAfterUpdateSqlGenerator::mysql())
    }
}

/// Render `value` as a literal for `column`.
pub fn literal(dialect: Dialect, column: &ColumnModification, value: &Value) -> Result<String> {
    let kind = column
        .kind()
        .or_else(|| ValueKind::of(value))
        .unwrap_or(ValueKind::String);
    TypeMapping::new(column.column_type().unwrap_or_default(), kind, dialect)
        .generate_sql_literal(value)
}

/// `INSERT INTO "t" ("a", "b")`
pub fn append_insert_command_header(
    sql: &mut String,
    dialect: Dialect,
    view: &CommandView<'_>,
    write_columns: &[&ColumnModification],
) {
    sql.push_str("INSERT INTO ");
    sql.push_str(&dialect.delimit_name(view.table, view.schema));
    if !write_columns.is_empty() {
        sql.push_str(" (");
        append_column_list(sql, dialect, write_columns);
        sql.push(')');
    }
}

/// `\nVALUES (...)`, or the dialect's form for a row with no written columns.
pub fn append_values_header(sql: &mut String, dialect: Dialect, write_columns: &[&ColumnModification]) {
    if write_columns.is_empty() {
        match dialect {
            Dialect::Mysql => sql.push_str(" ()\nVALUES ()"),
            Dialect::Postgres | Dialect::Sqlite => sql.push_str("\nDEFAULT VALUES"),
        }
    } else {
        sql.push_str("\nVALUES ");
    }
}

/// `(v1, v2)` for one row.
pub fn append_values(
    sql: &mut String,
    dialect: Dialect,
    view: &CommandView<'_>,
    write_columns: &[&ColumnModification],
    params: &mut ParameterBuffer,
) -> Result<()> {
    if write_columns.is_empty() {
        return Ok(());
    }
    sql.push('(');
    for (i, column) in write_columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        append_value(sql, dialect, view, column, params)?;
    }
    sql.push(')');
    Ok(())
}

/// A written value: a bound parameter or an inline literal.
pub fn append_value(
    sql: &mut String,
    dialect: Dialect,
    view: &CommandView<'_>,
    column: &ColumnModification,
    params: &mut ParameterBuffer,
) -> Result<()> {
    if column.use_current_value_parameter() {
        sql.push_str(&params.bind_current(column, view.entries));
    } else {
        sql.push_str(&literal(dialect, column, view.value(column))?);
    }
    Ok(())
}

/// `UPDATE "t" SET "a" = $1, "b" = $2`
pub fn append_update_command_header(
    sql: &mut String,
    dialect: Dialect,
    view: &CommandView<'_>,
    write_columns: &[&ColumnModification],
    params: &mut ParameterBuffer,
) -> Result<()> {
    if write_columns.is_empty() {
        return Err(Error::Update(UpdateError::new(
            UpdateErrorKind::InvalidState,
            format!(
                "The update of a row in table '{}' has no columns to write.",
                view.table
            ),
            view.entries.iter().map(crate::UpdateEntry::descriptor).collect(),
        )));
    }
    sql.push_str("UPDATE ");
    sql.push_str(&dialect.delimit_name(view.table, view.schema));
    sql.push_str(" SET ");
    for (i, column) in write_columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&dialect.quote_identifier(column.column_name()));
        sql.push_str(" = ");
        append_value(sql, dialect, view, column, params)?;
    }
    Ok(())
}

/// `DELETE FROM "t"`
pub fn append_delete_command_header(sql: &mut String, dialect: Dialect, view: &CommandView<'_>) {
    sql.push_str("DELETE FROM ");
    sql.push_str(&dialect.delimit_name(view.table, view.schema));
}

/// `\nWHERE "k" = $1 AND "v" IS NULL` over the condition columns, compared
/// with their original values.
pub fn append_where_clause(
    sql: &mut String,
    dialect: Dialect,
    view: &CommandView<'_>,
    params: &mut ParameterBuffer,
) -> Result<()> {
    let conditions: Vec<&ColumnModification> = view.condition_columns().collect();
    if conditions.is_empty() {
        return Ok(());
    }
    sql.push_str("\nWHERE ");
    for (i, column) in conditions.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        append_where_condition(sql, dialect, view, column, true, params)?;
    }
    Ok(())
}

/// One `"c" = value` (or `"c" IS NULL`) comparison.
pub fn append_where_condition(
    sql: &mut String,
    dialect: Dialect,
    view: &CommandView<'_>,
    column: &ColumnModification,
    use_original: bool,
    params: &mut ParameterBuffer,
) -> Result<()> {
    sql.push_str(&dialect.quote_identifier(column.column_name()));
    let value = if use_original {
        view.original_value(column)
    } else {
        view.value(column)
    };
    if value.is_null() {
        sql.push_str(" IS NULL");
        return Ok(());
    }
    sql.push_str(" = ");
    if !column.use_parameters() {
        sql.push_str(&literal(dialect, column, value)?);
    } else if use_original {
        sql.push_str(&params.bind_original(column, view.entries));
    } else {
        sql.push_str(&params.bind_current(column, view.entries));
    }
    Ok(())
}

/// `\nRETURNING "a", "b"`, or `\nRETURNING 1` with no columns.
pub fn append_returning_clause(sql: &mut String, dialect: Dialect, read_columns: &[&ColumnModification]) {
    sql.push_str("\nRETURNING ");
    if read_columns.is_empty() {
        sql.push('1');
    } else {
        append_column_list(sql, dialect, read_columns);
    }
}

fn append_column_list(sql: &mut String, dialect: Dialect, columns: &[&ColumnModification]) {
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&dialect.quote_identifier(column.column_name()));
    }
}

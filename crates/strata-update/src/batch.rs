//! Command batches: many modification commands, one round-trip.
//!
//! A [`ModificationCommandBatch`] accumulates commands, renders them into a
//! single multi-statement command text once complete, executes it, and
//! walks the returned result sets in command order. Each command's
//! [`ResultSetMapping`] says what it contributes to the stream; the
//! consumer propagates read-back values into the commands and checks every
//! row count against what the commands expected.

use crate::command::ModificationCommand;
use crate::entry::EntityState;
use crate::result_set::{ResultSetMapping, ResultStream};
use crate::sql::{ParameterBuffer, UpdateSqlGenerator};
use asupersync::{Cx, Outcome};
use std::sync::Arc;
use strata_core::{
    EntryDescriptor, Error, Executor, Result, TypeError, UpdateError, UpdateErrorKind, Value,
};

/// Table, schema, written and read column names of an insert; inserts with
/// equal layouts can share one multi-row statement.
type InsertLayout = (String, Option<String>, Vec<String>, Vec<String>);

/// A bounded group of commands executed in one round-trip.
#[derive(Debug)]
pub struct ModificationCommandBatch {
    generator: Arc<dyn UpdateSqlGenerator>,
    max_batch_size: usize,
    commands: Vec<ModificationCommand>,
    mappings: Vec<ResultSetMapping>,
    sql: String,
    params: ParameterBuffer,
    requires_transaction: bool,
    completed: bool,
    more_batches_expected: bool,
}

impl ModificationCommandBatch {
    pub fn new(generator: Arc<dyn UpdateSqlGenerator>, max_batch_size: usize) -> Self {
        let dialect = generator.dialect();
        Self {
            generator,
            max_batch_size: max_batch_size.max(1),
            commands: Vec::new(),
            mappings: Vec::new(),
            sql: String::new(),
            params: ParameterBuffer::new(dialect),
            requires_transaction: false,
            completed: false,
            more_batches_expected: false,
        }
    }

    /// Add a command; a full or completed batch hands it back.
    #[allow(clippy::result_large_err)]
    pub fn try_add_command(
        &mut self,
        command: ModificationCommand,
    ) -> std::result::Result<(), ModificationCommand> {
        if self.completed || self.commands.len() >= self.max_batch_size {
            return Err(command);
        }
        self.commands.push(command);
        Ok(())
    }

    /// Render the command text. No commands can be added afterwards.
    pub fn complete(&mut self, more_batches_expected: bool) -> Result<()> {
        if self.completed {
            return Ok(());
        }

        self.sql.clear();
        self.params.clear();
        self.mappings.clear();
        let mut requires_transaction = self.commands.len() > 1;

        let mut index = 0;
        while index < self.commands.len() {
            let run = if self.generator.supports_bulk_insert() {
                self.bulk_insert_run(index)?
            } else {
                1
            };

            if run > 1 {
                let renderings = self.generator.append_bulk_insert_operation(
                    &mut self.sql,
                    &mut self.commands[index..index + run],
                    index,
                    &mut self.params,
                )?;
                for rendering in renderings {
                    requires_transaction |= rendering.requires_transaction;
                    self.mappings.push(rendering.mapping);
                }
            } else {
                let rendering = self.generator.append_command(
                    &mut self.sql,
                    &mut self.commands[index],
                    index,
                    &mut self.params,
                )?;
                requires_transaction |= rendering.requires_transaction;
                self.mappings.push(rendering.mapping);
            }
            index += run;
        }

        self.requires_transaction = requires_transaction;
        self.more_batches_expected = more_batches_expected;
        self.completed = true;

        tracing::debug!(
            commands = self.commands.len(),
            parameters = self.params.len(),
            requires_transaction,
            "Completed modification batch"
        );
        tracing::trace!(sql = %self.sql, "Batch SQL");
        Ok(())
    }

    /// Number of adjacent inserts starting at `start` that share one layout.
    fn bulk_insert_run(&mut self, start: usize) -> Result<usize> {
        let Some(layout) = insert_layout(&mut self.commands[start])? else {
            return Ok(1);
        };
        let mut end = start + 1;
        while end < self.commands.len() {
            if insert_layout(&mut self.commands[end])?.as_ref() != Some(&layout) {
                break;
            }
            end += 1;
        }
        Ok(end - start)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[ModificationCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<ModificationCommand> {
        self.commands
    }

    pub fn result_set_mappings(&self) -> &[ResultSetMapping] {
        &self.mappings
    }

    /// The rendered command text (empty until completed).
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[Value] {
        self.params.values()
    }

    pub fn requires_transaction(&self) -> bool {
        self.requires_transaction
    }

    pub fn more_batches_expected(&self) -> bool {
        self.more_batches_expected
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Descriptors of every entry in the batch.
    pub fn entry_descriptors(&self) -> Vec<EntryDescriptor> {
        self.commands
            .iter()
            .flat_map(ModificationCommand::entry_descriptors)
            .collect()
    }

    /// Execute the batch and propagate its results into the commands.
    ///
    /// Concurrency failures and other update errors are returned as they
    /// are; any other failure is wrapped in a store error carrying every
    /// entry of the batch.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(commands = self.commands.len()))]
    pub async fn execute<E: Executor>(&mut self, cx: &Cx, conn: &E) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if !self.completed {
            if let Err(e) = self.complete(false) {
                return Outcome::Err(e);
            }
        }
        if self.commands.is_empty() {
            return Outcome::Ok(());
        }

        let sets = match conn.query_multi(cx, &self.sql, self.params.values()).await {
            Outcome::Ok(sets) => sets,
            Outcome::Err(e) => return Outcome::Err(self.wrap_error(e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut stream = ResultStream::new(sets);
        match self.consume(&mut stream) {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(self.wrap_error(e)),
        }
    }

    /// Walk the result stream in command order.
    pub(crate) fn consume(&mut self, stream: &mut ResultStream) -> Result<()> {
        let mut on_result_set: Option<bool> = None;
        let mut index = 0;
        while index < self.mappings.len() {
            let mapping = self.mappings[index];
            if mapping.has_result_row() {
                if on_result_set == Some(false) {
                    return Err(Error::Custom(format!(
                        "The result set for command {} of {} (table '{}') is missing.",
                        index + 1,
                        self.commands.len(),
                        self.commands[index].table()
                    )));
                }
                index = if mapping.is_rows_affected_only() {
                    self.consume_rows_affected_only(index, stream)?
                } else {
                    self.consume_result_set(index, stream)?
                };
                on_result_set = Some(stream.next_result());
            }
            index += 1;
        }

        if on_result_set == Some(true) {
            tracing::warn!(
                remaining = stream.remaining(),
                "Unexpected trailing result set after saving changes"
            );
        }
        Ok(())
    }

    /// One rows-affected count covers the window of commands sharing the
    /// result set. Returns the index of the window's last command.
    fn consume_rows_affected_only(&self, start: usize, stream: &mut ResultStream) -> Result<usize> {
        let end = self.window_end(start);
        let expected = end - start;

        let Some(row) = stream.read() else {
            return Err(self.concurrency_error(end, expected, 0));
        };
        let actual = row.get(0).and_then(Value::as_i64).ok_or_else(|| {
            Error::Type(TypeError {
                expected: "rows-affected count",
                actual: row
                    .get(0)
                    .map_or_else(|| "empty row".to_string(), |v| format!("{v:?}")),
                column: None,
            })
        })?;
        if usize::try_from(actual).ok() != Some(expected) {
            return Err(self.concurrency_error(end, expected, actual));
        }
        Ok(end - 1)
    }

    /// One row per command, in command order (or by a trailing ordinal
    /// column when positional mapping is enabled). Returns the index of the
    /// last command consumed.
    fn consume_result_set(&mut self, start: usize, stream: &mut ResultStream) -> Result<usize> {
        let mut index = start;
        let mut rows_affected = 0usize;
        loop {
            let Some(row) = stream.read() else {
                let end = self.window_end(index);
                let expected = rows_affected + (end - index);
                let actual = i64::try_from(rows_affected).unwrap_or(i64::MAX);
                return Err(self.concurrency_error(end, expected, actual));
            };

            let target = if self.mappings[index].is_positional() {
                let ordinal = row
                    .len()
                    .checked_sub(1)
                    .and_then(|last| row.get(last))
                    .and_then(Value::as_i64)
                    .and_then(|o| usize::try_from(o).ok());
                match ordinal {
                    Some(ordinal) if start + ordinal < self.commands.len() => start + ordinal,
                    _ => {
                        return Err(Error::Type(TypeError {
                            expected: "command position",
                            actual: format!("row with {} column(s)", row.len()),
                            column: None,
                        }));
                    }
                }
            } else {
                index
            };

            let command = &mut self.commands[target];
            if command.requires_result_propagation()? {
                command.propagate_results(row)?;
            }
            rows_affected += 1;
            index += 1;

            if !(index < self.mappings.len() && self.mappings[index - 1].is_not_last_in_result_set())
            {
                break;
            }
        }
        Ok(index - 1)
    }

    /// One past the last command sharing the result set that starts at `start`.
    fn window_end(&self, start: usize) -> usize {
        let mut end = start + 1;
        while end < self.mappings.len() && self.mappings[end - 1].is_not_last_in_result_set() {
            end += 1;
        }
        end
    }

    fn concurrency_error(&self, end: usize, expected: usize, actual: i64) -> Error {
        let end = end.min(self.commands.len());
        let start = end.saturating_sub(expected);
        let entries: Vec<EntryDescriptor> = self.commands[start..end]
            .iter()
            .flat_map(ModificationCommand::entry_descriptors)
            .collect();
        tracing::debug!(
            expected,
            actual,
            entries = entries.len(),
            "Concurrency failure while consuming batch results"
        );
        Error::Update(UpdateError::new(
            UpdateErrorKind::Concurrency,
            format!(
                "The database operation was expected to affect {} row(s), but actually affected {} row(s); \
                 data may have been modified or deleted since entities were loaded.",
                expected, actual
            ),
            entries,
        ))
    }

    fn wrap_error(&self, error: Error) -> Error {
        match error {
            Error::Update(_) | Error::Cancelled => error,
            other => Error::Update(
                UpdateError::new(
                    UpdateErrorKind::Store,
                    "An error occurred while saving the entity changes. See the inner error for details.",
                    self.entry_descriptors(),
                )
                .with_source(other),
            ),
        }
    }
}

fn insert_layout(command: &mut ModificationCommand) -> Result<Option<InsertLayout>> {
    if !command.is_tracked() || command.entity_state() != EntityState::Added {
        return Ok(None);
    }
    let view = command.view()?;
    Ok(Some((
        view.table.to_string(),
        view.schema.map(str::to_string),
        view.write_columns().map(|c| c.column_name().to_string()).collect(),
        view.read_columns().map(|c| c.column_name().to_string()).collect(),
    )))
}

//! Turning tracked entries into ordered, size-bounded batches.
//!
//! - Entries mapped to the same row (same table and key) become one command
//! - DELETE child-first (to respect FK constraints)
//! - INSERT parent-first (to respect FK constraints)
//! - UPDATE last, in entry order

use crate::UpdateOptions;
use crate::batch::ModificationCommandBatch;
use crate::column::ColumnModification;
use crate::command::{EntryComparer, ModificationCommand};
use crate::entry::{EntityState, UpdateEntry};
use crate::sql::{UpdateSqlGenerator, update_generator_for_dialect};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_core::{Dialect, Error, Result, Value};

/// Commands built from a list of entries, plus the entries that need no
/// command.
#[derive(Debug, Default)]
pub struct PreparedCommands {
    pub commands: Vec<ModificationCommand>,
    pub unchanged: Vec<UpdateEntry>,
}

/// Batches ready to execute, plus the entries that need no command.
#[derive(Debug, Default)]
pub struct SavePlan {
    pub batches: Vec<ModificationCommandBatch>,
    pub unchanged: Vec<UpdateEntry>,
}

impl SavePlan {
    pub fn command_count(&self) -> usize {
        self.batches.iter().map(ModificationCommandBatch::len).sum()
    }
}

/// Groups entries into commands, orders them and splits them into batches.
#[derive(Debug)]
pub struct BatchPreparer {
    generator: Arc<dyn UpdateSqlGenerator>,
    options: UpdateOptions,
    /// Table -> tables it depends on (has FK to).
    dependencies: HashMap<String, Vec<String>>,
    comparer: Option<EntryComparer>,
}

impl BatchPreparer {
    pub fn new(generator: Arc<dyn UpdateSqlGenerator>, options: UpdateOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            generator,
            options,
            dependencies: HashMap::new(),
            comparer: None,
        })
    }

    /// A preparer using the dialect's default update SQL generator.
    pub fn for_dialect(dialect: Dialect, options: UpdateOptions) -> Result<Self> {
        Self::new(update_generator_for_dialect(dialect), options)
    }

    /// Order the entries of each command with `comparer`.
    #[must_use]
    pub fn with_comparer(mut self, comparer: EntryComparer) -> Self {
        self.comparer = Some(comparer);
        self
    }

    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    pub fn generator(&self) -> &Arc<dyn UpdateSqlGenerator> {
        &self.generator
    }

    /// Register the tables `table` references through foreign keys.
    pub fn register_table(&mut self, table: impl Into<String>, depends_on: Vec<String>) {
        self.dependencies.insert(table.into(), depends_on);
    }

    /// Length of the longest foreign-key chain starting at `table`.
    fn dependency_depth(&self, table: &str) -> usize {
        fn depth<'a>(
            dependencies: &'a HashMap<String, Vec<String>>,
            table: &'a str,
            visiting: &mut HashSet<&'a str>,
        ) -> usize {
            if !visiting.insert(table) {
                return 0;
            }
            let result = dependencies
                .get(table)
                .map(|deps| {
                    deps.iter()
                        .filter(|dep| dep.as_str() != table)
                        .map(|dep| 1 + depth(dependencies, dep, visiting))
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            visiting.remove(table);
            result
        }
        depth(&self.dependencies, table, &mut HashSet::new())
    }

    /// Group entries mapped to the same row into commands.
    ///
    /// Each entry's ordinal becomes its position in `entries`. Unchanged
    /// entries need no command and are returned separately, as are modified
    /// rows with nothing to write, which come back accepted. Entries whose
    /// key is entirely NULL (not yet generated) always get a row of their
    /// own.
    pub fn create_commands(&self, entries: Vec<UpdateEntry>) -> Result<PreparedCommands> {
        struct Group {
            table: String,
            schema: Option<String>,
            key: Vec<Value>,
            entries: Vec<UpdateEntry>,
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut unchanged = Vec::new();

        for (ordinal, mut entry) in entries.into_iter().enumerate() {
            entry.set_ordinal(ordinal);
            if matches!(entry.state(), EntityState::Unchanged | EntityState::Detached) {
                unchanged.push(entry);
                continue;
            }

            let table = entry.mapping().table.clone();
            let schema = entry.mapping().schema.clone();
            let key = entry.key_values();
            let shares_row = !key.is_empty() && key.iter().any(|v| !v.is_null());

            let existing = if shares_row {
                groups
                    .iter_mut()
                    .find(|g| g.table == table && g.schema == schema && g.key == key)
            } else {
                None
            };
            match existing {
                Some(group) => group.entries.push(entry),
                None => groups.push(Group {
                    table,
                    schema,
                    key,
                    entries: vec![entry],
                }),
            }
        }

        let mut commands = Vec::with_capacity(groups.len());
        for group in groups {
            let mut command =
                ModificationCommand::new(group.table, group.schema, self.options.sensitive_logging);
            if let Some(comparer) = self.comparer {
                command = command.with_comparer(comparer);
            }

            let mut entries = group.entries;
            let main = entries
                .iter()
                .position(|e| !e.mapping().is_dependent)
                .unwrap_or(0);
            let main_entry = entries.remove(main);
            command.add_entry(main_entry, true)?;
            for entry in entries {
                command.add_entry(entry, false)?;
            }

            if command.entity_state() == EntityState::Modified
                && !command.column_modifications()?.iter().any(ColumnModification::is_write)
            {
                tracing::debug!(table = %command.table(), "Skipping update with no modified columns");
                unchanged.extend(command.into_entries().into_iter().map(|mut entry| {
                    entry.accept_changes();
                    entry
                }));
                continue;
            }
            commands.push(command);
        }

        tracing::debug!(
            commands = commands.len(),
            unchanged = unchanged.len(),
            "Created modification commands"
        );
        Ok(PreparedCommands {
            commands,
            unchanged,
        })
    }

    /// Order commands for execution.
    ///
    /// - Deletes: child-first (deeper dependency chain = delete first)
    /// - Inserts: parent-first (shallower dependency chain = insert first)
    /// - Updates: entry order
    ///
    /// Commands for the same table keep their relative order.
    pub fn order(&self, commands: Vec<ModificationCommand>) -> Vec<ModificationCommand> {
        let mut deletes = Vec::new();
        let mut inserts = Vec::new();
        let mut updates = Vec::new();

        for command in commands {
            match command.entity_state() {
                EntityState::Deleted => deletes.push(command),
                EntityState::Added => inserts.push(command),
                _ => updates.push(command),
            }
        }

        deletes.sort_by(|a, b| {
            let a_depth = self.dependency_depth(a.table());
            let b_depth = self.dependency_depth(b.table());
            b_depth.cmp(&a_depth).then_with(|| a.table().cmp(b.table()))
        });

        inserts.sort_by(|a, b| {
            let a_depth = self.dependency_depth(a.table());
            let b_depth = self.dependency_depth(b.table());
            a_depth.cmp(&b_depth).then_with(|| a.table().cmp(b.table()))
        });

        deletes.extend(inserts);
        deletes.extend(updates);
        deletes
    }

    /// Split ordered commands into completed batches of at most
    /// `max_batch_size` commands.
    pub fn batch_commands(
        &self,
        commands: Vec<ModificationCommand>,
    ) -> Result<Vec<ModificationCommandBatch>> {
        let mut batches = Vec::new();
        let mut current = self.new_batch();

        for command in commands {
            if let Err(command) = current.try_add_command(command) {
                batches.push(std::mem::replace(&mut current, self.new_batch()));
                if current.try_add_command(command).is_err() {
                    return Err(Error::config("a modification batch rejected its first command"));
                }
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }

        let count = batches.len();
        for (i, batch) in batches.iter_mut().enumerate() {
            batch.complete(i + 1 < count)?;
        }
        Ok(batches)
    }

    /// Create, order and batch the commands for `entries`.
    pub fn prepare(&self, entries: Vec<UpdateEntry>) -> Result<SavePlan> {
        let PreparedCommands {
            commands,
            unchanged,
        } = self.create_commands(entries)?;
        let batches = self.batch_commands(self.order(commands))?;
        Ok(SavePlan { batches, unchanged })
    }

    fn new_batch(&self) -> ModificationCommandBatch {
        ModificationCommandBatch::new(Arc::clone(&self.generator), self.options.max_batch_size)
    }
}

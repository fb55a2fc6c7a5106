//! Modification commands: one INSERT, UPDATE or DELETE of one table row.
//!
//! A [`ModificationCommand`] aggregates every tracked entry that maps onto
//! the same row (table splitting puts several entity types in one row) and
//! derives, once, the list of [`ColumnModification`]s describing which
//! columns the statement writes, reads back, and checks in its WHERE clause.

use crate::column::{ColumnFlags, ColumnModification};
use crate::entry::{EntityState, SaveBehavior, UpdateEntry, ValueGenerated};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strata_core::{
    EntryDescriptor, Error, Result, Row, TypeError, UpdateError, UpdateErrorKind, Value,
};

/// Orders the entries of a command before shared columns are resolved.
pub type EntryComparer = fn(&UpdateEntry, &UpdateEntry) -> Ordering;

/// Tracks one shared column across the entries of a command while its
/// modifications are derived.
#[derive(Debug, Default)]
struct ColumnValuePropagator {
    write: bool,
    original: Option<Value>,
    current: Option<Value>,
    modification: Option<usize>,
}

impl ColumnValuePropagator {
    fn record_value(&mut self, entry: &UpdateEntry, property: usize) {
        match entry.state() {
            EntityState::Modified => {
                if !self.write && entry.is_modified(property) {
                    self.write = true;
                    self.current = Some(entry.current_value(property).clone());
                }
            }
            EntityState::Added => {
                let current = entry.current_value(property).clone();
                self.write = self.original.as_ref().unwrap_or(&Value::Null) != &current;
                self.current = Some(current);
            }
            EntityState::Deleted => {
                self.original = Some(entry.original_value(property).clone());
                if !self.write && !entry.mapping().properties[property].is_key {
                    self.write = true;
                    self.current = None;
                }
            }
            EntityState::Unchanged | EntityState::Detached => {}
        }
    }

    /// Does `entry` itself have to write the column? When another entry
    /// carries the write, the value is copied into `entry` instead.
    fn try_propagate(&self, entry: &mut UpdateEntry, property: usize) -> bool {
        let takes_value = match entry.state() {
            EntityState::Unchanged => true,
            EntityState::Modified => !entry.is_modified(property),
            EntityState::Added => match &self.original {
                Some(original) => entry.current_value(property) == original,
                None => entry.current_value(property).is_null(),
            },
            EntityState::Deleted | EntityState::Detached => false,
        };
        if self.write && takes_value {
            let mapping = &entry.mapping().properties[property];
            if (mapping.after_save == SaveBehavior::Save || entry.state() == EntityState::Added)
                && mapping.value_generated != ValueGenerated::Never
            {
                let current = self.current.clone().unwrap_or(Value::Null);
                entry.set_store_generated_value(property, current);
            }
            return false;
        }
        self.write
    }
}

/// A borrowed, fully derived view of a command, handed to SQL generators.
#[derive(Debug, Clone, Copy)]
pub struct CommandView<'a> {
    pub table: &'a str,
    pub schema: Option<&'a str>,
    pub state: EntityState,
    pub columns: &'a [ColumnModification],
    pub entries: &'a [UpdateEntry],
}

impl<'a> CommandView<'a> {
    pub fn write_columns(&self) -> impl Iterator<Item = &'a ColumnModification> + 'a {
        self.columns.iter().filter(|c| c.is_write())
    }

    pub fn read_columns(&self) -> impl Iterator<Item = &'a ColumnModification> + 'a {
        self.columns.iter().filter(|c| c.is_read())
    }

    pub fn condition_columns(&self) -> impl Iterator<Item = &'a ColumnModification> + 'a {
        self.columns.iter().filter(|c| c.is_condition())
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &'a ColumnModification> + 'a {
        self.columns.iter().filter(|c| c.is_key())
    }

    pub fn value(&self, column: &'a ColumnModification) -> &'a Value {
        column.value(self.entries)
    }

    pub fn original_value(&self, column: &'a ColumnModification) -> &'a Value {
        column.original_value(self.entries)
    }
}

/// One INSERT, UPDATE or DELETE against one row.
#[derive(Debug)]
pub struct ModificationCommand {
    table: String,
    schema: Option<String>,
    entries: Vec<UpdateEntry>,
    main_added: bool,
    columns: Option<Vec<ColumnModification>>,
    sensitive_logging: bool,
    use_parameters: bool,
    comparer: Option<EntryComparer>,
    non_tracked_state: Option<EntityState>,
}

impl ModificationCommand {
    /// A command for tracked entries mapped to `table`.
    pub fn new(table: impl Into<String>, schema: Option<String>, sensitive_logging: bool) -> Self {
        Self {
            table: table.into(),
            schema,
            entries: Vec::new(),
            main_added: false,
            columns: None,
            sensitive_logging,
            use_parameters: true,
            comparer: None,
            non_tracked_state: None,
        }
    }

    /// A command with no entries whose column modifications are supplied
    /// directly (seed data). Values are rendered as literals.
    pub fn non_tracked(
        table: impl Into<String>,
        schema: Option<String>,
        state: EntityState,
        sensitive_logging: bool,
    ) -> Self {
        Self {
            table: table.into(),
            schema,
            entries: Vec::new(),
            main_added: false,
            columns: Some(Vec::new()),
            sensitive_logging,
            use_parameters: false,
            comparer: None,
            non_tracked_state: Some(state),
        }
    }

    /// Order entries with `comparer` when resolving shared columns.
    #[must_use]
    pub fn with_comparer(mut self, comparer: EntryComparer) -> Self {
        self.comparer = Some(comparer);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn entries(&self) -> &[UpdateEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<UpdateEntry> {
        self.entries
    }

    pub fn is_tracked(&self) -> bool {
        self.non_tracked_state.is_none()
    }

    /// Descriptors of every entry, for error reporting.
    pub fn entry_descriptors(&self) -> Vec<EntryDescriptor> {
        self.entries.iter().map(UpdateEntry::descriptor).collect()
    }

    /// Add an entry mapped to this command's row. The main entry decides the
    /// command's state.
    pub fn add_entry(&mut self, entry: UpdateEntry, main: bool) -> Result<()> {
        if !matches!(
            entry.state(),
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        ) {
            return Err(invalid_state(
                format!(
                    "Cannot save changes for an entity of type '{}' in state '{}'.",
                    entry.mapping().name,
                    entry.state()
                ),
                vec![entry.descriptor()],
            ));
        }

        if main {
            if self.main_added {
                return Err(invalid_state(
                    format!(
                        "The command for table '{}' already has a main entry.",
                        self.table
                    ),
                    vec![entry.descriptor()],
                ));
            }
            for existing in &self.entries {
                self.validate_state(&entry, existing)?;
            }
            self.entries.insert(0, entry);
            self.main_added = true;
        } else {
            if self.main_added {
                self.validate_state(&self.entries[0], &entry)?;
            }
            self.entries.push(entry);
        }

        self.columns = None;
        Ok(())
    }

    /// Append a modification to a non-tracked command.
    pub fn add_column_modification(&mut self, modification: ColumnModification) {
        self.columns.get_or_insert_with(Vec::new).push(modification);
    }

    /// The row operation this command performs.
    pub fn entity_state(&self) -> EntityState {
        if let Some(state) = self.non_tracked_state {
            return state;
        }
        let Some(main) = self.entries.first() else {
            return EntityState::Detached;
        };
        if !self.main_added {
            return if self
                .entries
                .iter()
                .any(|e| e.state() == EntityState::Modified)
            {
                EntityState::Modified
            } else {
                main.state()
            };
        }
        match main.shared_identity() {
            Some(shared)
                if main.state() == EntityState::Added
                    && shared
                        .mapping()
                        .maps_to(&self.table, self.schema.as_deref()) =>
            {
                EntityState::Modified
            }
            _ => main.state(),
        }
    }

    /// The derived column modifications, computed on first access.
    pub fn column_modifications(&mut self) -> Result<&[ColumnModification]> {
        self.ensure_columns()?;
        Ok(self.columns.as_deref().unwrap_or_default())
    }

    /// A borrowed view for SQL generation.
    pub fn view(&mut self) -> Result<CommandView<'_>> {
        self.ensure_columns()?;
        let state = self.entity_state();
        Ok(CommandView {
            table: &self.table,
            schema: self.schema.as_deref(),
            state,
            columns: self.columns.as_deref().unwrap_or_default(),
            entries: &self.entries,
        })
    }

    /// Does executing this command read values back from the database?
    pub fn requires_result_propagation(&mut self) -> Result<bool> {
        Ok(self.column_modifications()?.iter().any(|c| c.is_read()))
    }

    /// Copy a returned row into the read columns, positionally.
    pub fn propagate_results(&mut self, row: &Row) -> Result<()> {
        self.ensure_columns()?;
        let Some(columns) = self.columns.as_mut() else {
            return Ok(());
        };
        let mut index = 0;
        for column in columns.iter_mut().filter(|c| c.is_read()) {
            let value = row.get(index).cloned().ok_or_else(|| {
                Error::Type(TypeError {
                    expected: "read-back value",
                    actual: format!(
                        "row with {} column(s), needed at least {}",
                        row.len(),
                        index + 1
                    ),
                    column: Some(column.column_name().to_string()),
                })
            })?;
            column.set_value(&mut self.entries, value);
            index += 1;
        }
        Ok(())
    }

    fn ensure_columns(&mut self) -> Result<()> {
        if self.columns.is_none() {
            let columns = self.generate_column_modifications()?;
            self.columns = Some(columns);
        }
        Ok(())
    }

    fn validate_state(&self, main: &UpdateEntry, entry: &UpdateEntry) -> Result<()> {
        let main_state = effective_state(main);
        if main_state == EntityState::Modified {
            return Ok(());
        }
        let entry_state = effective_state(entry);
        if main_state == entry_state {
            return Ok(());
        }

        let message = if self.sensitive_logging {
            format!(
                "The instance of entity type '{}' with the key value '{}' is marked as '{}', but the instance of \
                 entity type '{}' with the key value '{}' is marked as '{}' and both are mapped to the same row.",
                entry.mapping().name,
                entry.build_current_values_string(&entry.mapping().key_indices()),
                entry_state,
                main.mapping().name,
                main.build_current_values_string(&main.mapping().key_indices()),
                main_state
            )
        } else {
            format!(
                "The instance of entity type '{}' is marked as '{}', but the instance of entity type '{}' is marked \
                 as '{}' and both are mapped to the same row. Enable sensitive logging to see the key values.",
                entry.mapping().name,
                entry_state,
                main.mapping().name,
                main_state
            )
        };
        Err(invalid_state(
            message,
            vec![entry.descriptor(), main.descriptor()],
        ))
    }

    /// Columns mapped by more than one entity type among this command's
    /// entries (and the entries they replace).
    fn shared_column_names(&self) -> HashSet<String> {
        let mut owners: HashMap<&str, HashSet<&str>> = HashMap::new();
        let related = self
            .entries
            .iter()
            .flat_map(|e| std::iter::once(e).chain(e.shared_identity()));
        for entry in related {
            let mapping = entry.mapping();
            if !mapping.maps_to(&self.table, self.schema.as_deref()) {
                continue;
            }
            for property in &mapping.properties {
                owners
                    .entry(property.column.as_str())
                    .or_default()
                    .insert(mapping.name.as_str());
            }
        }
        owners
            .into_iter()
            .filter(|(_, types)| types.len() > 1)
            .map(|(column, _)| column.to_string())
            .collect()
    }

    fn generate_column_modifications(&mut self) -> Result<Vec<ColumnModification>> {
        let state = self.entity_state();
        let adding = state == EntityState::Added;
        let updating = state == EntityState::Modified;
        let shared_columns = self.shared_column_names();

        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        if let Some(comparer) = self.comparer {
            order.sort_by(|&a, &b| comparer(&self.entries[a], &self.entries[b]));
        }

        let mut propagators: Option<HashMap<String, ColumnValuePropagator>> = None;
        if self.entries.len() > 1
            || self
                .entries
                .first()
                .is_some_and(|e| e.shared_identity().is_some())
        {
            let mut map = HashMap::new();
            for &i in &order {
                let entry = &self.entries[i];
                if let Some(shared) = entry.shared_identity() {
                    if shared.mapping().maps_to(&self.table, self.schema.as_deref()) {
                        initialize_shared_columns(shared, updating, &mut map);
                    }
                }
                if entry.mapping().maps_to(&self.table, self.schema.as_deref()) {
                    initialize_shared_columns(entry, updating, &mut map);
                }
            }
            propagators = Some(map);
        }

        let mut columns: Vec<ColumnModification> = Vec::new();
        for &i in &order {
            let entry_state = self.entries[i].state();
            let mapping = Arc::clone(self.entries[i].mapping());
            if !mapping.maps_to(&self.table, self.schema.as_deref()) {
                continue;
            }
            let non_main_entry =
                updating && matches!(entry_state, EntityState::Deleted | EntityState::Added);

            for (p, property) in mapping.properties.iter().enumerate() {
                let is_key = property.is_key;
                let is_condition = !adding && (is_key || property.is_concurrency_token);
                let read_value =
                    state != EntityState::Deleted && self.entries[i].is_store_generated(p);

                let mut write_value = false;
                if !read_value {
                    if adding {
                        write_value = property.before_save == SaveBehavior::Save;
                    } else if (updating && property.after_save == SaveBehavior::Save)
                        || (!is_key && non_main_entry)
                    {
                        let propagator = propagators
                            .as_ref()
                            .and_then(|map| map.get(&property.column));
                        write_value = match propagator {
                            Some(propagator) => {
                                propagator.try_propagate(&mut self.entries[i], p)
                            }
                            None => self.entries[i].is_modified(p),
                        };
                    }
                }

                if !(read_value || write_value || is_condition) {
                    continue;
                }

                let flags = ColumnFlags {
                    is_read: read_value,
                    is_write: write_value,
                    is_key,
                    is_condition,
                };
                let modification =
                    ColumnModification::for_entry(&self.entries, i, p, flags, self.use_parameters);

                if shared_columns.contains(&property.column) {
                    if let Some(propagator) = propagators
                        .as_mut()
                        .and_then(|map| map.get_mut(&property.column))
                    {
                        if let Some(target) = propagator.modification {
                            columns[target].add_shared_column_modification(
                                modification,
                                &mut self.entries,
                                self.sensitive_logging,
                            )?;
                            continue;
                        }
                        propagator.modification = Some(columns.len());
                    }
                }
                columns.push(modification);
            }

            self.warn_if_optional_dependent_all_null(i);
        }

        tracing::trace!(
            table = %self.table,
            state = %state,
            columns = columns.len(),
            "Derived column modifications"
        );
        Ok(columns)
    }

    fn warn_if_optional_dependent_all_null(&self, index: usize) {
        let entry = &self.entries[index];
        let mapping = entry.mapping();
        if !(mapping.is_dependent && mapping.is_optional) {
            return;
        }
        let deleted = entry.state() == EntityState::Deleted;
        let all_null = mapping
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_key)
            .all(|(i, _)| {
                if deleted {
                    entry.original_value(i).is_null()
                } else {
                    entry.current_value(i).is_null()
                }
            });
        if !all_null {
            return;
        }
        if self.sensitive_logging {
            tracing::warn!(
                table = %self.table,
                entity_type = %mapping.name,
                key = %entry.build_current_values_string(&mapping.key_indices()),
                "Optional dependent sharing a row has no non-null property; it cannot be told apart from a missing row"
            );
        } else {
            tracing::warn!(
                table = %self.table,
                entity_type = %mapping.name,
                "Optional dependent sharing a row has no non-null property; it cannot be told apart from a missing row"
            );
        }
    }
}

fn effective_state(entry: &UpdateEntry) -> EntityState {
    if entry.shared_identity().is_some() {
        EntityState::Modified
    } else {
        entry.state()
    }
}

fn initialize_shared_columns(
    entry: &UpdateEntry,
    updating: bool,
    map: &mut HashMap<String, ColumnValuePropagator>,
) {
    for (p, property) in entry.mapping().properties.iter().enumerate() {
        let propagator = map.entry(property.column.clone()).or_default();
        if updating {
            propagator.record_value(entry, p);
        }
    }
}

fn invalid_state(message: String, entries: Vec<EntryDescriptor>) -> Error {
    Error::Update(UpdateError::new(
        UpdateErrorKind::InvalidState,
        message,
        entries,
    ))
}

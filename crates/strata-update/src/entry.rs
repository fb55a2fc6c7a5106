//! Tracked entries and the mapping metadata the update pipeline reads.
//!
//! An [`UpdateEntry`] is one tracked entity instance: its [`EntityState`],
//! the current and original value of each mapped property, which
//! properties were modified, and any value the database generated for it
//! during the save. [`EntityMapping`] and [`PropertyMapping`] describe how
//! the entity maps onto a table.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::{EntryDescriptor, Error, Result, UpdateError, UpdateErrorKind, Value, ValueKind};

/// Lifecycle state of a tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Tracked and unchanged since it was loaded.
    Unchanged,
    /// New; will be inserted.
    Added,
    /// Loaded and changed; will be updated.
    Modified,
    /// Loaded and removed; will be deleted.
    Deleted,
    /// No longer tracked (a deleted entry after a successful save).
    Detached,
}

impl EntityState {
    /// State name used in diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
            EntityState::Detached => "Detached",
        }
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the database generates a value for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValueGenerated {
    #[default]
    Never,
    OnAdd,
    OnUpdate,
    OnAddOrUpdate,
}

impl ValueGenerated {
    /// Generated when the row is inserted.
    pub const fn for_add(self) -> bool {
        matches!(self, ValueGenerated::OnAdd | ValueGenerated::OnAddOrUpdate)
    }

    /// Generated when the row is updated.
    pub const fn for_update(self) -> bool {
        matches!(self, ValueGenerated::OnUpdate | ValueGenerated::OnAddOrUpdate)
    }
}

/// Whether a property value is sent to the database before or after the
/// row first exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SaveBehavior {
    /// Send the value.
    #[default]
    Save,
    /// Never send the value; the database owns it.
    Ignore,
    /// Changing the value is an error (keys after insert).
    Throw,
}

/// Maps one property onto a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub name: String,
    pub column: String,
    pub column_type: String,
    pub kind: ValueKind,
    pub is_key: bool,
    pub is_concurrency_token: bool,
    pub is_nullable: bool,
    pub value_generated: ValueGenerated,
    pub before_save: SaveBehavior,
    pub after_save: SaveBehavior,
}

impl PropertyMapping {
    /// A non-key, non-generated property stored in a column of the same name.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            column_type: column_type.into(),
            kind,
            is_key: false,
            is_concurrency_token: false,
            is_nullable: true,
            value_generated: ValueGenerated::Never,
            before_save: SaveBehavior::Save,
            after_save: SaveBehavior::Save,
        }
    }

    /// Store the property in a differently named column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Part of the primary key. Key values cannot change once saved.
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.is_nullable = false;
        self.after_save = SaveBehavior::Throw;
        self
    }

    /// Generated by the database on insert (identity, serial, autoincrement).
    pub fn identity(mut self) -> Self {
        self.value_generated = ValueGenerated::OnAdd;
        self
    }

    /// Computed by the database on every write; never sent.
    pub fn computed(mut self) -> Self {
        self.value_generated = ValueGenerated::OnAddOrUpdate;
        self.before_save = SaveBehavior::Ignore;
        self.after_save = SaveBehavior::Ignore;
        self
    }

    /// Checked in the WHERE clause of updates and deletes.
    pub fn concurrency_token(mut self) -> Self {
        self.is_concurrency_token = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn generated(mut self, value_generated: ValueGenerated) -> Self {
        self.value_generated = value_generated;
        self
    }

    pub fn before_save(mut self, behavior: SaveBehavior) -> Self {
        self.before_save = behavior;
        self
    }

    pub fn after_save(mut self, behavior: SaveBehavior) -> Self {
        self.after_save = behavior;
        self
    }
}

/// Maps one entity type onto a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Display name of the entity type.
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    pub properties: Vec<PropertyMapping>,
    /// Shares its row with a principal through a key-to-key foreign key
    /// (table splitting).
    pub is_dependent: bool,
    /// A dependent whose row may legitimately be absent.
    pub is_optional: bool,
}

impl EntityMapping {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            schema: None,
            properties: Vec::new(),
            is_dependent: false,
            is_optional: false,
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    /// Mark as a dependent sharing the principal's row.
    pub fn dependent(mut self, optional: bool) -> Self {
        self.is_dependent = true;
        self.is_optional = optional;
        self
    }

    /// Wrap for sharing between entries.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Indices of the key properties, in declaration order.
    pub fn key_indices(&self) -> Vec<usize> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_key)
            .map(|(i, _)| i)
            .collect()
    }

    /// Does this mapping target the given table?
    pub fn maps_to(&self, table: &str, schema: Option<&str>) -> bool {
        self.table == table && self.schema.as_deref() == schema
    }
}

/// One tracked entity instance handed to the update pipeline.
#[derive(Debug, Clone)]
pub struct UpdateEntry {
    mapping: Arc<EntityMapping>,
    state: EntityState,
    ordinal: usize,
    current: Vec<Value>,
    original: Vec<Option<Value>>,
    modified: Vec<bool>,
    temporary: Vec<bool>,
    store_generated: Vec<Option<Value>>,
    shared_identity: Option<Box<UpdateEntry>>,
}

impl UpdateEntry {
    /// Create an entry with every property NULL.
    pub fn new(mapping: Arc<EntityMapping>, state: EntityState) -> Self {
        let len = mapping.properties.len();
        Self {
            mapping,
            state,
            ordinal: 0,
            current: vec![Value::Null; len],
            original: vec![None; len],
            modified: vec![false; len],
            temporary: vec![false; len],
            store_generated: vec![None; len],
            shared_identity: None,
        }
    }

    /// Set property values as loaded (or, for added entries, as assigned).
    ///
    /// For entries that already exist in the database the value also becomes
    /// the original value.
    pub fn with_values<V: Into<Value>>(
        mut self,
        values: impl IntoIterator<Item = (&'static str, V)>,
    ) -> Result<Self> {
        for (name, value) in values {
            let index = self.index_of(name)?;
            let value = value.into();
            if self.state != EntityState::Added {
                self.original[index] = Some(value.clone());
            }
            self.current[index] = value;
        }
        Ok(self)
    }

    /// Attach the entry this one replaces in the same row (a deleted entity
    /// re-added with the same key).
    pub fn with_shared_identity(mut self, entry: UpdateEntry) -> Self {
        self.shared_identity = Some(Box::new(entry));
        self
    }

    /// Assign a new current value and mark the property modified.
    pub fn set(&mut self, property: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.index_of(property)?;
        self.current[index] = value.into();
        self.modified[index] = true;
        Ok(())
    }

    /// Overwrite the original value of a property.
    pub fn set_original(&mut self, property: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.index_of(property)?;
        self.original[index] = Some(value.into());
        Ok(())
    }

    /// Mark a property value as a client-side placeholder the database will replace.
    pub fn mark_temporary(&mut self, property: &str) -> Result<()> {
        let index = self.index_of(property)?;
        self.temporary[index] = true;
        Ok(())
    }

    pub fn mapping(&self) -> &Arc<EntityMapping> {
        &self.mapping
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Position of the entry in the list handed to the pipeline.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub(crate) fn set_ordinal(&mut self, ordinal: usize) {
        self.ordinal = ordinal;
    }

    pub fn shared_identity(&self) -> Option<&UpdateEntry> {
        self.shared_identity.as_deref()
    }

    /// Current value, including any value generated during the save.
    pub fn current_value(&self, index: usize) -> &Value {
        self.store_generated[index]
            .as_ref()
            .unwrap_or(&self.current[index])
    }

    /// Original value; falls back to the current value when none was recorded.
    pub fn original_value(&self, index: usize) -> &Value {
        self.original[index]
            .as_ref()
            .unwrap_or(&self.current[index])
    }

    /// Was an original value recorded independently of the current value?
    pub fn has_original(&self, index: usize) -> bool {
        self.original[index].is_some()
    }

    pub(crate) fn set_original_at(&mut self, index: usize, value: Value) {
        self.original[index] = Some(value);
    }

    /// Current value of a property by name.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.mapping
            .property_index(property)
            .map(|i| self.current_value(i))
    }

    pub fn is_modified(&self, index: usize) -> bool {
        self.modified[index]
    }

    pub fn has_temporary_value(&self, index: usize) -> bool {
        self.temporary[index]
    }

    /// Record a value produced by the database for this save.
    pub fn set_store_generated_value(&mut self, index: usize, value: Value) {
        self.store_generated[index] = Some(value);
    }

    /// Will the database produce this property's value for the pending operation?
    pub fn is_store_generated(&self, index: usize) -> bool {
        let property = &self.mapping.properties[index];
        let generated = property.value_generated;
        (generated.for_add()
            && self.state == EntityState::Added
            && (property.before_save == SaveBehavior::Ignore
                || self.temporary[index]
                || self.current[index].is_null()))
            || (generated.for_update()
                && matches!(self.state, EntityState::Modified | EntityState::Deleted)
                && (property.after_save == SaveBehavior::Ignore || !self.modified[index]))
    }

    /// Key values identifying the row (original values for deleted entries).
    pub fn key_values(&self) -> Vec<Value> {
        self.mapping
            .key_indices()
            .into_iter()
            .map(|i| match self.state {
                EntityState::Deleted => self.original_value(i).clone(),
                _ => self.current_value(i).clone(),
            })
            .collect()
    }

    /// `{Id: 1, Name: 'Ada'}` for the given properties.
    pub fn build_current_values_string(&self, indices: &[usize]) -> String {
        self.build_values_string(indices, |i| self.current_value(i))
    }

    /// `{Id: 1}` built from original values.
    pub fn build_original_values_string(&self, indices: &[usize]) -> String {
        self.build_values_string(indices, |i| self.original_value(i))
    }

    fn build_values_string<'a>(&'a self, indices: &[usize], get: impl Fn(usize) -> &'a Value) -> String {
        let parts: Vec<String> = indices
            .iter()
            .map(|&i| {
                format!(
                    "{}: {}",
                    self.mapping.properties[i].name,
                    get(i).display_string()
                )
            })
            .collect();
        format!("{{{}}}", parts.join(", "))
    }

    /// Describe this entry for an [`UpdateError`].
    pub fn descriptor(&self) -> EntryDescriptor {
        EntryDescriptor {
            ordinal: self.ordinal,
            entity_type: self.mapping.name.clone(),
            table: self.mapping.table.clone(),
            key: self.key_values(),
        }
    }

    /// Fold generated values into the current values and mark the entry
    /// saved: added and modified entries become unchanged, deleted entries
    /// detached.
    pub fn accept_changes(&mut self) {
        for (current, generated) in self.current.iter_mut().zip(self.store_generated.iter_mut()) {
            if let Some(value) = generated.take() {
                *current = value;
            }
        }
        for (original, current) in self.original.iter_mut().zip(&self.current) {
            *original = Some(current.clone());
        }
        self.modified.iter_mut().for_each(|m| *m = false);
        self.temporary.iter_mut().for_each(|t| *t = false);
        self.shared_identity = None;
        self.state = match self.state {
            EntityState::Deleted | EntityState::Detached => EntityState::Detached,
            _ => EntityState::Unchanged,
        };
    }

    fn index_of(&self, property: &str) -> Result<usize> {
        self.mapping.property_index(property).ok_or_else(|| {
            Error::Update(UpdateError::new(
                UpdateErrorKind::InvalidState,
                format!(
                    "The property '{}' is not mapped on entity type '{}'.",
                    property, self.mapping.name
                ),
                Vec::new(),
            ))
        })
    }
}

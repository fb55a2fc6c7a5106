//! Per-column intent for one row mutation.

use crate::entry::{EntityState, UpdateEntry};
use std::cell::OnceCell;
use strata_core::{Error, Result, UpdateError, UpdateErrorKind, Value, ValueKind};

static NULL: Value = Value::Null;

/// Generates `p0`, `p1`, ... parameter names for one batch.
#[derive(Debug, Default)]
pub struct ParameterNameGenerator {
    next: usize,
}

impl ParameterNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_next(&mut self) -> String {
        let name = format!("p{}", self.next);
        self.next += 1;
        name
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// How a [`ColumnModification`] takes part in its command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// Read the value back after the write.
    pub is_read: bool,
    /// Send the value.
    pub is_write: bool,
    /// Part of the row's key.
    pub is_key: bool,
    /// Used in the WHERE clause.
    pub is_condition: bool,
}

/// A column read, written or used as a condition by a modification command.
///
/// A modification is either bound to a property of one of its command's
/// entries (values are resolved from the entry on access) or carries its
/// values directly (seed data and other non-tracked commands).
#[derive(Debug)]
pub struct ColumnModification {
    binding: Option<(usize, usize)>,
    property: Option<String>,
    value: Value,
    original_value: Option<Value>,
    column_name: String,
    column_type: Option<String>,
    kind: Option<ValueKind>,
    is_nullable: Option<bool>,
    flags: ColumnFlags,
    use_parameters: bool,
    parameter_name: OnceCell<String>,
    original_parameter_name: OnceCell<String>,
    shared: Vec<ColumnModification>,
}

impl ColumnModification {
    /// A modification bound to property `property` of entry `entry` (both
    /// indices into the owning command).
    pub(crate) fn for_entry(
        entries: &[UpdateEntry],
        entry: usize,
        property: usize,
        flags: ColumnFlags,
        use_parameters: bool,
    ) -> Self {
        let mapping = &entries[entry].mapping().properties[property];
        Self {
            binding: Some((entry, property)),
            property: Some(mapping.name.clone()),
            value: Value::Null,
            original_value: None,
            column_name: mapping.column.clone(),
            column_type: Some(mapping.column_type.clone()),
            kind: Some(mapping.kind),
            is_nullable: Some(mapping.is_nullable),
            flags,
            use_parameters,
            parameter_name: OnceCell::new(),
            original_parameter_name: OnceCell::new(),
            shared: Vec::new(),
        }
    }

    /// A modification carrying its own values.
    pub fn detached(
        column_name: impl Into<String>,
        column_type: Option<String>,
        value: Value,
        original_value: Option<Value>,
        flags: ColumnFlags,
        use_parameters: bool,
    ) -> Self {
        Self {
            binding: None,
            property: None,
            kind: ValueKind::of(&value),
            value,
            original_value,
            column_name: column_name.into(),
            column_type,
            is_nullable: None,
            flags,
            use_parameters,
            parameter_name: OnceCell::new(),
            original_parameter_name: OnceCell::new(),
            shared: Vec::new(),
        }
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn column_type(&self) -> Option<&str> {
        self.column_type.as_deref()
    }

    pub fn kind(&self) -> Option<ValueKind> {
        self.kind
    }

    pub fn is_nullable(&self) -> Option<bool> {
        self.is_nullable
    }

    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// Index of the bound entry within its command.
    pub fn entry_index(&self) -> Option<usize> {
        self.binding.map(|(entry, _)| entry)
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn is_read(&self) -> bool {
        self.flags.is_read
    }

    pub fn is_write(&self) -> bool {
        self.flags.is_write
    }

    pub fn is_key(&self) -> bool {
        self.flags.is_key
    }

    pub fn is_condition(&self) -> bool {
        self.flags.is_condition
    }

    /// Are values bound as parameters (rather than inlined as literals)?
    pub fn use_parameters(&self) -> bool {
        self.use_parameters
    }

    pub fn use_current_value_parameter(&self) -> bool {
        self.use_parameters && self.flags.is_write
    }

    pub fn use_original_value_parameter(&self) -> bool {
        self.use_parameters && self.flags.is_condition
    }

    /// Modifications of other entries writing the same physical column.
    pub fn shared_modifications(&self) -> &[ColumnModification] {
        &self.shared
    }

    /// Current value: NULL for deleted entries.
    pub fn value<'a>(&'a self, entries: &'a [UpdateEntry]) -> &'a Value {
        match self.binding {
            Some((entry, property)) => {
                let entry = &entries[entry];
                if entry.state() == EntityState::Deleted {
                    &NULL
                } else {
                    entry.current_value(property)
                }
            }
            None => &self.value,
        }
    }

    /// Original value, taken from the replaced entry when the bound entry
    /// shares its identity with one.
    pub fn original_value<'a>(&'a self, entries: &'a [UpdateEntry]) -> &'a Value {
        match self.binding {
            Some((entry, property)) => {
                let entry = &entries[entry];
                if let Some(shared) = entry.shared_identity() {
                    let name = &entry.mapping().properties[property].name;
                    if let Some(index) = shared.mapping().property_index(name) {
                        return shared.original_value(index);
                    }
                }
                entry.original_value(property)
            }
            None => self.original_value.as_ref().unwrap_or(&NULL),
        }
    }

    /// Store a value read back from the database, fanning out to shared
    /// modifications.
    pub fn set_value(&mut self, entries: &mut [UpdateEntry], value: Value) {
        for shared in &mut self.shared {
            shared.set_value(entries, value.clone());
        }
        match self.binding {
            Some((entry, property)) => entries[entry].set_store_generated_value(property, value),
            None => self.value = value,
        }
    }

    /// Parameter name for the current value, generated on first use.
    pub fn parameter_name(&self, generator: &mut ParameterNameGenerator) -> &str {
        self.parameter_name.get_or_init(|| generator.generate_next())
    }

    /// Parameter name for the original value, generated on first use.
    pub fn original_parameter_name(&self, generator: &mut ParameterNameGenerator) -> &str {
        self.original_parameter_name
            .get_or_init(|| generator.generate_next())
    }

    /// Merge `other`, a modification of a different entry mapped to the same
    /// column of the same row.
    ///
    /// The two must agree on the value they write and on the original value
    /// they check. An added entry without an original value of its own takes
    /// the original value of a modified sibling.
    pub fn add_shared_column_modification(
        &mut self,
        other: ColumnModification,
        entries: &mut [UpdateEntry],
        sensitive_logging: bool,
    ) -> Result<()> {
        if self.use_current_value_parameter() && self.value(entries) != other.value(entries) {
            return Err(self.conflict(&other, entries, sensitive_logging, false));
        }

        if self.use_original_value_parameter()
            && self.original_value(entries) != other.original_value(entries)
        {
            let adopt = match (self.binding, other.binding) {
                (Some((mine, _)), Some((theirs, property))) => {
                    entries[mine].state() == EntityState::Modified
                        && entries[theirs].state() == EntityState::Added
                        && entries[theirs].shared_identity().is_none()
                        && !entries[theirs].has_original(property)
                }
                _ => false,
            };
            if !adopt {
                return Err(self.conflict(&other, entries, sensitive_logging, true));
            }
            if let Some((theirs, property)) = other.binding {
                let original = self.original_value(entries).clone();
                entries[theirs].set_original_at(property, original);
            }
        }

        self.shared.push(other);
        Ok(())
    }

    fn conflict(
        &self,
        other: &ColumnModification,
        entries: &[UpdateEntry],
        sensitive_logging: bool,
        original: bool,
    ) -> Error {
        let first = self.entry_index().map(|i| &entries[i]);
        let second = other.entry_index().map(|i| &entries[i]);
        let first_type = first.map_or("<unknown>", |e| e.mapping().name.as_str());
        let second_type = second.map_or("<unknown>", |e| e.mapping().name.as_str());
        let qualifier = if original { "original " } else { "" };

        let message = if sensitive_logging {
            let key = first.map_or_else(String::new, |e| {
                e.build_current_values_string(&e.mapping().key_indices())
            });
            let (first_value, second_value) = if original {
                (self.original_value(entries), other.original_value(entries))
            } else {
                (self.value(entries), other.value(entries))
            };
            format!(
                "The instances of entity types '{}' and '{}' are mapped to the same row with the key value '{}', \
                 but have different {}property values '{{{}: {}}}' and '{{{}: {}}}' for the column '{}'.",
                first_type,
                second_type,
                key,
                qualifier,
                self.property().unwrap_or(&self.column_name),
                first_value.display_string(),
                other.property().unwrap_or(&other.column_name),
                second_value.display_string(),
                self.column_name
            )
        } else {
            format!(
                "The instances of entity types '{}' and '{}' are mapped to the same row, but have different {}property \
                 values for the properties '{}.{}' and '{}.{}' mapped to the column '{}'. \
                 Enable sensitive logging to see the conflicting values.",
                first_type,
                second_type,
                qualifier,
                first_type,
                self.property().unwrap_or(&self.column_name),
                second_type,
                other.property().unwrap_or(&other.column_name),
                self.column_name
            )
        };

        let descriptors = first
            .into_iter()
            .chain(second)
            .map(UpdateEntry::descriptor)
            .collect();
        Error::Update(UpdateError::new(
            UpdateErrorKind::DataConflict,
            message,
            descriptors,
        ))
    }
}

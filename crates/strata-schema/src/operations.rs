//! Migration operations.
//!
//! Each [`MigrationOperation`] describes one schema change. Operations are
//! plain data: a migration builds its `up` and `down` lists once and the
//! [`MigrationsSqlGenerator`](crate::MigrationsSqlGenerator) renders them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_core::{ColumnFacets, Value, ValueKind};

/// Provider-specific extension data. Setting a key twice keeps the last value.
pub type Annotations = BTreeMap<String, serde_json::Value>;

/// Marks a column whose values the database generates on insert.
pub const IDENTITY_ANNOTATION: &str = "Strata:Identity";

/// Requests `CREATE INDEX CONCURRENTLY` on PostgreSQL.
pub const CONCURRENT_INDEX_ANNOTATION: &str = "Strata:CreatedConcurrently";

// ============================================================================
// Shared Shapes
// ============================================================================

/// The shape of one column.
///
/// A column with neither `kind` nor `column_type` has an unknown type: it is
/// never compared on type and cannot be rendered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// In-memory kind, used to resolve the store type when `column_type` is unset.
    pub kind: Option<ValueKind>,
    /// Explicit store type.
    pub column_type: Option<String>,
    pub is_unicode: Option<bool>,
    pub max_length: Option<u32>,
    pub is_fixed_length: Option<bool>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    #[serde(default)]
    pub is_row_version: bool,
    #[serde(default)]
    pub is_nullable: bool,
    pub default_value: Option<Value>,
    pub default_value_sql: Option<String>,
    pub computed_column_sql: Option<String>,
    pub is_stored: Option<bool>,
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl ColumnDefinition {
    /// A non-nullable column of `kind`.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn column_type(mut self, column_type: impl Into<String>) -> Self {
        self.column_type = Some(column_type.into());
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    #[must_use]
    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    #[must_use]
    pub fn fixed_length(mut self) -> Self {
        self.is_fixed_length = Some(true);
        self
    }

    #[must_use]
    pub fn precision(mut self, precision: u32, scale: Option<u32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn default_sql(mut self, sql: impl Into<String>) -> Self {
        self.default_value_sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn computed(mut self, sql: impl Into<String>, stored: bool) -> Self {
        self.computed_column_sql = Some(sql.into());
        self.is_stored = Some(stored);
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Values for this column are generated by the database on insert.
    #[must_use]
    pub fn identity(self) -> Self {
        self.annotation(IDENTITY_ANNOTATION, true)
    }

    #[must_use]
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn is_identity(&self) -> bool {
        annotation_flag(&self.annotations, IDENTITY_ANNOTATION)
    }

    /// Has neither a kind nor a store type been given?
    pub fn is_type_unknown(&self) -> bool {
        self.kind.is_none() && self.column_type.is_none()
    }

    /// Facets used to resolve the store type, if the kind is known.
    pub fn facets(&self, key_or_index: bool) -> Option<ColumnFacets> {
        let kind = self.kind?;
        Some(ColumnFacets {
            kind,
            is_unicode: self.is_unicode,
            max_length: self.max_length,
            is_fixed_length: self.is_fixed_length,
            precision: self.precision,
            scale: self.scale,
            is_row_version: self.is_row_version,
            key_or_index,
        })
    }

    /// Do both columns resolve to the same store type?
    pub fn same_facets(&self, other: &ColumnDefinition) -> bool {
        self.kind == other.kind
            && self.is_unicode == other.is_unicode
            && self.max_length == other.max_length
            && self.is_fixed_length == other.is_fixed_length
            && self.precision == other.precision
            && self.scale == other.scale
            && self.is_row_version == other.is_row_version
    }
}

/// What a foreign key does when its principal row changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// SQL keywords, or `None` for the implicit `NO ACTION`.
    pub const fn as_sql(self) -> Option<&'static str> {
        match self {
            ReferentialAction::NoAction => None,
            ReferentialAction::Restrict => Some("RESTRICT"),
            ReferentialAction::Cascade => Some("CASCADE"),
            ReferentialAction::SetNull => Some("SET NULL"),
            ReferentialAction::SetDefault => Some("SET DEFAULT"),
        }
    }
}

/// Options shared by sequence creation and alteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceOptions {
    pub increment_by: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub is_cyclic: bool,
    pub is_cached: bool,
    pub cache_size: Option<i64>,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            increment_by: 1,
            min_value: None,
            max_value: None,
            is_cyclic: false,
            is_cached: true,
            cache_size: None,
        }
    }
}

// ============================================================================
// Table Operations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateTableOperation {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Option<AddPrimaryKeyOperation>,
    #[serde(default)]
    pub unique_constraints: Vec<AddUniqueConstraintOperation>,
    #[serde(default)]
    pub check_constraints: Vec<AddCheckConstraintOperation>,
    #[serde(default)]
    pub foreign_keys: Vec<AddForeignKeyOperation>,
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl CreateTableOperation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Declare the primary key, named `name`.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.primary_key = Some(AddPrimaryKeyOperation {
            name: name.into(),
            table: self.name.clone(),
            schema: self.schema.clone(),
            columns: to_strings(columns),
            annotations: Annotations::new(),
        });
        self
    }

    #[must_use]
    pub fn unique(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.unique_constraints.push(AddUniqueConstraintOperation {
            name: name.into(),
            table: self.name.clone(),
            schema: self.schema.clone(),
            columns: to_strings(columns),
            annotations: Annotations::new(),
        });
        self
    }

    #[must_use]
    pub fn check(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.check_constraints.push(AddCheckConstraintOperation {
            name: name.into(),
            table: self.name.clone(),
            schema: self.schema.clone(),
            sql: sql.into(),
            annotations: Annotations::new(),
        });
        self
    }

    /// Add a foreign key; its `table` and `schema` are set to this table's.
    #[must_use]
    pub fn foreign_key(mut self, mut foreign_key: AddForeignKeyOperation) -> Self {
        foreign_key.table.clone_from(&self.name);
        foreign_key.schema.clone_from(&self.schema);
        self.foreign_keys.push(foreign_key);
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Is `column` part of the key, a unique constraint or a foreign key?
    pub fn is_key_column(&self, column: &str) -> bool {
        let has = |columns: &[String]| columns.iter().any(|c| c == column);
        self.primary_key.as_ref().is_some_and(|pk| has(&pk.columns))
            || self.unique_constraints.iter().any(|u| has(&u.columns))
            || self.foreign_keys.iter().any(|fk| has(&fk.columns))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropTableOperation {
    pub name: String,
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameTableOperation {
    pub name: String,
    pub schema: Option<String>,
    pub new_name: Option<String>,
    pub new_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

// ============================================================================
// Column Operations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddColumnOperation {
    pub table: String,
    pub schema: Option<String>,
    pub column: ColumnDefinition,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropColumnOperation {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

/// Change a column from `old_column` to `column`.
///
/// Both shapes describe the same column; an unknown type on either side means
/// the type is not being changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlterColumnOperation {
    pub table: String,
    pub schema: Option<String>,
    pub column: ColumnDefinition,
    pub old_column: ColumnDefinition,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl AlterColumnOperation {
    /// Is the store type being changed? False when either type is unknown.
    pub fn changes_type(&self) -> bool {
        if self.column.is_type_unknown() || self.old_column.is_type_unknown() {
            return false;
        }
        self.column.column_type != self.old_column.column_type
            || !self.column.same_facets(&self.old_column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameColumnOperation {
    pub name: String,
    pub new_name: String,
    pub table: String,
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

// ============================================================================
// Key, Constraint and Index Operations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddPrimaryKeyOperation {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

/// Names a constraint (primary key, unique, check or foreign key) to drop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropConstraintOperation {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddUniqueConstraintOperation {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddCheckConstraintOperation {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddForeignKeyOperation {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<String>,
    pub principal_table: String,
    pub principal_schema: Option<String>,
    pub principal_columns: Vec<String>,
    #[serde(default)]
    pub on_update: ReferentialAction,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl AddForeignKeyOperation {
    /// A foreign key from `columns` to `principal_columns` of `principal_table`.
    ///
    /// The dependent table is filled in by [`CreateTableOperation::foreign_key`]
    /// or set directly for a standalone operation.
    pub fn new(
        name: impl Into<String>,
        columns: &[&str],
        principal_table: impl Into<String>,
        principal_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: to_strings(columns),
            principal_table: principal_table.into(),
            principal_columns: to_strings(principal_columns),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    #[must_use]
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateIndexOperation {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub is_unique: bool,
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropIndexOperation {
    pub name: String,
    /// Owning table; required by providers whose indexes are table-scoped.
    pub table: Option<String>,
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameIndexOperation {
    pub name: String,
    pub new_name: String,
    pub table: Option<String>,
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

// ============================================================================
// Schema and Sequence Operations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaOperation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSequenceOperation {
    pub name: String,
    pub schema: Option<String>,
    pub kind: ValueKind,
    pub start_value: i64,
    #[serde(default)]
    pub options: SequenceOptions,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl CreateSequenceOperation {
    /// A `bigint` sequence starting at 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            kind: ValueKind::Int64,
            start_value: 1,
            options: SequenceOptions::default(),
            annotations: Annotations::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlterSequenceOperation {
    pub name: String,
    pub schema: Option<String>,
    pub options: SequenceOptions,
    pub old_options: SequenceOptions,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropSequenceOperation {
    pub name: String,
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameSequenceOperation {
    pub name: String,
    pub schema: Option<String>,
    pub new_name: Option<String>,
    pub new_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartSequenceOperation {
    pub name: String,
    pub schema: Option<String>,
    /// Restart at this value, or at the sequence's own start value.
    pub start_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

// ============================================================================
// Data Operations
// ============================================================================

/// Insert seed rows. Every row of `values` has one value per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertDataOperation {
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<String>,
    pub column_types: Option<Vec<String>>,
    pub values: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

/// Delete seed rows identified by key values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteDataOperation {
    pub table: String,
    pub schema: Option<String>,
    pub key_columns: Vec<String>,
    pub key_column_types: Option<Vec<String>>,
    pub key_values: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

/// Update seed rows: row `i` of `values` is written where the key equals row
/// `i` of `key_values`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDataOperation {
    pub table: String,
    pub schema: Option<String>,
    pub key_columns: Vec<String>,
    pub key_column_types: Option<Vec<String>>,
    pub key_values: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub column_types: Option<Vec<String>>,
    pub values: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

/// Raw SQL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlOperation {
    pub sql: String,
    /// Run outside the migration transaction.
    #[serde(default)]
    pub suppress_transaction: bool,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

/// A provider-specific operation the built-in generators do not know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionOperation {
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

// ============================================================================
// Migration Operation
// ============================================================================

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation")]
pub enum MigrationOperation {
    // Schemas
    EnsureSchema(SchemaOperation),
    DropSchema(SchemaOperation),

    // Tables
    CreateTable(CreateTableOperation),
    DropTable(DropTableOperation),
    RenameTable(RenameTableOperation),

    // Columns
    AddColumn(AddColumnOperation),
    DropColumn(DropColumnOperation),
    AlterColumn(AlterColumnOperation),
    RenameColumn(RenameColumnOperation),

    // Keys and constraints
    AddPrimaryKey(AddPrimaryKeyOperation),
    DropPrimaryKey(DropConstraintOperation),
    AddUniqueConstraint(AddUniqueConstraintOperation),
    DropUniqueConstraint(DropConstraintOperation),
    AddCheckConstraint(AddCheckConstraintOperation),
    DropCheckConstraint(DropConstraintOperation),
    AddForeignKey(AddForeignKeyOperation),
    DropForeignKey(DropConstraintOperation),

    // Indexes
    CreateIndex(CreateIndexOperation),
    DropIndex(DropIndexOperation),
    RenameIndex(RenameIndexOperation),

    // Sequences
    CreateSequence(CreateSequenceOperation),
    AlterSequence(AlterSequenceOperation),
    DropSequence(DropSequenceOperation),
    RenameSequence(RenameSequenceOperation),
    RestartSequence(RestartSequenceOperation),

    // Data
    InsertData(InsertDataOperation),
    DeleteData(DeleteDataOperation),
    UpdateData(UpdateDataOperation),
    Sql(SqlOperation),

    Extension(ExtensionOperation),
}

impl MigrationOperation {
    /// Name of the operation kind, as used in error messages and logs.
    pub fn kind_name(&self) -> &str {
        match self {
            MigrationOperation::EnsureSchema(_) => "EnsureSchema",
            MigrationOperation::DropSchema(_) => "DropSchema",
            MigrationOperation::CreateTable(_) => "CreateTable",
            MigrationOperation::DropTable(_) => "DropTable",
            MigrationOperation::RenameTable(_) => "RenameTable",
            MigrationOperation::AddColumn(_) => "AddColumn",
            MigrationOperation::DropColumn(_) => "DropColumn",
            MigrationOperation::AlterColumn(_) => "AlterColumn",
            MigrationOperation::RenameColumn(_) => "RenameColumn",
            MigrationOperation::AddPrimaryKey(_) => "AddPrimaryKey",
            MigrationOperation::DropPrimaryKey(_) => "DropPrimaryKey",
            MigrationOperation::AddUniqueConstraint(_) => "AddUniqueConstraint",
            MigrationOperation::DropUniqueConstraint(_) => "DropUniqueConstraint",
            MigrationOperation::AddCheckConstraint(_) => "AddCheckConstraint",
            MigrationOperation::DropCheckConstraint(_) => "DropCheckConstraint",
            MigrationOperation::AddForeignKey(_) => "AddForeignKey",
            MigrationOperation::DropForeignKey(_) => "DropForeignKey",
            MigrationOperation::CreateIndex(_) => "CreateIndex",
            MigrationOperation::DropIndex(_) => "DropIndex",
            MigrationOperation::RenameIndex(_) => "RenameIndex",
            MigrationOperation::CreateSequence(_) => "CreateSequence",
            MigrationOperation::AlterSequence(_) => "AlterSequence",
            MigrationOperation::DropSequence(_) => "DropSequence",
            MigrationOperation::RenameSequence(_) => "RenameSequence",
            MigrationOperation::RestartSequence(_) => "RestartSequence",
            MigrationOperation::InsertData(_) => "InsertData",
            MigrationOperation::DeleteData(_) => "DeleteData",
            MigrationOperation::UpdateData(_) => "UpdateData",
            MigrationOperation::Sql(_) => "Sql",
            MigrationOperation::Extension(ext) => &ext.kind,
        }
    }

    /// Can applying this operation lose data?
    pub fn is_destructive(&self) -> bool {
        match self {
            MigrationOperation::DropTable(_)
            | MigrationOperation::DropColumn(_)
            | MigrationOperation::DropSchema(_)
            | MigrationOperation::DropSequence(_)
            | MigrationOperation::DeleteData(_) => true,
            MigrationOperation::AlterColumn(op) => {
                op.changes_type() || (op.old_column.is_nullable && !op.column.is_nullable)
            }
            _ => false,
        }
    }

    pub fn annotations(&self) -> &Annotations {
        match self {
            MigrationOperation::EnsureSchema(op) | MigrationOperation::DropSchema(op) => {
                &op.annotations
            }
            MigrationOperation::CreateTable(op) => &op.annotations,
            MigrationOperation::DropTable(op) => &op.annotations,
            MigrationOperation::RenameTable(op) => &op.annotations,
            MigrationOperation::AddColumn(op) => &op.annotations,
            MigrationOperation::DropColumn(op) => &op.annotations,
            MigrationOperation::AlterColumn(op) => &op.annotations,
            MigrationOperation::RenameColumn(op) => &op.annotations,
            MigrationOperation::AddPrimaryKey(op) => &op.annotations,
            MigrationOperation::DropPrimaryKey(op)
            | MigrationOperation::DropUniqueConstraint(op)
            | MigrationOperation::DropCheckConstraint(op)
            | MigrationOperation::DropForeignKey(op) => &op.annotations,
            MigrationOperation::AddUniqueConstraint(op) => &op.annotations,
            MigrationOperation::AddCheckConstraint(op) => &op.annotations,
            MigrationOperation::AddForeignKey(op) => &op.annotations,
            MigrationOperation::CreateIndex(op) => &op.annotations,
            MigrationOperation::DropIndex(op) => &op.annotations,
            MigrationOperation::RenameIndex(op) => &op.annotations,
            MigrationOperation::CreateSequence(op) => &op.annotations,
            MigrationOperation::AlterSequence(op) => &op.annotations,
            MigrationOperation::DropSequence(op) => &op.annotations,
            MigrationOperation::RenameSequence(op) => &op.annotations,
            MigrationOperation::RestartSequence(op) => &op.annotations,
            MigrationOperation::InsertData(op) => &op.annotations,
            MigrationOperation::DeleteData(op) => &op.annotations,
            MigrationOperation::UpdateData(op) => &op.annotations,
            MigrationOperation::Sql(op) => &op.annotations,
            MigrationOperation::Extension(op) => &op.annotations,
        }
    }

    /// The table this operation targets, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            MigrationOperation::CreateTable(op) => Some(&op.name),
            MigrationOperation::DropTable(op) => Some(&op.name),
            MigrationOperation::RenameTable(op) => Some(&op.name),
            MigrationOperation::AddColumn(op) => Some(&op.table),
            MigrationOperation::DropColumn(op) => Some(&op.table),
            MigrationOperation::AlterColumn(op) => Some(&op.table),
            MigrationOperation::RenameColumn(op) => Some(&op.table),
            MigrationOperation::AddPrimaryKey(op) => Some(&op.table),
            MigrationOperation::DropPrimaryKey(op)
            | MigrationOperation::DropUniqueConstraint(op)
            | MigrationOperation::DropCheckConstraint(op)
            | MigrationOperation::DropForeignKey(op) => Some(&op.table),
            MigrationOperation::AddUniqueConstraint(op) => Some(&op.table),
            MigrationOperation::AddCheckConstraint(op) => Some(&op.table),
            MigrationOperation::AddForeignKey(op) => Some(&op.table),
            MigrationOperation::CreateIndex(op) => Some(&op.table),
            MigrationOperation::DropIndex(op) => op.table.as_deref(),
            MigrationOperation::RenameIndex(op) => op.table.as_deref(),
            MigrationOperation::InsertData(op) => Some(&op.table),
            MigrationOperation::DeleteData(op) => Some(&op.table),
            MigrationOperation::UpdateData(op) => Some(&op.table),
            MigrationOperation::EnsureSchema(_)
            | MigrationOperation::DropSchema(_)
            | MigrationOperation::CreateSequence(_)
            | MigrationOperation::AlterSequence(_)
            | MigrationOperation::DropSequence(_)
            | MigrationOperation::RenameSequence(_)
            | MigrationOperation::RestartSequence(_)
            | MigrationOperation::Sql(_)
            | MigrationOperation::Extension(_) => None,
        }
    }
}

pub(crate) fn annotation_flag(annotations: &Annotations, key: &str) -> bool {
    annotations
        .get(key)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotations_last_write_wins() {
        let column = ColumnDefinition::new("Id", ValueKind::Int32)
            .annotation("Provider:Fill", 10)
            .annotation("Provider:Fill", 80);
        assert_eq!(column.annotations.len(), 1);
        assert_eq!(column.annotations["Provider:Fill"], serde_json::json!(80));
    }

    #[test]
    fn test_identity_annotation() {
        let column = ColumnDefinition::new("Id", ValueKind::Int32).identity();
        assert!(column.is_identity());
        assert!(!ColumnDefinition::new("Name", ValueKind::String).is_identity());
    }

    #[test]
    fn test_kind_names() {
        let op = MigrationOperation::CreateTable(CreateTableOperation::new("Blogs"));
        assert_eq!(op.kind_name(), "CreateTable");
        assert_eq!(op.table(), Some("Blogs"));

        let ext = MigrationOperation::Extension(ExtensionOperation {
            kind: "CreateFullTextCatalog".into(),
            ..ExtensionOperation::default()
        });
        assert_eq!(ext.kind_name(), "CreateFullTextCatalog");
        assert_eq!(ext.table(), None);
    }

    #[test]
    fn test_destructive_operations() {
        let drop = MigrationOperation::DropTable(DropTableOperation {
            name: "Blogs".into(),
            ..DropTableOperation::default()
        });
        assert!(drop.is_destructive());

        let widen = MigrationOperation::AlterColumn(AlterColumnOperation {
            table: "Blogs".into(),
            column: ColumnDefinition::new("Name", ValueKind::String).nullable(),
            old_column: ColumnDefinition::new("Name", ValueKind::String),
            ..AlterColumnOperation::default()
        });
        assert!(!widen.is_destructive());

        let retype = MigrationOperation::AlterColumn(AlterColumnOperation {
            table: "Blogs".into(),
            column: ColumnDefinition::new("Rating", ValueKind::Int32),
            old_column: ColumnDefinition::new("Rating", ValueKind::Int64),
            ..AlterColumnOperation::default()
        });
        assert!(retype.is_destructive());
    }

    #[test]
    fn test_unknown_type_is_not_a_type_change() {
        let op = AlterColumnOperation {
            table: "Blogs".into(),
            column: ColumnDefinition::new("Name", ValueKind::String),
            old_column: ColumnDefinition {
                name: "Name".into(),
                ..ColumnDefinition::default()
            },
            ..AlterColumnOperation::default()
        };
        assert!(!op.changes_type());
    }

    #[test]
    fn test_create_table_builder_fills_dependent_table() {
        let op = CreateTableOperation::new("Posts")
            .column(ColumnDefinition::new("Id", ValueKind::Int32))
            .column(ColumnDefinition::new("BlogId", ValueKind::Int32))
            .primary_key("PK_Posts", &["Id"])
            .foreign_key(
                AddForeignKeyOperation::new("FK_Posts_Blogs_BlogId", &["BlogId"], "Blogs", &["Id"])
                    .on_delete(ReferentialAction::Cascade),
            );
        assert_eq!(op.foreign_keys[0].table, "Posts");
        assert!(op.is_key_column("BlogId"));
        assert!(op.is_key_column("Id"));
    }

    #[test]
    fn test_operation_serde_tagging() {
        let op = MigrationOperation::Sql(SqlOperation {
            sql: "VACUUM".into(),
            suppress_transaction: true,
            ..SqlOperation::default()
        });
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["operation"], "Sql");
        let back: MigrationOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}

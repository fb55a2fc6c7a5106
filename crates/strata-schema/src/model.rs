//! Relational model: the target schema shape migrations are diffed against.

use crate::operations::{
    AddForeignKeyOperation, ColumnDefinition, CreateTableOperation, MigrationOperation,
    ReferentialAction, SequenceOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strata_core::{Error, Result, SchemaErrorKind, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub principal_table: String,
    pub principal_schema: Option<String>,
    pub principal_columns: Vec<String>,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

impl ForeignKey {
    fn from_operation(op: &AddForeignKeyOperation) -> Self {
        Self {
            name: op.name.clone(),
            columns: op.columns.clone(),
            principal_table: op.principal_table.clone(),
            principal_schema: op.principal_schema.clone(),
            principal_columns: op.principal_columns.clone(),
            on_update: op.on_update,
            on_delete: op.on_delete,
        }
    }

    /// The operation adding this key to `table`.
    pub fn to_operation(&self, table: &str, schema: Option<&str>) -> AddForeignKeyOperation {
        AddForeignKeyOperation {
            name: self.name.clone(),
            table: table.to_string(),
            schema: schema.map(str::to_string),
            columns: self.columns.clone(),
            principal_table: self.principal_table.clone(),
            principal_schema: self.principal_schema.clone(),
            principal_columns: self.principal_columns.clone(),
            on_update: self.on_update,
            on_delete: self.on_delete,
            annotations: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Option<PrimaryKey>,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub check_constraints: Vec<CheckConstraint>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
    pub comment: Option<String>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Does `column` take part in a key, constraint, foreign key or index?
    pub fn is_key_or_index_column(&self, column: &str) -> bool {
        let has = |columns: &[String]| columns.iter().any(|c| c == column);
        self.primary_key.as_ref().is_some_and(|pk| has(&pk.columns))
            || self.unique_constraints.iter().any(|u| has(&u.columns))
            || self.foreign_keys.iter().any(|fk| has(&fk.columns))
            || self.indexes.iter().any(|ix| has(&ix.columns))
    }

    fn matches(&self, name: &str, schema: Option<&str>) -> bool {
        self.name == name && self.schema.as_deref() == schema
    }

    fn from_operation(op: &CreateTableOperation) -> Self {
        Self {
            name: op.name.clone(),
            schema: op.schema.clone(),
            columns: op.columns.clone(),
            primary_key: op.primary_key.as_ref().map(|pk| PrimaryKey {
                name: pk.name.clone(),
                columns: pk.columns.clone(),
            }),
            unique_constraints: op
                .unique_constraints
                .iter()
                .map(|u| UniqueConstraint {
                    name: u.name.clone(),
                    columns: u.columns.clone(),
                })
                .collect(),
            check_constraints: op
                .check_constraints
                .iter()
                .map(|c| CheckConstraint {
                    name: c.name.clone(),
                    sql: c.sql.clone(),
                })
                .collect(),
            foreign_keys: op.foreign_keys.iter().map(ForeignKey::from_operation).collect(),
            indexes: Vec::new(),
            comment: op.comment.clone(),
        }
    }

    fn rename_column(&mut self, from: &str, to: &str) {
        let rename = |columns: &mut Vec<String>| {
            for c in columns.iter_mut().filter(|c| c.as_str() == from) {
                *c = to.to_string();
            }
        };
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == from) {
            column.name = to.to_string();
        }
        if let Some(pk) = &mut self.primary_key {
            rename(&mut pk.columns);
        }
        for unique in &mut self.unique_constraints {
            rename(&mut unique.columns);
        }
        for fk in &mut self.foreign_keys {
            rename(&mut fk.columns);
        }
        for index in &mut self.indexes {
            rename(&mut index.columns);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub schema: Option<String>,
    pub kind: ValueKind,
    pub start_value: i64,
    pub options: SequenceOptions,
}

/// Tables, sequences and schemas of a database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationalModel {
    pub schemas: BTreeSet<String>,
    pub tables: Vec<Table>,
    pub sequences: Vec<Sequence>,
}

impl RelationalModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The model produced by applying `operations` to an empty model.
    pub fn from_operations(operations: &[MigrationOperation]) -> Result<Self> {
        let mut model = Self::new();
        model.apply_all(operations)?;
        Ok(model)
    }

    #[must_use]
    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn table(&self, name: &str, schema: Option<&str>) -> Option<&Table> {
        self.tables.iter().find(|t| t.matches(name, schema))
    }

    pub fn table_mut(&mut self, name: &str, schema: Option<&str>) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.matches(name, schema))
    }

    pub fn column(&self, table: &str, schema: Option<&str>, column: &str) -> Option<&ColumnDefinition> {
        self.table(table, schema)?.column(column)
    }

    pub fn sequence(&self, name: &str, schema: Option<&str>) -> Option<&Sequence> {
        self.sequences
            .iter()
            .find(|s| s.name == name && s.schema.as_deref() == schema)
    }

    pub fn apply_all(&mut self, operations: &[MigrationOperation]) -> Result<()> {
        operations.iter().try_for_each(|op| self.apply(op))
    }

    /// Replay one operation onto this model.
    ///
    /// Data, raw SQL and extension operations leave the model unchanged.
    pub fn apply(&mut self, operation: &MigrationOperation) -> Result<()> {
        match operation {
            MigrationOperation::EnsureSchema(op) => {
                self.schemas.insert(op.name.clone());
            }
            MigrationOperation::DropSchema(op) => {
                self.schemas.remove(&op.name);
            }
            MigrationOperation::CreateTable(op) => {
                if self.table(&op.name, op.schema.as_deref()).is_some() {
                    return Err(invalid(format!("table '{}' already exists", op.name)));
                }
                self.tables.push(Table::from_operation(op));
            }
            MigrationOperation::DropTable(op) => {
                let before = self.tables.len();
                self.tables.retain(|t| !t.matches(&op.name, op.schema.as_deref()));
                if self.tables.len() == before {
                    return Err(missing_table(&op.name));
                }
            }
            MigrationOperation::RenameTable(op) => {
                let table = self.require_table(&op.name, op.schema.as_deref())?;
                if let Some(new_name) = &op.new_name {
                    table.name.clone_from(new_name);
                }
                if op.new_schema.is_some() {
                    table.schema.clone_from(&op.new_schema);
                }
            }
            MigrationOperation::AddColumn(op) => {
                let table = self.require_table(&op.table, op.schema.as_deref())?;
                if table.column(&op.column.name).is_some() {
                    return Err(invalid(format!(
                        "column '{}.{}' already exists",
                        op.table, op.column.name
                    )));
                }
                table.columns.push(op.column.clone());
            }
            MigrationOperation::DropColumn(op) => {
                let table = self.require_table(&op.table, op.schema.as_deref())?;
                table.columns.retain(|c| c.name != op.name);
            }
            MigrationOperation::AlterColumn(op) => {
                let table = self.require_table(&op.table, op.schema.as_deref())?;
                let column = table
                    .columns
                    .iter_mut()
                    .find(|c| c.name == op.column.name)
                    .ok_or_else(|| {
                        invalid(format!(
                            "column '{}.{}' not found in model",
                            op.table, op.column.name
                        ))
                    })?;
                *column = op.column.clone();
            }
            MigrationOperation::RenameColumn(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .rename_column(&op.name, &op.new_name);
            }
            MigrationOperation::AddPrimaryKey(op) => {
                self.require_table(&op.table, op.schema.as_deref())?.primary_key = Some(PrimaryKey {
                    name: op.name.clone(),
                    columns: op.columns.clone(),
                });
            }
            MigrationOperation::DropPrimaryKey(op) => {
                self.require_table(&op.table, op.schema.as_deref())?.primary_key = None;
            }
            MigrationOperation::AddUniqueConstraint(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .unique_constraints
                    .push(UniqueConstraint {
                        name: op.name.clone(),
                        columns: op.columns.clone(),
                    });
            }
            MigrationOperation::DropUniqueConstraint(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .unique_constraints
                    .retain(|u| u.name != op.name);
            }
            MigrationOperation::AddCheckConstraint(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .check_constraints
                    .push(CheckConstraint {
                        name: op.name.clone(),
                        sql: op.sql.clone(),
                    });
            }
            MigrationOperation::DropCheckConstraint(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .check_constraints
                    .retain(|c| c.name != op.name);
            }
            MigrationOperation::AddForeignKey(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .foreign_keys
                    .push(ForeignKey::from_operation(op));
            }
            MigrationOperation::DropForeignKey(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .foreign_keys
                    .retain(|fk| fk.name != op.name);
            }
            MigrationOperation::CreateIndex(op) => {
                self.require_table(&op.table, op.schema.as_deref())?
                    .indexes
                    .push(Index {
                        name: op.name.clone(),
                        columns: op.columns.clone(),
                        is_unique: op.is_unique,
                        filter: op.filter.clone(),
                    });
            }
            MigrationOperation::DropIndex(op) => {
                for table in self.index_owners(op.table.as_deref(), op.schema.as_deref()) {
                    table.indexes.retain(|ix| ix.name != op.name);
                }
            }
            MigrationOperation::RenameIndex(op) => {
                for table in self.index_owners(op.table.as_deref(), op.schema.as_deref()) {
                    for index in table.indexes.iter_mut().filter(|ix| ix.name == op.name) {
                        index.name.clone_from(&op.new_name);
                    }
                }
            }
            MigrationOperation::CreateSequence(op) => {
                self.sequences.push(Sequence {
                    name: op.name.clone(),
                    schema: op.schema.clone(),
                    kind: op.kind,
                    start_value: op.start_value,
                    options: op.options.clone(),
                });
            }
            MigrationOperation::AlterSequence(op) => {
                self.require_sequence(&op.name, op.schema.as_deref())?
                    .options
                    .clone_from(&op.options);
            }
            MigrationOperation::DropSequence(op) => {
                self.sequences
                    .retain(|s| !(s.name == op.name && s.schema == op.schema));
            }
            MigrationOperation::RenameSequence(op) => {
                let sequence = self.require_sequence(&op.name, op.schema.as_deref())?;
                if let Some(new_name) = &op.new_name {
                    sequence.name.clone_from(new_name);
                }
                if op.new_schema.is_some() {
                    sequence.schema.clone_from(&op.new_schema);
                }
            }
            MigrationOperation::RestartSequence(op) => {
                if let Some(start) = op.start_value {
                    self.require_sequence(&op.name, op.schema.as_deref())?
                        .start_value = start;
                }
            }
            MigrationOperation::InsertData(_)
            | MigrationOperation::DeleteData(_)
            | MigrationOperation::UpdateData(_)
            | MigrationOperation::Sql(_)
            | MigrationOperation::Extension(_) => {}
        }
        Ok(())
    }

    fn require_table(&mut self, name: &str, schema: Option<&str>) -> Result<&mut Table> {
        self.table_mut(name, schema).ok_or_else(|| missing_table(name))
    }

    fn require_sequence(&mut self, name: &str, schema: Option<&str>) -> Result<&mut Sequence> {
        self.sequences
            .iter_mut()
            .find(|s| s.name == name && s.schema.as_deref() == schema)
            .ok_or_else(|| invalid(format!("sequence '{}' not found in model", name)))
    }

    fn index_owners<'a>(
        &'a mut self,
        table: Option<&'a str>,
        schema: Option<&'a str>,
    ) -> impl Iterator<Item = &'a mut Table> + 'a {
        self.tables.iter_mut().filter(move |t| match table {
            Some(name) => t.matches(name, schema),
            None => t.schema.as_deref() == schema,
        })
    }
}

fn invalid(message: String) -> Error {
    Error::schema(SchemaErrorKind::Invalid, message)
}

fn missing_table(name: &str) -> Error {
    invalid(format!("table '{}' not found in model", name))
}

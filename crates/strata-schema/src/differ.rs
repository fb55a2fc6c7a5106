//! Model differ: the operations that turn one relational model into another.

use crate::model::{CheckConstraint, ForeignKey, Index, RelationalModel, Sequence, Table};
use crate::operations::{
    AddCheckConstraintOperation, AddColumnOperation, AddPrimaryKeyOperation,
    AddUniqueConstraintOperation, AlterColumnOperation, AlterSequenceOperation,
    CreateIndexOperation, CreateSequenceOperation, CreateTableOperation,
    DropColumnOperation, DropConstraintOperation, DropIndexOperation, DropSequenceOperation,
    DropTableOperation, MigrationOperation, RestartSequenceOperation, SchemaOperation,
};
use std::collections::BTreeSet;

/// Compares two [`RelationalModel`]s.
///
/// # Example
///
/// ```ignore
/// let operations = ModelDiffer::new().diff(&RelationalModel::new(), &target);
/// let commands = generator.generate(&operations, Some(&target), &options)?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelDiffer;

impl ModelDiffer {
    pub const fn new() -> Self {
        Self
    }

    pub fn has_differences(&self, source: &RelationalModel, target: &RelationalModel) -> bool {
        !self.diff(source, target).is_empty()
    }

    /// Operations that transform `source` into `target`, ordered for safe
    /// execution: dependents are dropped before their principals and
    /// principals are created before their dependents.
    pub fn diff(&self, source: &RelationalModel, target: &RelationalModel) -> Vec<MigrationOperation> {
        let mut operations = Vec::new();

        diff_schemas(source, target, &mut operations);
        diff_sequences(source, target, &mut operations);

        let dropped: Vec<&Table> = source
            .tables
            .iter()
            .filter(|t| target.table(&t.name, t.schema.as_deref()).is_none())
            .collect();
        let created: Vec<&Table> = target
            .tables
            .iter()
            .filter(|t| source.table(&t.name, t.schema.as_deref()).is_none())
            .collect();

        drop_tables(&dropped, &mut operations);
        create_tables(&created, &mut operations);

        for target_table in &target.tables {
            if let Some(source_table) = source.table(&target_table.name, target_table.schema.as_deref()) {
                diff_table(source_table, target_table, &mut operations);
            }
        }

        operations.sort_by_key(priority);

        tracing::debug!(
            operations = operations.len(),
            dropped_tables = dropped.len(),
            created_tables = created.len(),
            "Diffed relational models"
        );
        operations
    }
}

/// Position of an operation kind in the execution order.
fn priority(op: &MigrationOperation) -> u8 {
    match op {
        MigrationOperation::DropForeignKey(_) => 1,
        MigrationOperation::DropIndex(_) => 2,
        MigrationOperation::DropUniqueConstraint(_) | MigrationOperation::DropCheckConstraint(_) => 3,
        MigrationOperation::DropPrimaryKey(_) => 4,
        MigrationOperation::DropTable(_) => 5,
        MigrationOperation::DropColumn(_) => 6,
        MigrationOperation::DropSequence(_) => 7,
        MigrationOperation::EnsureSchema(_) => 8,
        MigrationOperation::CreateSequence(_) => 9,
        MigrationOperation::AlterSequence(_) | MigrationOperation::RestartSequence(_) => 10,
        MigrationOperation::CreateTable(_) => 11,
        MigrationOperation::AddColumn(_) => 12,
        MigrationOperation::AlterColumn(_) => 13,
        MigrationOperation::AddPrimaryKey(_) => 14,
        MigrationOperation::AddUniqueConstraint(_) | MigrationOperation::AddCheckConstraint(_) => 15,
        MigrationOperation::CreateIndex(_) => 16,
        MigrationOperation::AddForeignKey(_) => 17,
        MigrationOperation::DropSchema(_) => 18,
        _ => 19,
    }
}

// ============================================================================
// Schemas and Sequences
// ============================================================================

fn all_schemas(model: &RelationalModel) -> BTreeSet<String> {
    model
        .schemas
        .iter()
        .cloned()
        .chain(model.tables.iter().filter_map(|t| t.schema.clone()))
        .chain(model.sequences.iter().filter_map(|s| s.schema.clone()))
        .collect()
}

fn diff_schemas(source: &RelationalModel, target: &RelationalModel, ops: &mut Vec<MigrationOperation>) {
    let before = all_schemas(source);
    let after = all_schemas(target);
    for name in after.difference(&before) {
        ops.push(MigrationOperation::EnsureSchema(SchemaOperation {
            name: name.clone(),
            ..SchemaOperation::default()
        }));
    }
    for name in before.difference(&after) {
        ops.push(MigrationOperation::DropSchema(SchemaOperation {
            name: name.clone(),
            ..SchemaOperation::default()
        }));
    }
}

fn create_sequence(sequence: &Sequence) -> MigrationOperation {
    MigrationOperation::CreateSequence(CreateSequenceOperation {
        name: sequence.name.clone(),
        schema: sequence.schema.clone(),
        kind: sequence.kind,
        start_value: sequence.start_value,
        options: sequence.options.clone(),
        annotations: Default::default(),
    })
}

fn drop_sequence(sequence: &Sequence) -> MigrationOperation {
    MigrationOperation::DropSequence(DropSequenceOperation {
        name: sequence.name.clone(),
        schema: sequence.schema.clone(),
        ..DropSequenceOperation::default()
    })
}

fn diff_sequences(source: &RelationalModel, target: &RelationalModel, ops: &mut Vec<MigrationOperation>) {
    for old in &source.sequences {
        if target.sequence(&old.name, old.schema.as_deref()).is_none() {
            ops.push(drop_sequence(old));
        }
    }
    for new in &target.sequences {
        let Some(old) = source.sequence(&new.name, new.schema.as_deref()) else {
            ops.push(create_sequence(new));
            continue;
        };
        if old.kind != new.kind {
            ops.push(drop_sequence(old));
            ops.push(create_sequence(new));
            continue;
        }
        if old.options != new.options {
            ops.push(MigrationOperation::AlterSequence(AlterSequenceOperation {
                name: new.name.clone(),
                schema: new.schema.clone(),
                options: new.options.clone(),
                old_options: old.options.clone(),
                ..AlterSequenceOperation::default()
            }));
        }
        if old.start_value != new.start_value {
            ops.push(MigrationOperation::RestartSequence(RestartSequenceOperation {
                name: new.name.clone(),
                schema: new.schema.clone(),
                start_value: Some(new.start_value),
                ..RestartSequenceOperation::default()
            }));
        }
    }
}

// ============================================================================
// Table Creation and Removal
// ============================================================================

/// Order `tables` principals first.
///
/// Returns the order plus, per table, the foreign keys that had to be broken
/// out of a dependency cycle.
fn principal_order<'a>(tables: &[&'a Table]) -> Vec<(&'a Table, Vec<&'a ForeignKey>)> {
    let is_member = |fk: &ForeignKey, emitted: &[bool]| {
        tables.iter().enumerate().any(|(i, t)| {
            !emitted[i] && t.name == fk.principal_table && t.schema == fk.principal_schema
        })
    };

    let mut emitted = vec![false; tables.len()];
    let mut order = Vec::with_capacity(tables.len());
    while order.len() < tables.len() {
        let ready = (0..tables.len()).find(|&i| {
            !emitted[i]
                && tables[i]
                    .foreign_keys
                    .iter()
                    .filter(|fk| !(fk.principal_table == tables[i].name && fk.principal_schema == tables[i].schema))
                    .all(|fk| !is_member(fk, &emitted))
        });

        let (index, broken) = match ready {
            Some(i) => (i, Vec::new()),
            None => {
                let Some(i) = emitted.iter().position(|done| !done) else {
                    break;
                };
                let table = tables[i];
                let broken: Vec<&ForeignKey> = table
                    .foreign_keys
                    .iter()
                    .filter(|fk| {
                        !(fk.principal_table == table.name && fk.principal_schema == table.schema)
                            && is_member(fk, &emitted)
                    })
                    .collect();
                tracing::debug!(
                    table = %table.name,
                    foreign_keys = broken.len(),
                    "Breaking foreign key cycle"
                );
                (i, broken)
            }
        };
        emitted[index] = true;
        order.push((tables[index], broken));
    }
    order
}

fn drop_tables(tables: &[&Table], ops: &mut Vec<MigrationOperation>) {
    let order = principal_order(tables);
    for (table, broken) in order.iter().rev() {
        for fk in broken {
            ops.push(MigrationOperation::DropForeignKey(drop_constraint(table, &fk.name)));
        }
        ops.push(MigrationOperation::DropTable(DropTableOperation {
            name: table.name.clone(),
            schema: table.schema.clone(),
            ..DropTableOperation::default()
        }));
    }
}

fn create_tables(tables: &[&Table], ops: &mut Vec<MigrationOperation>) {
    for (table, broken) in principal_order(tables) {
        let mut create = CreateTableOperation {
            name: table.name.clone(),
            schema: table.schema.clone(),
            columns: table.columns.clone(),
            primary_key: table.primary_key.as_ref().map(|pk| AddPrimaryKeyOperation {
                name: pk.name.clone(),
                table: table.name.clone(),
                schema: table.schema.clone(),
                columns: pk.columns.clone(),
                annotations: Default::default(),
            }),
            comment: table.comment.clone(),
            ..CreateTableOperation::default()
        };
        create.unique_constraints = table
            .unique_constraints
            .iter()
            .map(|u| add_unique(table, &u.name, &u.columns))
            .collect();
        create.check_constraints = table
            .check_constraints
            .iter()
            .map(|c| add_check(table, c))
            .collect();

        for fk in &table.foreign_keys {
            let op = fk.to_operation(&table.name, table.schema.as_deref());
            if broken.iter().any(|b| b.name == fk.name) {
                ops.push(MigrationOperation::AddForeignKey(op));
            } else {
                create.foreign_keys.push(op);
            }
        }
        ops.push(MigrationOperation::CreateTable(create));

        for index in &table.indexes {
            ops.push(create_index(table, index));
        }
    }
}

// ============================================================================
// Table Contents
// ============================================================================

fn diff_table(source: &Table, target: &Table, ops: &mut Vec<MigrationOperation>) {
    let schema = target.schema.clone();

    for old in &source.columns {
        if target.column(&old.name).is_none() {
            ops.push(MigrationOperation::DropColumn(DropColumnOperation {
                name: old.name.clone(),
                table: target.name.clone(),
                schema: schema.clone(),
                ..DropColumnOperation::default()
            }));
        }
    }
    for new in &target.columns {
        match source.column(&new.name) {
            None => ops.push(MigrationOperation::AddColumn(AddColumnOperation {
                table: target.name.clone(),
                schema: schema.clone(),
                column: new.clone(),
                ..AddColumnOperation::default()
            })),
            Some(old) if old != new => ops.push(MigrationOperation::AlterColumn(AlterColumnOperation {
                table: target.name.clone(),
                schema: schema.clone(),
                column: new.clone(),
                old_column: old.clone(),
                ..AlterColumnOperation::default()
            })),
            Some(_) => {}
        }
    }

    if source.primary_key != target.primary_key {
        if let Some(pk) = &source.primary_key {
            ops.push(MigrationOperation::DropPrimaryKey(drop_constraint(target, &pk.name)));
        }
        if let Some(pk) = &target.primary_key {
            ops.push(MigrationOperation::AddPrimaryKey(AddPrimaryKeyOperation {
                name: pk.name.clone(),
                table: target.name.clone(),
                schema: schema.clone(),
                columns: pk.columns.clone(),
                annotations: Default::default(),
            }));
        }
    }

    diff_named(
        &source.unique_constraints,
        &target.unique_constraints,
        |u| &u.name,
        |u| MigrationOperation::DropUniqueConstraint(drop_constraint(target, &u.name)),
        |u| MigrationOperation::AddUniqueConstraint(add_unique(target, &u.name, &u.columns)),
        ops,
    );
    diff_named(
        &source.check_constraints,
        &target.check_constraints,
        |c| &c.name,
        |c| MigrationOperation::DropCheckConstraint(drop_constraint(target, &c.name)),
        |c| MigrationOperation::AddCheckConstraint(add_check(target, c)),
        ops,
    );
    diff_named(
        &source.foreign_keys,
        &target.foreign_keys,
        |fk| &fk.name,
        |fk| MigrationOperation::DropForeignKey(drop_constraint(target, &fk.name)),
        |fk| MigrationOperation::AddForeignKey(fk.to_operation(&target.name, target.schema.as_deref())),
        ops,
    );
    diff_named(
        &source.indexes,
        &target.indexes,
        |ix| &ix.name,
        |ix| {
            MigrationOperation::DropIndex(DropIndexOperation {
                name: ix.name.clone(),
                table: Some(target.name.clone()),
                schema: target.schema.clone(),
                ..DropIndexOperation::default()
            })
        },
        |ix| create_index(target, ix),
        ops,
    );
}

/// Drop items missing from or changed in `target`, add items new or changed.
fn diff_named<T: PartialEq>(
    source: &[T],
    target: &[T],
    name: impl Fn(&T) -> &String,
    drop: impl Fn(&T) -> MigrationOperation,
    add: impl Fn(&T) -> MigrationOperation,
    ops: &mut Vec<MigrationOperation>,
) {
    for old in source {
        if !target.iter().any(|new| name(new) == name(old) && new == old) {
            ops.push(drop(old));
        }
    }
    for new in target {
        if !source.iter().any(|old| name(old) == name(new) && old == new) {
            ops.push(add(new));
        }
    }
}

fn drop_constraint(table: &Table, name: &str) -> DropConstraintOperation {
    DropConstraintOperation {
        name: name.to_string(),
        table: table.name.clone(),
        schema: table.schema.clone(),
        ..DropConstraintOperation::default()
    }
}

fn add_unique(table: &Table, name: &str, columns: &[String]) -> AddUniqueConstraintOperation {
    AddUniqueConstraintOperation {
        name: name.to_string(),
        table: table.name.clone(),
        schema: table.schema.clone(),
        columns: columns.to_vec(),
        annotations: Default::default(),
    }
}

fn add_check(table: &Table, check: &CheckConstraint) -> AddCheckConstraintOperation {
    AddCheckConstraintOperation {
        name: check.name.clone(),
        table: table.name.clone(),
        schema: table.schema.clone(),
        sql: check.sql.clone(),
        annotations: Default::default(),
    }
}

fn create_index(table: &Table, index: &Index) -> MigrationOperation {
    MigrationOperation::CreateIndex(CreateIndexOperation {
        name: index.name.clone(),
        table: table.name.clone(),
        schema: table.schema.clone(),
        columns: index.columns.clone(),
        is_unique: index.is_unique,
        filter: index.filter.clone(),
        annotations: Default::default(),
    })
}

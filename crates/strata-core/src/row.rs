//! Database rows and result sets.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
///
/// This struct is wrapped in `Arc` so all rows from the same query share
/// the same column information.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in order
    values: Vec<Value>,
    /// Shared column metadata
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by column index.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!(
                    "index {} out of bounds (row has {} columns)",
                    index,
                    self.len()
                ),
                column: None,
            })
        })?;
        T::from_value(value)
    }

    /// Get a typed value by column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Iterate over all values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

/// The rows produced by one row-returning statement of a multi-statement command.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Arc<ColumnInfo>,
    rows: Vec<Row>,
}

impl ResultSet {
    /// Build a result set from column names and row values.
    pub fn new(column_names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        let rows = rows
            .into_iter()
            .map(|values| Row::with_columns(Arc::clone(&columns), values))
            .collect();
        Self { columns, rows }
    }

    /// Build a single-column, single-row result set (e.g. a rows-affected count).
    pub fn scalar(column: impl Into<String>, value: Value) -> Self {
        Self::new(vec![column.into()], vec![vec![value]])
    }

    /// Build a result set from rows, taking the column metadata from the first row.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| Arc::clone(&row.columns))
            .unwrap_or_default();
        Self { columns, rows }
    }

    /// Build a result set with columns but no rows.
    pub fn empty(column_names: Vec<String>) -> Self {
        Self::new(column_names, Vec::new())
    }

    /// Column metadata.
    pub fn columns(&self) -> &ColumnInfo {
        &self.columns
    }

    /// Rows in order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consume into rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Trait for converting from a `Value` to a typed value.
pub trait FromValue: Sized {
    /// Convert from a Value, returning an error if the conversion fails.
    fn from_value(value: &Value) -> Result<Self>;
}

fn type_error(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| type_error("bool", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = value.as_i64().ok_or_else(|| type_error("i32", value))?;
        i32::try_from(wide).map_err(|_| type_error("i32", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| type_error("i64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            _ => Err(type_error("String", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_named_reports_column() {
        let row = Row::new(vec!["id".into()], vec![Value::Text("x".into())]);
        let err = row.get_named::<i64>("id").unwrap_err();
        match err {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("id")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_get_named_missing_column() {
        let row = Row::new(vec!["id".into()], vec![Value::Int(1)]);
        assert!(row.get_named::<i64>("name").is_err());
        assert_eq!(row.get_named::<i64>("id").unwrap(), 1);
    }

    #[test]
    fn test_result_set_shares_columns() {
        let set = ResultSet::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::Text("a".into())],
                vec![Value::Int(2), Value::Null],
            ],
        );
        assert_eq!(set.rows().len(), 2);
        assert_eq!(set.columns().index_of("name"), Some(1));
        assert_eq!(
            set.rows()[1].get_named::<Option<String>>("name").unwrap(),
            None
        );
    }

    #[test]
    fn test_scalar_result_set() {
        let set = ResultSet::scalar("changes()", Value::BigInt(1));
        assert_eq!(set.rows()[0].get_as::<i32>(0).unwrap(), 1);
    }
}

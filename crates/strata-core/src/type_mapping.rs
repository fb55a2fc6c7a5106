//! Mapping between in-memory value kinds and store types.
//!
//! Generators ask a [`TypeMappingSource`] for the store type of a column
//! (from its [`ColumnFacets`]) and for a [`TypeMapping`] able to render a
//! value as a SQL literal in that store type.

use crate::Result;
use crate::dialect::Dialect;
use crate::error::{Error, TypeError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// The in-memory kind of a property or column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    String,
    Bytes,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Uuid,
    Json,
}

impl ValueKind {
    /// The kind a value naturally maps to, if any (NULL and arrays have none).
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Array(_) => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::SmallInt(_) => Some(ValueKind::Int16),
            Value::Int(_) => Some(ValueKind::Int32),
            Value::BigInt(_) => Some(ValueKind::Int64),
            Value::Float(_) => Some(ValueKind::Float32),
            Value::Double(_) => Some(ValueKind::Float64),
            Value::Decimal(_) => Some(ValueKind::Decimal),
            Value::Text(_) => Some(ValueKind::String),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::Date(_) => Some(ValueKind::Date),
            Value::Time(_) => Some(ValueKind::Time),
            Value::Timestamp(_) => Some(ValueKind::DateTime),
            Value::TimestampTz(_) => Some(ValueKind::DateTimeOffset),
            Value::Uuid(_) => Some(ValueKind::Uuid),
            Value::Json(_) => Some(ValueKind::Json),
        }
    }
}

/// Facets that, together with a kind, determine a column's store type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFacets {
    pub kind: ValueKind,
    pub is_unicode: Option<bool>,
    pub max_length: Option<u32>,
    pub is_fixed_length: Option<bool>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub is_row_version: bool,
    /// The column takes part in a key, unique constraint, foreign key or index.
    pub key_or_index: bool,
}

impl ColumnFacets {
    /// Facets with nothing but the kind set.
    pub fn for_kind(kind: ValueKind) -> Self {
        Self {
            kind,
            is_unicode: None,
            max_length: None,
            is_fixed_length: None,
            precision: None,
            scale: None,
            is_row_version: false,
            key_or_index: false,
        }
    }
}

/// A resolved store type plus the literal rendering rules for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    pub store_type: String,
    pub kind: ValueKind,
    pub dialect: Dialect,
}

impl TypeMapping {
    /// Create a mapping.
    pub fn new(store_type: impl Into<String>, kind: ValueKind, dialect: Dialect) -> Self {
        Self {
            store_type: store_type.into(),
            kind,
            dialect,
        }
    }

    /// Render `value` as a SQL literal of this mapping's store type.
    pub fn generate_sql_literal(&self, value: &Value) -> Result<String> {
        let dialect = self.dialect;
        let literal = match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match dialect {
                Dialect::Sqlite => if *b { "1" } else { "0" }.to_string(),
                Dialect::Mysql | Dialect::Postgres => if *b { "TRUE" } else { "FALSE" }.to_string(),
            },
            Value::SmallInt(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::Float(v) => float_literal(f64::from(*v), dialect),
            Value::Double(v) => float_literal(*v, dialect),
            Value::Decimal(v) => v.clone(),
            Value::Text(s) => dialect.string_literal(s),
            Value::Bytes(bytes) => {
                let mut hex = String::with_capacity(bytes.len() * 2);
                for b in bytes {
                    let _ = write!(hex, "{:02X}", b);
                }
                match dialect {
                    Dialect::Postgres => format!("'\\x{}'::bytea", hex),
                    Dialect::Sqlite | Dialect::Mysql => format!("X'{}'", hex),
                }
            }
            Value::Date(days) => {
                let text = format_date(i64::from(*days));
                typed_literal(dialect, "DATE", &text)
            }
            Value::Time(micros) => typed_literal(dialect, "TIME", &format_time(*micros)),
            Value::Timestamp(micros) => {
                typed_literal(dialect, "TIMESTAMP", &format_timestamp(*micros))
            }
            Value::TimestampTz(micros) => {
                let text = format!("{}+00:00", format_timestamp(*micros));
                typed_literal(dialect, "TIMESTAMPTZ", &text)
            }
            Value::Uuid(bytes) => dialect.string_literal(&format_uuid(bytes)),
            Value::Json(json) => dialect.string_literal(&json.to_string()),
            Value::Array(items) => {
                if dialect != Dialect::Postgres {
                    return Err(Error::Type(TypeError {
                        expected: "scalar value",
                        actual: format!("ARRAY literal for {}", dialect),
                        column: None,
                    }));
                }
                let parts = items
                    .iter()
                    .map(|item| self.generate_sql_literal(item))
                    .collect::<Result<Vec<_>>>()?;
                format!("ARRAY[{}]", parts.join(", "))
            }
        };
        Ok(literal)
    }
}

/// Resolves store types and literal renderers.
pub trait TypeMappingSource: Send + Sync {
    /// The dialect this source produces mappings for.
    fn dialect(&self) -> Dialect;

    /// Find the mapping for a kind plus facets.
    fn find_mapping(&self, facets: &ColumnFacets) -> Option<TypeMapping>;

    /// Find the mapping for an explicit store type name.
    fn find_mapping_for_store_type(&self, store_type: &str) -> Option<TypeMapping>;

    /// Find the default mapping for a value.
    fn find_mapping_for_value(&self, value: &Value) -> Option<TypeMapping> {
        let kind = ValueKind::of(value)?;
        self.find_mapping(&ColumnFacets::for_kind(kind))
    }
}

/// The built-in type mapping source for each supported dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectTypeMappingSource {
    dialect: Dialect,
}

impl DialectTypeMappingSource {
    /// Create a mapping source for `dialect`.
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn store_type(&self, facets: &ColumnFacets) -> String {
        match self.dialect {
            Dialect::Postgres => postgres_store_type(facets),
            Dialect::Sqlite => sqlite_store_type(facets.kind).to_string(),
            Dialect::Mysql => mysql_store_type(facets),
        }
    }
}

impl TypeMappingSource for DialectTypeMappingSource {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn find_mapping(&self, facets: &ColumnFacets) -> Option<TypeMapping> {
        Some(TypeMapping::new(
            self.store_type(facets),
            facets.kind,
            self.dialect,
        ))
    }

    fn find_mapping_for_store_type(&self, store_type: &str) -> Option<TypeMapping> {
        let normalized = store_type.trim().to_ascii_lowercase();
        let (base, args) = match normalized.find('(') {
            Some(idx) => (normalized[..idx].trim(), normalized[idx..].trim()),
            None => (normalized.as_str(), ""),
        };

        let kind = match (self.dialect, base) {
            (Dialect::Sqlite, "integer" | "int" | "bigint") => ValueKind::Int64,
            (Dialect::Sqlite, "real" | "double" | "float") => ValueKind::Float64,
            (Dialect::Sqlite, "numeric" | "decimal") => ValueKind::Decimal,
            (Dialect::Mysql, "tinyint") if args == "(1)" => ValueKind::Bool,
            (_, "boolean" | "bool" | "bit") => ValueKind::Bool,
            (_, "tinyint" | "smallint" | "int2") => ValueKind::Int16,
            (_, "integer" | "int" | "int4" | "mediumint") => ValueKind::Int32,
            (_, "bigint" | "int8") => ValueKind::Int64,
            (_, "real" | "float4" | "float") => ValueKind::Float32,
            (_, "double precision" | "double" | "float8") => ValueKind::Float64,
            (_, "numeric" | "decimal" | "money") => ValueKind::Decimal,
            (
                _,
                "text" | "character varying" | "varchar" | "character" | "char" | "citext"
                | "longtext" | "mediumtext" | "tinytext" | "nvarchar" | "nchar",
            ) => ValueKind::String,
            (
                _,
                "bytea" | "blob" | "longblob" | "mediumblob" | "varbinary" | "binary",
            ) => ValueKind::Bytes,
            (_, "date") => ValueKind::Date,
            (_, "time" | "time without time zone") => ValueKind::Time,
            (_, "timestamp" | "timestamp without time zone" | "datetime") => ValueKind::DateTime,
            (_, "timestamptz" | "timestamp with time zone") => ValueKind::DateTimeOffset,
            (_, "uuid") => ValueKind::Uuid,
            (_, "json" | "jsonb") => ValueKind::Json,
            _ => return None,
        };

        Some(TypeMapping::new(store_type.trim(), kind, self.dialect))
    }
}

fn postgres_store_type(facets: &ColumnFacets) -> String {
    match facets.kind {
        ValueKind::Bool => "boolean".to_string(),
        ValueKind::Int16 => "smallint".to_string(),
        ValueKind::Int32 => "integer".to_string(),
        ValueKind::Int64 => "bigint".to_string(),
        ValueKind::Float32 => "real".to_string(),
        ValueKind::Float64 => "double precision".to_string(),
        ValueKind::Decimal => match (facets.precision, facets.scale) {
            (Some(p), Some(s)) => format!("numeric({},{})", p, s),
            (Some(p), None) => format!("numeric({})", p),
            _ => "numeric".to_string(),
        },
        ValueKind::String => match (facets.max_length, facets.is_fixed_length) {
            (Some(n), Some(true)) => format!("character({})", n),
            (Some(n), _) => format!("character varying({})", n),
            (None, _) => "text".to_string(),
        },
        ValueKind::Bytes => "bytea".to_string(),
        ValueKind::Date => "date".to_string(),
        ValueKind::Time => "time without time zone".to_string(),
        ValueKind::DateTime => "timestamp without time zone".to_string(),
        ValueKind::DateTimeOffset => "timestamp with time zone".to_string(),
        ValueKind::Uuid => "uuid".to_string(),
        ValueKind::Json => "jsonb".to_string(),
    }
}

fn sqlite_store_type(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Bool | ValueKind::Int16 | ValueKind::Int32 | ValueKind::Int64 => "INTEGER",
        ValueKind::Float32 | ValueKind::Float64 => "REAL",
        ValueKind::Bytes => "BLOB",
        ValueKind::Decimal
        | ValueKind::String
        | ValueKind::Date
        | ValueKind::Time
        | ValueKind::DateTime
        | ValueKind::DateTimeOffset
        | ValueKind::Uuid
        | ValueKind::Json => "TEXT",
    }
}

fn mysql_store_type(facets: &ColumnFacets) -> String {
    match facets.kind {
        ValueKind::Bool => "tinyint(1)".to_string(),
        ValueKind::Int16 => "smallint".to_string(),
        ValueKind::Int32 => "int".to_string(),
        ValueKind::Int64 => "bigint".to_string(),
        ValueKind::Float32 => "float".to_string(),
        ValueKind::Float64 => "double".to_string(),
        ValueKind::Decimal => match (facets.precision, facets.scale) {
            (Some(p), Some(s)) => format!("decimal({},{})", p, s),
            (Some(p), None) => format!("decimal({})", p),
            _ => "decimal(65,30)".to_string(),
        },
        ValueKind::String => match (facets.max_length, facets.is_fixed_length) {
            (Some(n), Some(true)) => format!("char({})", n),
            (Some(n), _) => format!("varchar({})", n),
            (None, _) if facets.key_or_index => "varchar(255)".to_string(),
            (None, _) => "longtext".to_string(),
        },
        ValueKind::Bytes => match facets.max_length {
            Some(n) => format!("varbinary({})", n),
            None if facets.key_or_index => "varbinary(255)".to_string(),
            None => "longblob".to_string(),
        },
        ValueKind::Date => "date".to_string(),
        ValueKind::Time => "time(6)".to_string(),
        ValueKind::DateTime | ValueKind::DateTimeOffset => "datetime(6)".to_string(),
        ValueKind::Uuid => "char(36)".to_string(),
        ValueKind::Json => "json".to_string(),
    }
}

fn float_literal(v: f64, dialect: Dialect) -> String {
    if v.is_finite() {
        let text = format!("{:?}", v);
        // `{:?}` keeps the fractional part (`1.0`), so the literal stays a float.
        text.replace("e", "E")
    } else {
        dialect.string_literal(&v.to_string())
    }
}

fn typed_literal(dialect: Dialect, keyword: &str, text: &str) -> String {
    match dialect {
        Dialect::Postgres => format!("{} {}", keyword, dialect.string_literal(text)),
        Dialect::Sqlite | Dialect::Mysql => dialect.string_literal(text),
    }
}

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// Days since 1970-01-01 to a proleptic Gregorian `YYYY-MM-DD`.
fn format_date(days: i64) -> String {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    format!("{:04}-{:02}-{:02}", year, month, day)
}

fn format_time(micros: i64) -> String {
    let micros = micros.rem_euclid(MICROS_PER_DAY);
    let secs = micros / MICROS_PER_SECOND;
    let frac = micros % MICROS_PER_SECOND;
    let base = format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    if frac == 0 {
        base
    } else {
        format!("{}.{:06}", base, frac)
    }
}

fn format_timestamp(micros: i64) -> String {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let rem = micros.rem_euclid(MICROS_PER_DAY);
    format!("{} {}", format_date(days), format_time(rem))
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

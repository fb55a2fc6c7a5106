//! Core types and traits for Strata.
//!
//! This crate provides the foundations shared by the update pipeline and the
//! migrations engine:
//!
//! - `Value`, `Row` and `ResultSet` for data flowing to and from the database
//! - `Dialect` for identifier delimiting, literals and parameter placeholders
//! - `TypeMappingSource` for in-memory kind to store type resolution
//! - `Executor`, `Connection` and `TransactionOps` for database access
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod dialect;
pub mod error;
pub mod row;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod type_mapping;
pub mod value;

pub use connection::{Connection, Executor, IsolationLevel, TransactionOps};
pub use dialect::{Dialect, quote_ident, quote_ident_mysql};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, EntryDescriptor, Error, QueryError,
    QueryErrorKind, Result, SchemaError, SchemaErrorKind, TransactionError, TypeError,
    UpdateError, UpdateErrorKind,
};
pub use row::{ColumnInfo, FromValue, ResultSet, Row};
pub use type_mapping::{
    ColumnFacets, DialectTypeMappingSource, TypeMapping, TypeMappingSource, ValueKind,
};
pub use value::Value;

/// Unwrap an `Outcome`, returning early from the enclosing async function on
/// any non-`Ok` arm.
///
/// Errors are passed through `From`, so an `Outcome<T, E>` can be unwrapped
/// inside a function returning `Outcome<U, Error>` whenever `Error: From<E>`.
#[macro_export]
macro_rules! try_outcome {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(::core::convert::From::from(e)),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

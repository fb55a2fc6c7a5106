//! Error types for Strata operations.

use crate::value::Value;
use std::fmt;

/// The primary error type for all Strata operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, missing database, disconnect)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Schema/migration errors
    Schema(SchemaError),
    /// Errors raised while saving tracked changes
    Update(UpdateError),
    /// Configuration errors
    Config(ConfigError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// The target database does not exist
    DatabaseNotFound,
    /// Connection lost during operation
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// Nested transaction not supported
    NestedNotSupported,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Invalid operation or model definition (contract violation)
    Invalid,
    /// An operation needs a target model that was not supplied
    MissingModel,
    /// The generator has no SQL rendering for this operation kind
    UnsupportedOperation,
    /// The generator does not recognise the operation at all
    UnknownOperation,
    /// Migration error (bad identifiers, unknown targets)
    Migration,
}

/// Describes one tracked entry implicated in an [`UpdateError`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDescriptor {
    /// Position of the entry in the list handed to the update pipeline.
    pub ordinal: usize,
    /// Display name of the entity type.
    pub entity_type: String,
    /// Table the entry maps to.
    pub table: String,
    /// Key values of the entry (current, or original when deleted).
    pub key: Vec<Value>,
}

#[derive(Debug)]
pub struct UpdateError {
    pub kind: UpdateErrorKind,
    pub message: String,
    pub entries: Vec<EntryDescriptor>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateErrorKind {
    /// Affected row count diverged from the expected count
    Concurrency,
    /// Entries mapped to one row disagree on a shared column
    DataConflict,
    /// The database failed while executing a batch
    Store,
    /// An entry or command is in a state that cannot be saved
    InvalidState,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Does this error mean the database itself does not exist yet?
    ///
    /// Recognises the PostgreSQL `3D000` SQLSTATE, the MySQL `1049` error code
    /// (reported as SQLSTATE `42000` with the code in the message) and the
    /// driver-agnostic [`ConnectionErrorKind::DatabaseNotFound`].
    pub fn is_database_missing(&self) -> bool {
        match self {
            Error::Connection(c) => c.kind == ConnectionErrorKind::DatabaseNotFound,
            Error::Query(q) => {
                q.sqlstate.as_deref() == Some("3D000")
                    || q.message.contains("1049")
                    || q.message.contains("Unknown database")
            }
            _ => false,
        }
    }

    /// Is this an optimistic concurrency failure from the update pipeline?
    pub fn is_concurrency_failure(&self) -> bool {
        matches!(self, Error::Update(u) if u.kind == UpdateErrorKind::Concurrency)
    }

    /// Entries implicated by an update error (empty for other errors).
    pub fn entries(&self) -> &[EntryDescriptor] {
        match self {
            Error::Update(u) => &u.entries,
            _ => &[],
        }
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for an [`Error::Schema`] without a source.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for an [`Error::Config`] without a source.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }
}

impl UpdateError {
    /// Build an update error with no source.
    pub fn new(
        kind: UpdateErrorKind,
        message: impl Into<String>,
        entries: Vec<EntryDescriptor>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            entries,
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Update(e) => write!(f, "Update error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Schema(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Update(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<UpdateError> for Error {
    fn from(err: UpdateError) -> Self {
        Error::Update(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, Error>;

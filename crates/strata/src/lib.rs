//! Strata - relational migrations and change persistence for Rust.
//!
//! Strata provides two engines over a shared set of core types:
//!
//! - **Migrations**: describe schema changes as [`MigrationOperation`]s, render
//!   them to SQL for Postgres, SQLite or MySQL, record applied migrations in a
//!   history table and move a database between migrations
//! - **Saving changes**: turn tracked entity changes into batched
//!   INSERT/UPDATE/DELETE commands, propagate store-generated values back and
//!   detect optimistic concurrency failures
//!
//! # Quick Start
//!
//! ```ignore
//! use strata::prelude::*;
//!
//! async fn upgrade(cx: &Cx, conn: &impl Connection) -> Outcome<(), Error> {
//!     let blogs = CreateTableOperation::new("Blogs")
//!         .column(ColumnDefinition::new("Id", ValueKind::Int32).identity())
//!         .column(ColumnDefinition::new("Name", ValueKind::String).nullable())
//!         .primary_key("PK_Blogs", &["Id"]);
//!
//!     let migrator = match Migrator::new(conn.dialect()).with_migration(
//!         Migration::new("20240101000000_CreateBlogs")
//!             .up(vec![MigrationOperation::CreateTable(blogs)]),
//!     ) {
//!         Ok(migrator) => migrator,
//!         Err(e) => return Outcome::Err(e),
//!     };
//!     migrator.migrate(cx, conn, None).await
//! }
//! ```
//!
//! # Synchronous callers
//!
//! Every database round-trip is async and returns an [`Outcome`]. Code without
//! a runtime drives it on a current-thread asupersync runtime:
//!
//! ```ignore
//! let rt = asupersync::runtime::RuntimeBuilder::current_thread().build()?;
//! let cx = Cx::for_testing();
//! let outcome = rt.block_on(async { migrator.migrate(&cx, &conn, None).await });
//! ```
//!
//! Script generation and model diffing need no connection and are plain
//! synchronous functions returning [`Result`].

pub use strata_core;
pub use strata_schema;
pub use strata_update;

pub use strata_core::{
    Connection, Cx, Dialect, Error, Executor, IsolationLevel, Outcome, Result, ResultSet, Row,
    TransactionOps, Value, ValueKind, try_outcome,
};

pub use strata_update::{
    BatchExecutor, BatchPreparer, ColumnModification, EntityMapping, EntityState,
    ModificationCommand, PropertyMapping, UpdateEntry, UpdateOptions, UpdateSqlGenerator,
    update_generator_for_dialect,
};

pub use strata_schema::{
    ColumnDefinition, CreateTableOperation, HistoryRepository, HistoryRepositoryOptions,
    HistoryRow, INITIAL_TARGET, Migration, MigrationCommand, MigrationOperation,
    MigrationsSqlGenerationOptions, MigrationsSqlGenerator, Migrator, ModelDiffer,
    RelationalModel, generator_for_dialect,
};

/// Scripted connections for tests.
#[cfg(feature = "testing")]
pub use strata_core::testing;

/// Commonly used types.
///
/// ```ignore
/// use strata::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Core
        Connection,
        Cx,
        Dialect,
        Error,
        Executor,
        Outcome,
        Result,
        Row,
        Value,
        ValueKind,
        // Saving changes
        BatchExecutor,
        BatchPreparer,
        EntityMapping,
        EntityState,
        PropertyMapping,
        UpdateEntry,
        UpdateOptions,
        // Migrations
        ColumnDefinition,
        CreateTableOperation,
        Migration,
        MigrationOperation,
        MigrationsSqlGenerationOptions,
        Migrator,
        ModelDiffer,
        RelationalModel,
    };
}

//! Migrations for Strata.
//!
//! `strata-schema` turns schema changes into SQL and applies them:
//!
//! - [`MigrationOperation`] describes one schema change
//! - [`ModelDiffer`] computes the operations between two [`RelationalModel`]s
//! - [`MigrationsSqlGenerator`] renders operations as [`MigrationCommand`]s
//!   for one dialect
//! - [`HistoryRepository`] manages the ledger of applied migrations
//! - [`Migrator`] applies, reverts and scripts migrations
//!
//! # Example
//!
//! ```rust,ignore
//! let blogs = CreateTableOperation::new("Blogs")
//!     .column(ColumnDefinition::new("Id", ValueKind::Int32).identity())
//!     .column(ColumnDefinition::new("Name", ValueKind::String).nullable())
//!     .primary_key("PK_Blogs", &["Id"]);
//!
//! let migrator = Migrator::new(Dialect::Postgres).with_migration(
//!     Migration::new("20240101000000_CreateBlogs")
//!         .up(vec![MigrationOperation::CreateTable(blogs)]),
//! )?;
//! migrator.migrate(&cx, &conn, None).await;
//! ```

pub mod command;
pub mod differ;
pub mod generator;
pub mod history;
pub mod migrator;
pub mod model;
pub mod operations;

pub use command::{MIGRATIONS_LOG_TARGET, MigrationCommand, MigrationCommandListBuilder};
pub use differ::ModelDiffer;
pub use generator::{
    GenerationContext, MigrationsSqlGenerationOptions, MigrationsSqlGenerator,
    MysqlMigrationsSqlGenerator, PostgresMigrationsSqlGenerator, SqliteMigrationsSqlGenerator,
    generator_for_dialect,
};
pub use history::{HistoryRepository, HistoryRepositoryOptions, HistoryRow};
pub use migrator::{INITIAL_TARGET, Migration, Migrator};
pub use model::{
    CheckConstraint, ForeignKey, Index, PrimaryKey, RelationalModel, Sequence, Table,
    UniqueConstraint,
};
pub use operations::{
    AddCheckConstraintOperation, AddColumnOperation, AddForeignKeyOperation,
    AddPrimaryKeyOperation, AddUniqueConstraintOperation, AlterColumnOperation,
    AlterSequenceOperation, Annotations, CONCURRENT_INDEX_ANNOTATION, ColumnDefinition,
    CreateIndexOperation, CreateSequenceOperation, CreateTableOperation, DeleteDataOperation,
    DropColumnOperation, DropConstraintOperation, DropIndexOperation, DropSequenceOperation,
    DropTableOperation, ExtensionOperation, IDENTITY_ANNOTATION, InsertDataOperation,
    MigrationOperation, ReferentialAction, RenameColumnOperation, RenameIndexOperation,
    RenameSequenceOperation, RenameTableOperation, RestartSequenceOperation, SchemaOperation,
    SequenceOptions, SqlOperation, UpdateDataOperation,
};

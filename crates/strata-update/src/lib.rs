//! The Strata update pipeline.
//!
//! `strata-update` persists tracked entity changes:
//!
//! - [`UpdateEntry`] describes one tracked entity instance and its mapping
//! - [`ModificationCommand`] aggregates the entries mapped to one row and
//!   derives its [`ColumnModification`]s
//! - [`UpdateSqlGenerator`] renders commands as INSERT/UPDATE/DELETE SQL and
//!   reports each command's [`ResultSetMapping`]
//! - [`ModificationCommandBatch`] executes many commands in one round-trip
//!   and consumes the result stream
//! - [`BatchPreparer`] and [`BatchExecutor`] turn a list of entries into
//!   ordered batches and run them, transactionally when needed
//!
//! # Example
//!
//! ```rust,ignore
//! let executor = BatchExecutor::new(BatchPreparer::for_dialect(
//!     Dialect::Postgres,
//!     UpdateOptions::default(),
//! )?);
//! let outcome = executor.save_changes(&cx, &conn, &mut entries).await;
//! ```

pub mod batch;
pub mod column;
pub mod command;
pub mod entry;
pub mod executor;
pub mod preparer;
pub mod result_set;
pub mod sql;

pub use batch::ModificationCommandBatch;
pub use column::{ColumnFlags, ColumnModification, ParameterNameGenerator};
pub use command::{CommandView, EntryComparer, ModificationCommand};
pub use entry::{
    EntityMapping, EntityState, PropertyMapping, SaveBehavior, UpdateEntry, ValueGenerated,
};
pub use executor::BatchExecutor;
pub use preparer::{BatchPreparer, PreparedCommands, SavePlan};
pub use result_set::{ResultSetMapping, ResultStream};
pub use sql::{
    CommandRendering, ParameterBuffer, ReturningUpdateSqlGenerator, SelectAfterUpdateSqlGenerator,
    UpdateSqlGenerator, update_generator_for_dialect,
};

use serde::{Deserialize, Serialize};
use strata_core::{Error, Result};

/// Options for saving changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    /// Maximum number of commands rendered into one batch.
    pub max_batch_size: usize,
    /// Include key and property values in logs and error messages.
    pub sensitive_logging: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 42,
            sensitive_logging: false,
        }
    }
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    #[must_use]
    pub fn with_sensitive_logging(mut self, enabled: bool) -> Self {
        self.sensitive_logging = enabled;
        self
    }

    /// Reject options no batch can honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::config("max_batch_size must be at least 1"));
        }
        Ok(())
    }
}

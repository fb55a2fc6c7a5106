//! Saving a list of tracked entries.

use crate::batch::ModificationCommandBatch;
use crate::entry::UpdateEntry;
use crate::preparer::{BatchPreparer, SavePlan};
use asupersync::{Cx, Outcome};
use strata_core::{Connection, Error, Executor, TransactionOps};

/// Executes the batches a [`BatchPreparer`] produces.
///
/// Runs in a transaction whenever more than one batch executes or a batch
/// needs one for its read-back statements; the transaction commits only if
/// every batch succeeds.
#[derive(Debug)]
pub struct BatchExecutor {
    preparer: BatchPreparer,
}

impl BatchExecutor {
    pub fn new(preparer: BatchPreparer) -> Self {
        Self { preparer }
    }

    pub fn preparer(&self) -> &BatchPreparer {
        &self.preparer
    }

    /// Persist `entries`, replacing each with its saved form.
    ///
    /// Added and modified entries become unchanged with their generated
    /// values applied; deleted entries become detached. If the save does not
    /// complete, `entries` are left as they were passed in.
    #[tracing::instrument(level = "info", skip(self, cx, conn, entries), fields(entries = entries.len()))]
    pub async fn save_changes<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        entries: &mut [UpdateEntry],
    ) -> Outcome<(), Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }

        let SavePlan {
            mut batches,
            unchanged,
        } = match self.preparer.prepare(entries.to_vec()) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };

        let use_transaction =
            batches.len() > 1 || batches.iter().any(ModificationCommandBatch::requires_transaction);
        let start = std::time::Instant::now();
        tracing::info!(
            batches = batches.len(),
            commands = batches.iter().map(ModificationCommandBatch::len).sum::<usize>(),
            transaction = use_transaction,
            "Saving changes"
        );

        if use_transaction {
            let tx = match conn.begin(cx).await {
                Outcome::Ok(tx) => tx,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match Self::execute_batches(cx, &tx, &mut batches).await {
                Outcome::Ok(()) => match tx.commit(cx).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                },
                Outcome::Err(e) => {
                    rollback(cx, tx).await;
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => {
                    rollback(cx, tx).await;
                    return Outcome::Cancelled(r);
                }
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        } else {
            match Self::execute_batches(cx, conn, &mut batches).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let mut saved: Vec<UpdateEntry> = batches
            .into_iter()
            .flat_map(ModificationCommandBatch::into_commands)
            .flat_map(|command| command.into_entries())
            .collect();
        saved.iter_mut().for_each(UpdateEntry::accept_changes);
        let written = saved.len();
        saved.extend(unchanged);
        saved.sort_by_key(UpdateEntry::ordinal);

        for (slot, entry) in entries.iter_mut().zip(saved) {
            *slot = entry;
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            written,
            "Changes saved"
        );
        Outcome::Ok(())
    }

    async fn execute_batches<E: Executor>(
        cx: &Cx,
        conn: &E,
        batches: &mut [ModificationCommandBatch],
    ) -> Outcome<(), Error> {
        for batch in batches.iter_mut() {
            match batch.execute(cx, conn).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(())
    }
}

async fn rollback<T: TransactionOps>(cx: &Cx, tx: T) {
    match tx.rollback(cx).await {
        Outcome::Ok(()) => tracing::debug!("Rolled back failed save"),
        Outcome::Err(e) => tracing::warn!(error = %e, "Rollback after failed save did not succeed"),
        Outcome::Cancelled(_) | Outcome::Panicked(_) => {
            tracing::warn!("Rollback after failed save did not complete");
        }
    }
}

//! Executable migration commands and the builder that accumulates them.

use asupersync::{Cx, Outcome};
use strata_core::{Dialect, Error, Executor};

/// Log target migration commands report their execution under.
pub const MIGRATIONS_LOG_TARGET: &str = "strata::migrations";

/// One unit of generated migration SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationCommand {
    command_text: String,
    transaction_suppressed: bool,
}

impl MigrationCommand {
    pub fn new(command_text: impl Into<String>, transaction_suppressed: bool) -> Self {
        Self {
            command_text: command_text.into(),
            transaction_suppressed,
        }
    }

    pub fn command_text(&self) -> &str {
        &self.command_text
    }

    /// Must this command run outside the migration transaction?
    pub fn transaction_suppressed(&self) -> bool {
        self.transaction_suppressed
    }

    /// Execute the command and return the rows affected.
    #[tracing::instrument(
        level = "debug",
        target = "strata::migrations",
        skip(self, cx, conn),
        fields(suppressed = self.transaction_suppressed)
    )]
    pub async fn execute<E: Executor>(&self, cx: &Cx, conn: &E) -> Outcome<u64, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        tracing::trace!(target: MIGRATIONS_LOG_TARGET, sql = %self.command_text, "Executing migration command");
        let start = std::time::Instant::now();
        let outcome = conn.execute(cx, &self.command_text, &[]).await;
        if let Outcome::Err(e) = &outcome {
            tracing::warn!(target: MIGRATIONS_LOG_TARGET, error = %e, "Migration command failed");
        } else {
            tracing::debug!(
                target: MIGRATIONS_LOG_TARGET,
                elapsed_ms = start.elapsed().as_millis(),
                "Executed migration command"
            );
        }
        outcome
    }
}

/// Accumulates SQL text and cuts it into [`MigrationCommand`]s.
///
/// # Example
///
/// ```ignore
/// let mut builder = MigrationCommandListBuilder::new(Dialect::Postgres);
/// builder.append("DROP TABLE \"Blogs\"");
/// builder.end_statement(false);
/// let commands = builder.build();
/// ```
#[derive(Debug)]
pub struct MigrationCommandListBuilder {
    dialect: Dialect,
    commands: Vec<MigrationCommand>,
    text: String,
}

impl MigrationCommandListBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            commands: Vec::new(),
            text: String::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn append(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self
    }

    pub fn append_line(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self.text.push('\n');
        self
    }

    /// Append a whole statement, terminated, without ending the command.
    pub fn append_statement(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self.text.push_str(self.dialect.statement_terminator());
        self.text.push('\n');
        self
    }

    /// Terminate the current statement and end the command.
    pub fn end_statement(&mut self, suppress_transaction: bool) -> &mut Self {
        self.text.push_str(self.dialect.statement_terminator());
        self.text.push('\n');
        self.end_command(suppress_transaction)
    }

    /// Cut the accumulated text into a command. Does nothing if no text is pending.
    pub fn end_command(&mut self, suppress_transaction: bool) -> &mut Self {
        if !self.text.trim().is_empty() {
            let text = std::mem::take(&mut self.text);
            self.commands.push(MigrationCommand::new(text, suppress_transaction));
        }
        self.text.clear();
        self
    }

    /// Text appended since the last command ended.
    pub fn pending_text(&self) -> &str {
        &self.text
    }

    /// Number of commands ended so far.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.text.trim().is_empty()
    }

    /// Finish, ending any pending command inside the transaction.
    pub fn build(mut self) -> Vec<MigrationCommand> {
        self.end_command(false);
        self.commands
    }
}

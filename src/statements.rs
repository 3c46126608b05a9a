//! Pre-compiled transaction control statements.

use sqlite_conn::Backend;
use sqlite_session::Sessions;
use tracing::trace;

use crate::{DatabaseConfig, Result, TransactionKind};

/// One of the five statements that drive the transaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlStatement {
   DeferredBegin,
   ImmediateBegin,
   ExclusiveBegin,
   Commit,
   Rollback,
}

impl ControlStatement {
   const ALL: [ControlStatement; 5] = [
      ControlStatement::DeferredBegin,
      ControlStatement::ImmediateBegin,
      ControlStatement::ExclusiveBegin,
      ControlStatement::Commit,
      ControlStatement::Rollback,
   ];

   fn sql(self) -> &'static str {
      match self {
         ControlStatement::DeferredBegin => "BEGIN DEFERRED",
         ControlStatement::ImmediateBegin => "BEGIN IMMEDIATE",
         ControlStatement::ExclusiveBegin => "BEGIN EXCLUSIVE",
         ControlStatement::Commit => "COMMIT",
         ControlStatement::Rollback => "ROLLBACK",
      }
   }
}

/// The control statements of one open connection, plus its session engine.
///
/// The statements are compiled into the connection's statement cache when the
/// set is built and taken from it on every run. The set lives exactly as long
/// as the connection is open and is dropped before the [`Backend`] closes.
#[derive(Debug)]
pub(crate) struct TransactionStatements {
   sessions: Sessions,
}

impl TransactionStatements {
   pub(crate) fn new(backend: &Backend, config: &DatabaseConfig) -> Result<Self> {
      for statement in ControlStatement::ALL {
         backend.prepare_cached(statement.sql())?;
      }

      let mut sessions = Sessions::new(backend, &config.database_name, &config.session_table)?;
      sessions.set_attached_tables(config.attached_tables.iter().cloned())?;

      Ok(Self { sessions })
   }

   fn run(&self, backend: &Backend, statement: ControlStatement) -> Result<()> {
      trace!(sql = statement.sql(), "Control statement");
      backend.execute_cached(statement.sql(), &[])?;
      Ok(())
   }

   pub(crate) fn begin(&self, backend: &Backend, kind: TransactionKind) -> Result<()> {
      let statement = match kind {
         TransactionKind::Deferred => ControlStatement::DeferredBegin,
         TransactionKind::Immediate => ControlStatement::ImmediateBegin,
         TransactionKind::Exclusive => ControlStatement::ExclusiveBegin,
      };
      self.run(backend, statement)
   }

   pub(crate) fn commit(&self, backend: &Backend) -> Result<()> {
      self.run(backend, ControlStatement::Commit)
   }

   pub(crate) fn rollback(&self, backend: &Backend) -> Result<()> {
      self.run(backend, ControlStatement::Rollback)
   }

   pub(crate) fn sessions(&self) -> &Sessions {
      &self.sessions
   }

   pub(crate) fn sessions_mut(&mut self) -> &mut Sessions {
      &mut self.sessions
   }
}

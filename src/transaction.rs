//! Transaction states and scoped transaction guards.

use std::fmt;

use sqlite_session::SessionChangeSet;
use tracing::warn;

use crate::{Connection, Result};

/// The transaction currently open on a connection.
///
/// ```text
///   None ──deferred_begin──▶ Deferred  ──┐
///   None ──immediate_begin─▶ Immediate ──┼──commit / rollback──▶ None
///   None ──exclusive_begin─▶ Exclusive ──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionState {
   #[default]
   None,
   Deferred,
   Immediate,
   Exclusive,
}

impl TransactionState {
   pub fn is_active(self) -> bool {
      self != TransactionState::None
   }
}

impl fmt::Display for TransactionState {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         TransactionState::None => "none",
         TransactionState::Deferred => "deferred",
         TransactionState::Immediate => "immediate",
         TransactionState::Exclusive => "exclusive",
      })
   }
}

/// Lock-acquisition strategy for a new transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
   /// No lock until the first read or write
   Deferred,
   /// Write lock taken immediately
   Immediate,
   /// Write lock taken immediately and readers blocked (outside WAL mode)
   Exclusive,
}

impl From<TransactionKind> for TransactionState {
   fn from(kind: TransactionKind) -> Self {
      match kind {
         TransactionKind::Deferred => TransactionState::Deferred,
         TransactionKind::Immediate => TransactionState::Immediate,
         TransactionKind::Exclusive => TransactionState::Exclusive,
      }
   }
}

/// An open transaction that rolls back unless explicitly committed.
///
/// Obtained from [`Connection::transaction`]. While it is alive the connection
/// can only be reached through it, so no second transaction can begin.
#[must_use = "if unused, the transaction is immediately rolled back"]
pub struct Transaction<'a> {
   connection: &'a mut Connection,
}

impl<'a> Transaction<'a> {
   pub(crate) fn new(connection: &'a mut Connection) -> Self {
      Self { connection }
   }

   pub fn state(&self) -> TransactionState {
      self.connection.transaction_state()
   }

   /// Runs `sql` inside this transaction.
   pub fn execute(&mut self, sql: &str) -> Result<()> {
      self.connection.execute(sql)
   }

   /// Read access to the connection, e.g. for row ids or change counts.
   pub fn connection(&self) -> &Connection {
      &*self.connection
   }

   /// Commits the transaction.
   ///
   /// The guard is consumed either way, so a failed COMMIT (a busy engine)
   /// is followed by a rollback before the error is returned.
   pub fn commit(self) -> Result<()> {
      let result = self.connection.commit();
      if result.is_err() {
         roll_back_after_failed_commit(self.connection);
      }
      result
   }

   pub fn rollback(self) -> Result<()> {
      self.connection.rollback()
   }
}

impl Drop for Transaction<'_> {
   fn drop(&mut self) {
      if self.connection.transaction_state().is_active()
         && let Err(e) = self.connection.rollback()
      {
         warn!(error = %e, "Failed to roll back dropped transaction");
      }
   }
}

/// An immediate transaction with an active recording session.
///
/// Obtained from [`Connection::session_transaction`]. Dropping it without
/// committing rolls back both the data changes and the recording.
#[must_use = "if unused, the transaction is immediately rolled back"]
pub struct SessionTransaction<'a> {
   connection: &'a mut Connection,
}

impl<'a> SessionTransaction<'a> {
   pub(crate) fn new(connection: &'a mut Connection) -> Self {
      Self { connection }
   }

   /// Runs `sql` inside this transaction; changes to attached tables are recorded.
   pub fn execute(&mut self, sql: &str) -> Result<()> {
      self.connection.execute(sql)
   }

   pub fn connection(&self) -> &Connection {
      &*self.connection
   }

   /// Commits the recording and the transaction, returning the change set
   /// when anything was recorded.
   ///
   /// A failed COMMIT is followed by a rollback of the data changes and the
   /// recording. A recording failure after a successful COMMIT rolls nothing
   /// back and is returned as the error.
   pub fn commit(self) -> Result<Option<SessionChangeSet>> {
      let result = self.connection.session_commit();
      if result.is_err() {
         roll_back_after_failed_commit(self.connection);
      }
      result
   }

   pub fn rollback(self) -> Result<()> {
      self.connection.session_rollback()
   }
}

impl Drop for SessionTransaction<'_> {
   fn drop(&mut self) {
      if self.connection.transaction_state().is_active()
         && let Err(e) = self.connection.session_rollback()
      {
         warn!(error = %e, "Failed to roll back dropped session transaction");
      }
   }
}

fn roll_back_after_failed_commit(connection: &mut Connection) {
   if connection.transaction_state().is_active()
      && let Err(e) = connection.rollback()
   {
      warn!(error = %e, "Failed to roll back after a failed commit");
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_state_from_kind() {
      assert_eq!(
         TransactionState::from(TransactionKind::Deferred),
         TransactionState::Deferred
      );
      assert_eq!(
         TransactionState::from(TransactionKind::Immediate),
         TransactionState::Immediate
      );
      assert_eq!(
         TransactionState::from(TransactionKind::Exclusive),
         TransactionState::Exclusive
      );
   }

   #[test]
   fn test_only_none_is_inactive() {
      assert!(!TransactionState::None.is_active());
      assert!(TransactionState::Deferred.is_active());
      assert!(TransactionState::Immediate.is_active());
      assert!(TransactionState::Exclusive.is_active());
      assert_eq!(TransactionState::default(), TransactionState::None);
   }
}

//! The database façade: one connection, its transaction state and its session engine.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use sqlite_conn::{Backend, BusyPolicy, JournalMode, LockingMode, OpenMode};
use sqlite_session::{SessionChangeSet, SessionChangeSets, Sessions};
use tracing::{debug, warn};

use crate::statements::TransactionStatements;
use crate::{
   DatabaseConfig, Error, LogicError, Result, SessionTransaction, Transaction, TransactionKind,
   TransactionState,
};

/// A SQLite database that can be shared across threads.
///
/// Holds at most one native connection. Multi-step sequences (open, begin, ...,
/// commit) must run under a single [`lock`](Self::lock) because the transaction
/// state spans calls.
///
/// # Example
///
/// ```no_run
/// use sqlite_database::{Database, DatabaseConfig, LockingMode};
///
/// # fn example() -> sqlite_database::Result<()> {
/// let db = Database::new(DatabaseConfig {
///    attached_tables: vec!["notes".to_string()],
///    ..Default::default()
/// });
///
/// let mut conn = db.lock();
/// conn.open("notes.db", LockingMode::Default)?;
/// conn.execute("CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT)")?;
///
/// conn.immediate_session_begin()?;
/// conn.execute("INSERT INTO notes (body) VALUES ('hello')")?;
/// conn.session_commit()?;
///
/// for change_set in conn.change_sets() {
///    println!("{} bytes recorded", change_set.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Database {
   connection: Mutex<Connection>,
}

impl Database {
   /// Creates a closed database with no path.
   pub fn new(config: DatabaseConfig) -> Self {
      Self {
         connection: Mutex::new(Connection::new(None, config)),
      }
   }

   /// Creates a closed database that [`reopen`](Connection::reopen) will open at `path`.
   pub fn with_path(path: impl Into<PathBuf>, config: DatabaseConfig) -> Self {
      Self {
         connection: Mutex::new(Connection::new(Some(path.into()), config)),
      }
   }

   /// Creates a database and opens it at `path` with the default locking mode.
   pub fn open_with(path: impl Into<PathBuf>, config: DatabaseConfig) -> Result<Self> {
      let db = Self::with_path(path, config);
      db.lock().reopen(LockingMode::Default)?;
      Ok(db)
   }

   /// Blocks until the connection is free, then holds it until the guard drops.
   pub fn lock(&self) -> DatabaseGuard<'_> {
      DatabaseGuard(self.connection.lock())
   }

   pub fn try_lock(&self) -> Option<DatabaseGuard<'_>> {
      self.connection.try_lock().map(DatabaseGuard)
   }

   pub fn try_lock_for(&self, timeout: Duration) -> Option<DatabaseGuard<'_>> {
      self.connection.try_lock_for(timeout).map(DatabaseGuard)
   }
}

impl std::fmt::Debug for Database {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Database").finish_non_exhaustive()
   }
}

/// Exclusive access to a [`Database`]'s connection; released on drop.
pub struct DatabaseGuard<'a>(MutexGuard<'a, Connection>);

impl Deref for DatabaseGuard<'_> {
   type Target = Connection;

   fn deref(&self) -> &Connection {
      &self.0
   }
}

impl DerefMut for DatabaseGuard<'_> {
   fn deref_mut(&mut self) -> &mut Connection {
      &mut self.0
   }
}

/// One database connection and everything that lives as long as it is open.
///
/// The connection survives open/close cycles; the control statements and the
/// session engine are rebuilt on every open.
pub struct Connection {
   config: DatabaseConfig,
   path: Option<PathBuf>,
   locking_mode: LockingMode,
   initialized: bool,
   state: TransactionState,
   // Must be dropped before `backend` closes
   statements: Option<TransactionStatements>,
   backend: Option<Backend>,
}

impl Connection {
   fn new(path: Option<PathBuf>, config: DatabaseConfig) -> Self {
      Self {
         config,
         path,
         locking_mode: LockingMode::Default,
         initialized: false,
         state: TransactionState::None,
         statements: None,
         backend: None,
      }
   }

   // ─── Lifecycle ───────────────────────────────────────────────────────────

   /// Opens the database file at `path`.
   pub fn open(&mut self, path: impl AsRef<Path>, locking_mode: LockingMode) -> Result<()> {
      if self.is_open() {
         return Err(LogicError::AlreadyOpen.into());
      }

      let path = path.as_ref();
      let existed = path.exists();
      let backend = Backend::open(path, &self.config.open_options(locking_mode))?;
      // On failure `backend` drops here and closes
      let statements = TransactionStatements::new(&backend, &self.config)?;

      self.path = Some(path.to_path_buf());
      self.locking_mode = locking_mode;
      self.initialized = existed;
      self.state = TransactionState::None;
      self.statements = Some(statements);
      self.backend = Some(backend);

      debug!(path = %path.display(), initialized = existed, "Database open");
      Ok(())
   }

   /// Opens the database again at the path it was last opened with (or constructed with).
   pub fn reopen(&mut self, locking_mode: LockingMode) -> Result<()> {
      let path = self.path.clone().ok_or_else(|| sqlite_conn::Error::Open {
         path: String::new(),
         code: sqlite_conn::ffi::SQLITE_CANTOPEN,
         message: "no database path has been set".to_string(),
      })?;
      self.open(path, locking_mode)
   }

   /// Closes the connection. Idempotent and infallible.
   ///
   /// An open transaction is rolled back first; teardown errors are logged.
   pub fn close(&mut self) {
      if !self.is_open() {
         return;
      }

      if self.state.is_active() {
         if let (Some(backend), Some(statements)) = (self.backend.as_ref(), self.statements.as_mut())
         {
            statements.sessions_mut().rollback();
            if let Err(e) = statements.rollback(backend) {
               warn!(error = %e, state = %self.state, "Rollback on close failed");
            }
         }
         self.state = TransactionState::None;
      }

      // The native session goes first; closing the backend flushes the
      // statement cache before it releases the handle
      self.statements = None;
      if let Some(mut backend) = self.backend.take() {
         backend.close();
      }

      debug!(path = ?self.path, "Database closed");
   }

   pub fn is_open(&self) -> bool {
      self.backend.is_some()
   }

   /// Whether the database file already existed when it was last opened.
   pub fn is_initialized(&self) -> bool {
      self.initialized
   }

   pub fn set_initialized(&mut self, initialized: bool) {
      self.initialized = initialized;
   }

   pub fn path(&self) -> Option<&Path> {
      self.path.as_deref()
   }

   pub fn set_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
      self.ensure_closed("path")?;
      self.path = Some(path.into());
      Ok(())
   }

   // ─── Configuration ───────────────────────────────────────────────────────

   pub fn journal_mode(&self) -> JournalMode {
      self.config.journal_mode
   }

   /// Sets the journal mode used by the next open.
   pub fn set_journal_mode(&mut self, mode: JournalMode) -> Result<()> {
      self.ensure_closed("journal mode")?;
      self.config.journal_mode = mode;
      Ok(())
   }

   pub fn open_mode(&self) -> OpenMode {
      self.config.open_mode
   }

   /// Sets the open mode used by the next open.
   pub fn set_open_mode(&mut self, mode: OpenMode) -> Result<()> {
      self.ensure_closed("open mode")?;
      self.config.open_mode = mode;
      Ok(())
   }

   /// Locking mode of the current (or most recent) open.
   pub fn locking_mode(&self) -> LockingMode {
      self.locking_mode
   }

   /// Sets the busy policy used by the next open.
   pub fn set_busy_policy(&mut self, policy: BusyPolicy) -> Result<()> {
      self.ensure_closed("busy policy")?;
      self.config.busy_policy = policy;
      Ok(())
   }

   pub fn config(&self) -> &DatabaseConfig {
      &self.config
   }

   fn ensure_closed(&self, setting: &'static str) -> Result<()> {
      if self.is_open() {
         return Err(LogicError::OpenWhileConfiguring { setting }.into());
      }
      Ok(())
   }

   // ─── Statements ──────────────────────────────────────────────────────────

   /// Runs one or more SQL statements.
   ///
   /// Afterwards the tracked transaction state is checked against the engine,
   /// which ends a transaction on its own after some errors.
   pub fn execute(&mut self, sql: &str) -> Result<()> {
      let result = self.backend()?.execute(sql);
      self.reconcile_transaction_state();
      result.map_err(Error::from)
   }

   fn reconcile_transaction_state(&mut self) {
      if !self.state.is_active() {
         return;
      }
      let (Some(backend), Some(statements)) = (self.backend.as_ref(), self.statements.as_mut())
      else {
         return;
      };

      if let Ok(true) = backend.is_autocommit() {
         warn!(state = %self.state, "Transaction was ended by the engine");
         statements.sessions_mut().rollback();
         self.state = TransactionState::None;
      }
   }

   /// The live backend, for collaborators that prepare their own statements.
   ///
   /// Transactions must still be controlled through this connection.
   pub fn backend(&self) -> Result<&Backend> {
      self.backend.as_ref().ok_or_else(|| LogicError::NotOpen.into())
   }

   fn parts(&mut self) -> Result<(&Backend, &mut TransactionStatements)> {
      match (self.backend.as_ref(), self.statements.as_mut()) {
         (Some(backend), Some(statements)) => Ok((backend, statements)),
         _ => Err(LogicError::NotOpen.into()),
      }
   }

   fn statements(&self) -> Result<&TransactionStatements> {
      self.statements.as_ref().ok_or_else(|| LogicError::NotOpen.into())
   }

   // ─── Transactions ────────────────────────────────────────────────────────

   pub fn transaction_state(&self) -> TransactionState {
      self.state
   }

   pub fn deferred_begin(&mut self) -> Result<()> {
      self.begin(TransactionKind::Deferred)
   }

   pub fn immediate_begin(&mut self) -> Result<()> {
      self.begin(TransactionKind::Immediate)
   }

   pub fn exclusive_begin(&mut self) -> Result<()> {
      self.begin(TransactionKind::Exclusive)
   }

   /// Begins a transaction. A busy engine leaves the state unchanged.
   pub fn begin(&mut self, kind: TransactionKind) -> Result<()> {
      if !self.is_open() {
         return Err(LogicError::NotOpen.into());
      }
      if self.state.is_active() {
         return Err(LogicError::TransactionActive {
            current: self.state,
         }
         .into());
      }

      let (backend, statements) = self.parts()?;
      statements.begin(backend, kind)?;
      self.state = kind.into();
      debug!(state = %self.state, "Transaction begun");
      Ok(())
   }

   /// Commits the open transaction.
   ///
   /// Fails with [`LogicError::SessionRecording`] while a session records;
   /// use [`session_commit`](Self::session_commit) instead.
   pub fn commit(&mut self) -> Result<()> {
      self.ensure_transaction()?;
      if self.is_recording() {
         return Err(LogicError::SessionRecording.into());
      }
      self.commit_transaction()
   }

   /// Rolls back the open transaction, discarding any recording session with it.
   pub fn rollback(&mut self) -> Result<()> {
      self.ensure_transaction()?;
      self.rollback_transaction()
   }

   fn ensure_transaction(&self) -> Result<()> {
      self.statements()?;
      if !self.state.is_active() {
         return Err(LogicError::NoTransaction.into());
      }
      Ok(())
   }

   fn commit_transaction(&mut self) -> Result<()> {
      let (backend, statements) = self.parts()?;
      let result = statements.commit(backend);
      if result.is_ok() {
         // A window finalized inside this transaction is durable now
         statements.sessions_mut().publish();
      }
      self.finish_transaction(result, "committed")
   }

   fn rollback_transaction(&mut self) -> Result<()> {
      let (backend, statements) = self.parts()?;
      statements.sessions_mut().rollback();
      let result = statements.rollback(backend);
      self.finish_transaction(result, "rolled back")
   }

   fn finish_transaction(&mut self, result: Result<()>, outcome: &'static str) -> Result<()> {
      match result {
         Ok(()) => {
            debug!(state = %self.state, "Transaction {}", outcome);
            self.state = TransactionState::None;
            Ok(())
         }
         Err(e) => {
            // A busy COMMIT leaves the transaction open; other failures may not
            self.reconcile_transaction_state();
            Err(e)
         }
      }
   }

   /// Begins a transaction guarded by the returned value.
   pub fn transaction(&mut self, kind: TransactionKind) -> Result<Transaction<'_>> {
      self.begin(kind)?;
      Ok(Transaction::new(self))
   }

   // ─── Sessions ────────────────────────────────────────────────────────────

   fn is_recording(&self) -> bool {
      self
         .statements
         .as_ref()
         .is_some_and(|statements| statements.sessions().is_recording())
   }

   fn ensure_not_recording(&self) -> Result<()> {
      if self.is_recording() {
         return Err(LogicError::SessionRecording.into());
      }
      Ok(())
   }

   /// Begins an immediate transaction and starts recording the attached tables.
   ///
   /// If recording cannot start the transaction stays open and a
   /// [`Error::Session`] is returned.
   pub fn immediate_session_begin(&mut self) -> Result<()> {
      self.immediate_begin()?;
      let (backend, statements) = self.parts()?;
      statements.sessions_mut().create(backend)?;
      Ok(())
   }

   /// Finishes the recording, then commits the transaction.
   ///
   /// The transaction is committed even when finishing the recording fails;
   /// that failure is returned afterwards as [`Error::Session`].
   ///
   /// If COMMIT itself fails (a busy engine) the transaction stays open and
   /// the finished change set stays pending: [`change_sets`](Self::change_sets)
   /// does not report it yet, and calling `session_commit` again retries the
   /// COMMIT and returns the same change set.
   pub fn session_commit(&mut self) -> Result<Option<SessionChangeSet>> {
      self.ensure_transaction()?;
      let recorded = {
         let (backend, statements) = self.parts()?;
         statements.sessions_mut().commit(backend)
      };
      self.commit_transaction()?;
      Ok(recorded?)
   }

   /// Discards the recording, then rolls back the transaction.
   pub fn session_rollback(&mut self) -> Result<()> {
      self.rollback()
   }

   /// Begins an immediate session transaction guarded by the returned value.
   ///
   /// Unlike [`immediate_session_begin`](Self::immediate_session_begin), a
   /// recording failure rolls the transaction back.
   pub fn session_transaction(&mut self) -> Result<SessionTransaction<'_>> {
      if let Err(e) = self.immediate_session_begin() {
         if self.state.is_active()
            && let Err(rollback_error) = self.rollback()
         {
            warn!(error = %rollback_error, "Rollback after failed session begin failed");
         }
         return Err(e);
      }
      Ok(SessionTransaction::new(self))
   }

   pub fn attached_tables(&self) -> &[String] {
      &self.config.attached_tables
   }

   /// Replaces the tables recorded by future session transactions.
   pub fn set_attached_tables<I, S>(&mut self, tables: I) -> Result<()>
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.ensure_not_recording()?;
      let tables: Vec<String> = tables.into_iter().map(Into::into).collect();
      if let Some(statements) = self.statements.as_mut() {
         statements
            .sessions_mut()
            .set_attached_tables(tables.iter().cloned())?;
      }
      self.config.attached_tables = tables;
      Ok(())
   }

   /// Change sets produced by the most recently completed session.
   ///
   /// Empty after a rolled-back session, a session that recorded nothing, or
   /// while the database is closed.
   pub fn change_sets(&self) -> SessionChangeSets {
      self
         .statements
         .as_ref()
         .map(|statements| statements.sessions().change_sets())
         .unwrap_or_default()
   }

   /// Every change set in the store table, newest first.
   pub fn stored_change_sets(&self) -> Result<SessionChangeSets> {
      let backend = self.backend()?;
      Ok(self.statements()?.sessions().stored_change_sets(backend)?)
   }

   /// Replays the stored change sets into this database and replaces them with
   /// one coalesced change set.
   ///
   /// Runs inside its own immediate transaction unless one is already open.
   pub fn apply_and_update_sessions(&mut self) -> Result<()> {
      self.ensure_not_recording()?;
      self.within_transaction(|backend, sessions| sessions.apply_and_update_sessions(backend))
   }

   /// Undoes every stored change set, newest first.
   ///
   /// Runs inside its own immediate transaction unless one is already open.
   pub fn revert_sessions(&mut self) -> Result<()> {
      self.ensure_not_recording()?;
      self.within_transaction(|backend, sessions| sessions.revert(backend))
   }

   /// Replays a change set produced elsewhere into this database.
   pub fn apply_change_set(&mut self, change_set: &SessionChangeSet) -> Result<()> {
      sqlite_session::apply_change_set(self.backend()?, change_set)?;
      Ok(())
   }

   fn within_transaction<T>(
      &mut self,
      f: impl FnOnce(&Backend, &mut Sessions) -> sqlite_session::Result<T>,
   ) -> Result<T> {
      let owned = !self.state.is_active();
      if owned {
         self.immediate_begin()?;
      }

      let result = {
         let (backend, statements) = self.parts()?;
         f(backend, statements.sessions_mut())
      };

      if owned {
         match result {
            Ok(_) => self.commit_transaction()?,
            Err(_) => {
               if let Err(e) = self.rollback_transaction() {
                  warn!(error = %e, "Rollback after failed session replay failed");
               }
            }
         }
      }
      Ok(result?)
   }

   // ─── Utilities ───────────────────────────────────────────────────────────

   pub fn last_inserted_row_id(&self) -> Result<i64> {
      Ok(self.backend()?.last_inserted_row_id()?)
   }

   pub fn changes_count(&self) -> Result<u64> {
      Ok(self.backend()?.changes_count()?)
   }

   pub fn total_changes_count(&self) -> Result<u64> {
      Ok(self.backend()?.total_changes_count()?)
   }

   pub fn wal_checkpoint_full(&self) -> Result<()> {
      Ok(self.backend()?.wal_checkpoint_full()?)
   }

   /// Journal mode as reported by the engine right now.
   pub fn current_journal_mode(&self) -> Result<JournalMode> {
      Ok(self.backend()?.current_journal_mode()?)
   }
}

impl Drop for Connection {
   fn drop(&mut self) {
      self.close();
   }
}

impl std::fmt::Debug for Connection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Connection")
         .field("path", &self.path)
         .field("is_open", &self.is_open())
         .field("state", &self.state)
         .field("locking_mode", &self.locking_mode)
         .finish_non_exhaustive()
   }
}

//! Ownership wrapper around one native SQLite connection

use std::ffi::{c_int, c_void};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use libsqlite3_sys as ffi;
use parking_lot::Mutex;
use rusqlite::{CachedStatement, Connection, OptionalExtension, params_from_iter};
use tracing::{debug, trace, warn};

use crate::config::{BusyHandler, BusyPolicy, JournalMode, LockingMode, OpenMode, OpenOptions};
use crate::log::EngineLog;
use crate::value::ColumnValue;
use crate::{Error, Result};

/// Room for the control statements, the change-set store statements and
/// a working set of caller SQL.
const STATEMENT_CACHE_CAPACITY: usize = 32;

/// A single connection to a SQLite database file.
///
/// ## Lifecycle
///
/// ```text
/// 1. open()         connect, apply busy policy, locking mode and journal mode
/// 2. execute() ...  run SQL / cached statements against the connection
/// 3. close()        release the handle (idempotent, never fails observably)
/// ```
///
/// Every operation after `close` returns [`Error::NotConnected`]. Statements
/// borrow the backend, so none can outlive the connection:
///
/// ```compile_fail
/// use sqlite_conn::{Backend, JournalMode, OpenOptions};
///
/// let options = OpenOptions { journal_mode: JournalMode::Memory, ..Default::default() };
/// let mut backend = Backend::open(":memory:", &options).unwrap();
/// let statement = backend.prepare_cached("SELECT 1").unwrap();
/// backend.close();
/// drop(statement);
/// ```
pub struct Backend {
   conn: Option<Connection>,
   path: PathBuf,
   open_mode: OpenMode,
   locking_mode: LockingMode,
   journal_mode: Option<JournalMode>,
   /// Boxed so its address stays stable while registered with the engine
   busy_handler: Option<Box<BusyHandler>>,
   engine_log: Arc<EngineLog>,
   /// Shared with every [`HandleLease`]; flipped under the lock before the
   /// handle is released
   open: Arc<Mutex<bool>>,
}

impl Backend {
   /// Opens `path` and applies every setting in `options`.
   ///
   /// The busy policy is installed first so the pragmas below already benefit
   /// from it. If any step fails the connection is released before returning.
   pub fn open(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
      let path = path.as_ref();
      let mut backend = Self::connect(path, options.open_mode, Arc::clone(&options.engine_log))?;

      let setup = (|| {
         backend.apply_busy_policy(&options.busy_policy)?;
         backend.set_locking_mode(options.locking_mode)?;
         backend.set_journal_mode(options.journal_mode)
      })();

      if let Err(e) = setup {
         backend.close();
         return Err(match e {
            // The file could not be read or is held by someone else
            Error::Execution { code, message } | Error::Busy { code, message } => Error::Open {
               path: path.display().to_string(),
               code,
               message,
            },
            other => other,
         });
      }

      debug!(
         path = %path.display(),
         journal_mode = options.journal_mode.as_pragma(),
         locking_mode = options.locking_mode.as_pragma(),
         "Opened database"
      );
      Ok(backend)
   }

   /// Connects to `path` without applying pragmas or a busy policy.
   pub fn connect(
      path: impl AsRef<Path>,
      open_mode: OpenMode,
      engine_log: Arc<EngineLog>,
   ) -> Result<Self> {
      let path = path.as_ref();
      let mut conn =
         Connection::open_with_flags(path, open_mode.flags()).map_err(|e| match Error::from(e) {
            Error::Execution { code, message } | Error::Busy { code, message } => Error::Open {
               path: path.display().to_string(),
               code,
               message,
            },
            Error::Driver(e) => Error::Open {
               path: path.display().to_string(),
               code: ffi::SQLITE_CANTOPEN,
               message: e.to_string(),
            },
            other => other,
         })?;

      conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
      engine_log.install_on(&mut conn);

      Ok(Self {
         conn: Some(conn),
         path: path.to_path_buf(),
         open_mode,
         locking_mode: LockingMode::Default,
         journal_mode: None,
         busy_handler: None,
         engine_log,
         open: Arc::new(Mutex::new(true)),
      })
   }

   /// Releases the native handle. Idempotent.
   ///
   /// Teardown errors are logged, never returned: by this point the caller has
   /// nothing left to roll back.
   pub fn close(&mut self) {
      // Held across the release so no lease can be inside the handle meanwhile
      let mut open = self.open.lock();
      let Some(conn) = self.conn.take() else {
         return;
      };
      *open = false;

      if self.busy_handler.is_some() {
         // SAFETY: the handle is still open; clearing the handler means the
         // engine holds no pointer to the box once it is dropped below
         unsafe {
            ffi::sqlite3_busy_handler(conn.handle(), None, std::ptr::null_mut());
         }
      }
      self.busy_handler = None;

      match conn.close() {
         Ok(()) => debug!(path = %self.path.display(), "Closed database"),
         Err((conn, e)) => {
            warn!(
               path = %self.path.display(),
               error = %e,
               "Failed to close database; leaking the handle"
            );
            // Dropping would retry the close and panic
            std::mem::forget(conn);
         }
      }
   }

   pub fn is_open(&self) -> bool {
      self.conn.is_some()
   }

   /// The underlying rusqlite connection.
   pub fn connection(&self) -> Result<&Connection> {
      self.conn.as_ref().ok_or(Error::NotConnected)
   }

   /// A lease on the native handle for objects that must outlive a borrow of
   /// this backend (session extension objects).
   pub fn lease(&self) -> Result<HandleLease> {
      let conn = self.connection()?;
      // SAFETY: the pointer is only dereferenced through `HandleLease::with`
      let db = NonNull::new(unsafe { conn.handle() }).ok_or(Error::NotConnected)?;
      Ok(HandleLease {
         db,
         open: Arc::clone(&self.open),
      })
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn open_mode(&self) -> OpenMode {
      self.open_mode
   }

   pub fn engine_log(&self) -> &Arc<EngineLog> {
      &self.engine_log
   }

   /// Runs one or more non-query statements.
   pub fn execute(&self, sql: &str) -> Result<()> {
      self.connection()?.execute_batch(sql)?;
      trace!(sql, "Executed");
      Ok(())
   }

   /// Compiles `sql` into the connection's statement cache, or takes the
   /// already compiled copy. The statement returns to the cache on drop.
   pub fn prepare_cached(&self, sql: &str) -> Result<CachedStatement<'_>> {
      Ok(self.connection()?.prepare_cached(sql)?)
   }

   /// Runs a cached statement with `params` and returns the number of rows changed.
   pub fn execute_cached(&self, sql: &str, params: &[ColumnValue]) -> Result<usize> {
      let mut statement = self.prepare_cached(sql)?;
      Ok(statement.execute(params_from_iter(params))?)
   }

   /// Runs `sql` with `params` and collects every row.
   pub fn fetch_all(&self, sql: &str, params: &[ColumnValue]) -> Result<Vec<Vec<ColumnValue>>> {
      let mut statement = self.connection()?.prepare(sql)?;
      let columns = statement.column_count();
      let rows = statement.query_map(params_from_iter(params), |row| {
         (0..columns)
            .map(|i| row.get_ref(i).map(ColumnValue::from))
            .collect::<rusqlite::Result<Vec<_>>>()
      })?;
      Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
   }

   /// Runs `sql` with `params` and returns the first row, if any.
   pub fn fetch_optional(
      &self,
      sql: &str,
      params: &[ColumnValue],
   ) -> Result<Option<Vec<ColumnValue>>> {
      Ok(self.fetch_all(sql, params)?.into_iter().next())
   }

   /// Installs `policy`, replacing whichever policy was active.
   pub fn apply_busy_policy(&mut self, policy: &BusyPolicy) -> Result<()> {
      match policy {
         BusyPolicy::Timeout(timeout) => self.set_busy_timeout(*timeout),
         BusyPolicy::Handler(handler) => self.register_busy_handler(handler.clone()),
      }
   }

   /// Lets the engine retry internally for up to `timeout` before reporting busy.
   ///
   /// Replaces any registered busy handler.
   pub fn set_busy_timeout(&mut self, timeout: Duration) -> Result<()> {
      self.connection()?.busy_timeout(timeout)?;
      // The engine's own timeout handler replaced ours
      self.busy_handler = None;
      trace!(
         timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
         "Busy timeout set"
      );
      Ok(())
   }

   /// Registers `handler` to be consulted on every contention event.
   ///
   /// Replaces any busy timeout. rusqlite only accepts plain function
   /// pointers here, so the closure is registered on the native handle.
   pub fn register_busy_handler(&mut self, handler: BusyHandler) -> Result<()> {
      let conn = self.connection()?;
      let boxed = Box::new(handler);
      let arg = &*boxed as *const BusyHandler as *mut c_void;

      // SAFETY: `arg` stays valid until the handler is replaced or unregistered
      // in `close`, both of which happen before the box is dropped
      let code = unsafe { ffi::sqlite3_busy_handler(conn.handle(), Some(busy_handler_callback), arg) };
      if code != ffi::SQLITE_OK {
         return Err(Error::from_code_and_message(
            code,
            "failed to register busy handler".to_string(),
         ));
      }

      // The previous handler (if any) is unreachable from the engine now
      self.busy_handler = Some(boxed);
      trace!("Busy handler registered");
      Ok(())
   }

   /// Sets `PRAGMA main.locking_mode`.
   ///
   /// Must be called before the first transaction of this connection.
   pub fn set_locking_mode(&mut self, mode: LockingMode) -> Result<()> {
      if mode != LockingMode::Default {
         self.set_pragma_value("main.locking_mode", mode.as_pragma())?;
      }
      self.locking_mode = mode;
      Ok(())
   }

   pub fn locking_mode(&self) -> LockingMode {
      self.locking_mode
   }

   /// Sets `PRAGMA journal_mode` and verifies the engine accepted it.
   ///
   /// In-memory databases only accept `memory` or `off`.
   pub fn set_journal_mode(&mut self, mode: JournalMode) -> Result<()> {
      self.set_pragma_value("journal_mode", mode.as_pragma())?;
      self.journal_mode = Some(mode);
      Ok(())
   }

   /// The journal mode last applied through this backend.
   pub fn journal_mode(&self) -> Option<JournalMode> {
      self.journal_mode
   }

   /// The journal mode the engine reports right now.
   pub fn current_journal_mode(&self) -> Result<JournalMode> {
      let value = self.pragma_value("journal_mode")?;
      JournalMode::from_pragma(&value).ok_or_else(|| Error::Execution {
         code: ffi::SQLITE_ERROR,
         message: format!("unknown journal mode '{}'", value),
      })
   }

   /// Reads `PRAGMA <name>` and returns the first column of the first row as text.
   pub fn pragma_value(&self, name: &str) -> Result<String> {
      self.query_pragma(&format!("PRAGMA {}", name))
   }

   /// Runs `PRAGMA <name>=<value>` and checks the value the engine echoes back.
   pub fn set_pragma_value(&self, name: &str, value: &str) -> Result<()> {
      let actual = self.query_pragma(&format!("PRAGMA {}={}", name, value))?;
      if !actual.eq_ignore_ascii_case(value) {
         return Err(Error::PragmaValueNotSet {
            pragma: name.to_string(),
            expected: value.to_string(),
            actual,
         });
      }
      trace!(pragma = name, value, "Pragma set");
      Ok(())
   }

   fn query_pragma(&self, sql: &str) -> Result<String> {
      let value = self
         .connection()?
         .query_row(sql, [], |row| row.get_ref(0).map(ColumnValue::from))
         .optional()?;
      Ok(match value {
         Some(ColumnValue::Text(s)) => s,
         Some(ColumnValue::Integer(i)) => i.to_string(),
         Some(ColumnValue::Real(r)) => r.to_string(),
         _ => String::new(),
      })
   }

   /// Rowid of the most recent successful INSERT on this connection.
   pub fn last_inserted_row_id(&self) -> Result<i64> {
      Ok(self.connection()?.last_insert_rowid())
   }

   /// Rows changed by the most recent INSERT, UPDATE or DELETE.
   pub fn changes_count(&self) -> Result<u64> {
      self.query_count("SELECT changes()")
   }

   /// Rows changed since the connection was opened.
   pub fn total_changes_count(&self) -> Result<u64> {
      self.query_count("SELECT total_changes()")
   }

   fn query_count(&self, sql: &str) -> Result<u64> {
      let count: i64 = self.connection()?.query_row(sql, [], |row| row.get(0))?;
      Ok(u64::try_from(count).unwrap_or_default())
   }

   /// `true` when the engine is not inside an explicit transaction.
   pub fn is_autocommit(&self) -> Result<bool> {
      Ok(self.connection()?.is_autocommit())
   }

   /// Copies the whole WAL back into the database file.
   pub fn wal_checkpoint_full(&self) -> Result<()> {
      let blocked: i64 =
         self.connection()?
            .query_row("PRAGMA main.wal_checkpoint(FULL)", [], |row| row.get(0))?;
      if blocked != 0 {
         return Err(Error::Busy {
            code: ffi::SQLITE_BUSY,
            message: "checkpoint blocked by another connection".to_string(),
         });
      }
      Ok(())
   }
}

impl Drop for Backend {
   fn drop(&mut self) {
      self.close();
   }
}

impl std::fmt::Debug for Backend {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Backend")
         .field("path", &self.path)
         .field("open", &self.is_open())
         .field("open_mode", &self.open_mode)
         .field("locking_mode", &self.locking_mode)
         .field("journal_mode", &self.journal_mode)
         .finish()
   }
}

/// A view of a [`Backend`]'s native handle that is not tied to a borrow.
///
/// Native objects that hang off a connection keep one of these instead of a
/// raw pointer. The backend cannot release the handle while
/// [`with`](Self::with) runs, and once it has, `with` returns `None`.
#[derive(Clone)]
pub struct HandleLease {
   db: NonNull<ffi::sqlite3>,
   open: Arc<Mutex<bool>>,
}

// SAFETY: the handle is opened with SQLITE_OPEN_FULLMUTEX and is only
// dereferenced inside `with`, under the lock `Backend::close` takes.
unsafe impl Send for HandleLease {}
unsafe impl Sync for HandleLease {}

impl HandleLease {
   /// Runs `f` with the native handle while the connection is guaranteed open.
   pub fn with<R>(&self, f: impl FnOnce(*mut ffi::sqlite3) -> R) -> Option<R> {
      let open = self.open.lock();
      (*open).then(|| f(self.db.as_ptr()))
   }

   pub fn is_open(&self) -> bool {
      *self.open.lock()
   }
}

impl std::fmt::Debug for HandleLease {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("HandleLease")
         .field("open", &self.is_open())
         .finish()
   }
}

unsafe extern "C" fn busy_handler_callback(arg: *mut c_void, attempts: c_int) -> c_int {
   // SAFETY: arg points at the boxed handler owned by the Backend, which keeps
   // it alive until the handler is replaced or unregistered.
   let handler = unsafe { &*(arg as *const BusyHandler) };
   let attempts = u32::try_from(attempts).unwrap_or(0);

   // A panic must not unwind into SQLite; treat it as "give up"
   match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(attempts))) {
      Ok(true) => 1,
      Ok(false) => 0,
      Err(_) => {
         warn!("Busy handler panicked; reporting busy");
         0
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::sync::atomic::{AtomicU32, Ordering};
   use tempfile::TempDir;

   fn memory_options() -> OpenOptions {
      OpenOptions {
         journal_mode: JournalMode::Memory,
         ..Default::default()
      }
   }

   #[test]
   fn test_open_execute_close() {
      let mut backend = Backend::open(":memory:", &memory_options()).unwrap();
      backend
         .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, x TEXT); INSERT INTO t (x) VALUES ('a')")
         .unwrap();
      assert_eq!(backend.last_inserted_row_id().unwrap(), 1);
      assert_eq!(backend.changes_count().unwrap(), 1);

      backend.close();
      assert!(!backend.is_open());
      assert!(matches!(backend.execute("SELECT 1"), Err(Error::NotConnected)));

      // Idempotent
      backend.close();
   }

   #[test]
   fn test_execute_reports_malformed_sql() {
      let backend = Backend::open(":memory:", &memory_options()).unwrap();
      let err = backend.execute("SELEKT nonsense").unwrap_err();
      assert!(matches!(err, Error::Execution { .. }));
      assert!(err.to_string().contains("syntax error"));
   }

   #[test]
   fn test_execute_reports_constraint_violation() {
      let backend = Backend::open(":memory:", &memory_options()).unwrap();
      backend
         .execute("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1)")
         .unwrap();
      let err = backend.execute("INSERT INTO t VALUES (1)").unwrap_err();
      assert_eq!(
         err.sqlite_code().map(|c| c & 0xff),
         Some(ffi::SQLITE_CONSTRAINT)
      );
   }

   #[test]
   fn test_open_missing_file_without_create_fails() {
      let dir = TempDir::new().unwrap();
      let options = OpenOptions {
         open_mode: OpenMode::ReadWrite,
         ..Default::default()
      };
      let err = Backend::open(dir.path().join("missing.db"), &options).unwrap_err();
      assert!(matches!(err, Error::Open { .. }));
      assert_eq!(err.error_code(), "OPEN_ERROR");
   }

   #[test]
   fn test_open_garbage_file_reports_open_error() {
      let dir = TempDir::new().unwrap();
      let path = dir.path().join("garbage.db");
      std::fs::write(&path, vec![0xAB; 4096]).unwrap();

      let err = Backend::open(&path, &OpenOptions::default()).unwrap_err();
      assert!(matches!(err, Error::Open { .. }), "got {err:?}");
   }

   #[test]
   fn test_wal_journal_mode_applied() {
      let dir = TempDir::new().unwrap();
      let backend = Backend::open(dir.path().join("wal.db"), &OpenOptions::default()).unwrap();
      assert_eq!(backend.journal_mode(), Some(JournalMode::Wal));
      assert_eq!(backend.current_journal_mode().unwrap(), JournalMode::Wal);
      backend.wal_checkpoint_full().unwrap();
   }

   #[test]
   fn test_wal_on_memory_database_is_rejected() {
      let err = Backend::open(":memory:", &OpenOptions::default()).unwrap_err();
      assert!(matches!(err, Error::PragmaValueNotSet { .. }), "got {err:?}");
   }

   #[test]
   fn test_exclusive_locking_mode() {
      let dir = TempDir::new().unwrap();
      let options = OpenOptions {
         locking_mode: LockingMode::Exclusive,
         journal_mode: JournalMode::Delete,
         ..Default::default()
      };
      let backend = Backend::open(dir.path().join("x.db"), &options).unwrap();
      assert_eq!(backend.locking_mode(), LockingMode::Exclusive);
      assert_eq!(backend.pragma_value("main.locking_mode").unwrap(), "exclusive");
   }

   #[test]
   fn test_busy_timeout_surfaces_busy_error() {
      let dir = TempDir::new().unwrap();
      let path = dir.path().join("busy.db");
      let options = OpenOptions {
         busy_policy: BusyPolicy::Timeout(Duration::from_millis(20)),
         ..Default::default()
      };

      let holder = Backend::open(&path, &options).unwrap();
      holder.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
      holder.execute("BEGIN IMMEDIATE").unwrap();

      let contender = Backend::open(&path, &options).unwrap();
      let err = contender.execute("BEGIN IMMEDIATE").unwrap_err();
      assert!(err.is_busy(), "got {err:?}");

      holder.execute("COMMIT").unwrap();
      contender.execute("BEGIN IMMEDIATE").unwrap();
      contender.execute("COMMIT").unwrap();
   }

   #[test]
   fn test_busy_handler_is_consulted() {
      let dir = TempDir::new().unwrap();
      let path = dir.path().join("handler.db");

      let holder = Backend::open(&path, &OpenOptions::default()).unwrap();
      holder.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
      holder.execute("BEGIN IMMEDIATE").unwrap();

      let calls = Arc::new(AtomicU32::new(0));
      let seen = Arc::clone(&calls);
      let options = OpenOptions {
         busy_policy: BusyPolicy::Handler(BusyHandler::new(move |attempts| {
            seen.fetch_add(1, Ordering::SeqCst);
            attempts < 3
         })),
         ..Default::default()
      };

      let contender = Backend::open(&path, &options).unwrap();
      let err = contender.execute("BEGIN IMMEDIATE").unwrap_err();
      assert!(err.is_busy());
      assert_eq!(calls.load(Ordering::SeqCst), 4);

      holder.execute("ROLLBACK").unwrap();
   }

   #[test]
   fn test_pragma_value_round_trip() {
      let backend = Backend::open(":memory:", &memory_options()).unwrap();
      backend.execute("PRAGMA user_version = 7").unwrap();
      assert_eq!(backend.pragma_value("user_version").unwrap(), "7");

      // Pragmas that echo nothing back cannot be verified
      let err = backend.set_pragma_value("user_version", "8").unwrap_err();
      assert!(matches!(err, Error::PragmaValueNotSet { .. }));
   }

   #[test]
   fn test_cached_statement_binds_column_values() {
      let backend = Backend::open(":memory:", &memory_options()).unwrap();
      backend
         .execute("CREATE TABLE v (id INTEGER PRIMARY KEY, t TEXT, b BLOB, r REAL)")
         .unwrap();

      let text = "zero\0byte and ünïcödé";
      let blob = vec![0u8, 1, 2, 0, 255];
      let changed = backend
         .execute_cached(
            "INSERT INTO v (t, b, r) VALUES (?, ?, ?)",
            &[text.into(), blob.clone().into(), ColumnValue::Real(1.5)],
         )
         .unwrap();
      assert_eq!(changed, 1);

      let row = backend
         .fetch_optional("SELECT t, b, r, length(b) FROM v WHERE id = ?", &[ColumnValue::Integer(1)])
         .unwrap()
         .unwrap();
      assert_eq!(row[0], ColumnValue::Text(text.to_string()));
      assert_eq!(row[1], ColumnValue::Blob(blob));
      assert_eq!(row[2], ColumnValue::Real(1.5));
      assert_eq!(row[3], ColumnValue::Integer(5));

      assert!(backend.fetch_optional("SELECT t FROM v WHERE id = 2", &[]).unwrap().is_none());
   }

   #[test]
   fn test_wrong_parameter_count_is_a_driver_error() {
      let backend = Backend::open(":memory:", &memory_options()).unwrap();
      let err = backend.execute_cached("SELECT ?", &[]).unwrap_err();
      assert_eq!(err.error_code(), "DRIVER_ERROR");
   }

   #[test]
   fn test_lease_stops_working_after_close() {
      let mut backend = Backend::open(":memory:", &memory_options()).unwrap();
      let lease = backend.lease().unwrap();
      assert!(lease.is_open());
      assert_eq!(lease.with(|db| !db.is_null()), Some(true));

      backend.close();
      assert!(!lease.is_open());
      assert_eq!(lease.with(|_| ()), None);
      assert!(matches!(backend.lease(), Err(Error::NotConnected)));
   }

   #[test]
   fn test_close_releases_busy_handler() {
      let marker = Arc::new(());
      let held = Arc::clone(&marker);
      let options = OpenOptions {
         journal_mode: JournalMode::Memory,
         busy_policy: BusyPolicy::Handler(BusyHandler::new(move |_| {
            let _ = &held;
            false
         })),
         ..Default::default()
      };

      let mut backend = Backend::open(":memory:", &options).unwrap();
      drop(options);
      // Statements go back to the cache when dropped; close still succeeds
      drop(backend.prepare_cached("SELECT 1").unwrap());
      assert_eq!(Arc::strong_count(&marker), 2);

      backend.close();
      assert_eq!(Arc::strong_count(&marker), 1);
   }

   #[test]
   fn test_timeout_replaces_busy_handler() {
      let marker = Arc::new(());
      let held = Arc::clone(&marker);
      let mut backend = Backend::open(":memory:", &memory_options()).unwrap();
      backend
         .register_busy_handler(BusyHandler::new(move |_| {
            let _ = &held;
            false
         }))
         .unwrap();
      assert_eq!(Arc::strong_count(&marker), 2);

      backend.set_busy_timeout(Duration::from_millis(5)).unwrap();
      assert_eq!(Arc::strong_count(&marker), 1);
   }

   #[test]
   fn test_autocommit_tracks_explicit_transactions() {
      let backend = Backend::open(":memory:", &memory_options()).unwrap();
      assert!(backend.is_autocommit().unwrap());
      backend.execute("BEGIN").unwrap();
      assert!(!backend.is_autocommit().unwrap());
      backend.execute("ROLLBACK").unwrap();
      assert!(backend.is_autocommit().unwrap());
   }
}

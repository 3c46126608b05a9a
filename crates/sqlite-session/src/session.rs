//! The change-capture engine.
//!
//! A recording window lives inside one immediate transaction:
//!
//! ```text
//!   Idle ──create()──▶ Armed ──▶ Recording ──commit()──▶ Finalizing ──▶ Idle
//!                                    │
//!                                    └──────rollback()────────────────▶ Idle
//! ```
//!
//! On commit the native session's changeset is written to the change-set
//! store table inside the same transaction, so a stored change set exists if
//! and only if its data changes were committed. The finished window stays
//! pending until the owner reports that COMMIT succeeded (`publish()`), or
//! is dropped by `rollback()`.

use std::ffi::{CString, c_int, c_void};
use std::ptr::NonNull;

use libsqlite3_sys as ffi;
use sqlite_conn::{Backend, ColumnValue, HandleLease};
use tracing::{debug, trace, warn};

use crate::change::{SessionChangeSet, SessionChangeSets, apply_change_set, take_sqlite_buffer};
use crate::schema::{query_table_info, quote_identifier};
use crate::{Error, Result};

/// Default name of the table that stores committed change sets.
pub const DEFAULT_SESSION_TABLE: &str = "databaseSessions";

/// Default schema the sessions record.
pub const DEFAULT_DATABASE_NAME: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
   /// No recording; attached tables may be changed
   Idle,
   /// A native session is being created and attached
   Armed,
   /// Mutations on attached tables are being recorded
   Recording,
   /// The recording is being turned into a change set
   Finalizing,
}

/// Owned `sqlite3_session`, deleted on drop.
///
/// rusqlite's `Session` borrows its `Connection`, which rules out keeping it
/// beside the connection between calls. This one holds a [`HandleLease`]
/// instead, so every native call happens while the connection is open.
#[derive(Debug)]
struct RawSession {
   lease: HandleLease,
   session: NonNull<ffi::sqlite3_session>,
}

// SAFETY: only reachable through `Sessions`, whose owner serializes access;
// every use goes through the lease lock.
unsafe impl Send for RawSession {}

impl RawSession {
   fn create(backend: &Backend, database_name: &str) -> Result<Self> {
      let lease = backend.lease()?;
      let name = CString::new(database_name).map_err(invalid_name)?;

      let mut session: *mut ffi::sqlite3_session = std::ptr::null_mut();
      let code = lease
         .with(|db| unsafe { ffi::sqlite3session_create(db, name.as_ptr(), &mut session) })
         .ok_or(sqlite_conn::Error::NotConnected)?;
      if code != ffi::SQLITE_OK {
         return Err(Error::session("create", code));
      }

      let session = NonNull::new(session).ok_or_else(|| Error::session("create", ffi::SQLITE_NOMEM))?;
      Ok(Self { lease, session })
   }

   fn attach(&mut self, table: &str) -> Result<()> {
      let table = CString::new(table).map_err(invalid_name)?;
      let session = self.session.as_ptr();
      let code = self
         .lease
         .with(|_| unsafe { ffi::sqlite3session_attach(session, table.as_ptr()) })
         .ok_or(sqlite_conn::Error::NotConnected)?;
      if code != ffi::SQLITE_OK {
         return Err(Error::session("attach", code));
      }
      Ok(())
   }

   fn is_empty(&self) -> Result<bool> {
      let session = self.session.as_ptr();
      Ok(self
         .lease
         .with(|_| unsafe { ffi::sqlite3session_isempty(session) != 0 })
         .ok_or(sqlite_conn::Error::NotConnected)?)
   }

   fn changeset(&mut self) -> Result<SessionChangeSet> {
      let session = self.session.as_ptr();
      let (code, bytes) = self
         .lease
         .with(|_| {
            let mut len: c_int = 0;
            let mut out: *mut c_void = std::ptr::null_mut();
            let code = unsafe { ffi::sqlite3session_changeset(session, &mut len, &mut out) };
            // SQLite may hand back a partial buffer even on failure
            (code, unsafe { take_sqlite_buffer(out, len) })
         })
         .ok_or(sqlite_conn::Error::NotConnected)?;
      if code != ffi::SQLITE_OK {
         return Err(Error::session("changeset", code));
      }
      Ok(SessionChangeSet::from_bytes(bytes))
   }
}

impl Drop for RawSession {
   fn drop(&mut self) {
      let session = self.session.as_ptr();
      let deleted = self
         .lease
         .with(|_| unsafe { ffi::sqlite3session_delete(session) });
      if deleted.is_none() {
         // Deleting touches the connection; once it is gone the object is leaked
         warn!("Session outlived its connection; native session not deleted");
      }
   }
}

fn invalid_name(e: std::ffi::NulError) -> Error {
   Error::Store(sqlite_conn::Error::Driver(sqlite_conn::rusqlite::Error::NulError(e)))
}

/// Records row-level mutations on a set of attached tables, one window at a time.
///
/// Borrows the [`Backend`] per call rather than storing it. A recording that
/// outlives its connection reports [`sqlite_conn::Error::NotConnected`].
///
/// Finishing a window is two-step: [`commit`](Self::commit) writes the change
/// set into the caller's open transaction, and [`publish`](Self::publish)
/// makes it visible through [`change_sets`](Self::change_sets) once that
/// transaction has committed. Until then the finalized window stays pending,
/// and calling `commit` again returns it unchanged.
#[derive(Debug)]
pub struct Sessions {
   database_name: String,
   session_table: String,
   attached_tables: Vec<String>,
   state: SessionState,
   session: Option<RawSession>,
   /// A finalized window whose transaction has not committed yet
   pending: Option<Option<SessionChangeSet>>,
   latest: Option<SessionChangeSet>,
   /// Absent on read-only connections, which cannot store change sets
   insert_sql: Option<String>,
}

impl Sessions {
   /// Creates the engine and, on writable connections, the change-set store table.
   pub fn new(
      backend: &Backend,
      database_name: impl Into<String>,
      session_table: impl Into<String>,
   ) -> Result<Self> {
      let database_name = database_name.into();
      let session_table = session_table.into();
      let qualified = format!(
         "{}.{}",
         quote_identifier(&database_name),
         quote_identifier(&session_table)
      );

      let insert_sql = if backend.open_mode().is_read_only() {
         debug!(table = %session_table, "Read-only connection; change sets will not be stored");
         None
      } else {
         backend.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {}(id INTEGER PRIMARY KEY AUTOINCREMENT, changeset BLOB)",
            qualified
         ))?;
         let insert_sql = format!("INSERT INTO {}(changeset) VALUES (?)", qualified);
         // Compiled once here; later commits take it from the statement cache
         backend.prepare_cached(&insert_sql)?;
         Some(insert_sql)
      };

      Ok(Self {
         database_name,
         session_table,
         attached_tables: Vec::new(),
         state: SessionState::Idle,
         session: None,
         pending: None,
         latest: None,
         insert_sql,
      })
   }

   pub fn state(&self) -> SessionState {
      self.state
   }

   pub fn is_recording(&self) -> bool {
      self.state == SessionState::Recording
   }

   pub fn database_name(&self) -> &str {
      &self.database_name
   }

   pub fn session_table(&self) -> &str {
      &self.session_table
   }

   pub fn attached_tables(&self) -> &[String] {
      &self.attached_tables
   }

   /// Replaces the set of tables recorded by future windows.
   ///
   /// Only valid while idle. Duplicate names are kept once, in first-seen order.
   pub fn set_attached_tables<I, S>(&mut self, tables: I) -> Result<()>
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      if self.state != SessionState::Idle {
         return Err(Error::Recording);
      }

      let mut attached: Vec<String> = Vec::new();
      for table in tables.into_iter().map(Into::into) {
         if table.eq_ignore_ascii_case(&self.session_table) {
            return Err(Error::ReservedTable(table));
         }
         if !attached.contains(&table) {
            attached.push(table);
         }
      }

      debug!(tables = ?attached, "Attached tables updated");
      self.attached_tables = attached;
      Ok(())
   }

   /// Starts recording the attached tables on `backend`.
   ///
   /// Call right after an immediate transaction begins. On failure nothing is
   /// recorded and the engine is idle again.
   pub fn create(&mut self, backend: &Backend) -> Result<()> {
      if self.state != SessionState::Idle {
         return Err(Error::Recording);
      }

      self.state = SessionState::Armed;
      match self.start_recording(backend) {
         Ok(session) => {
            self.session = Some(session);
            self.state = SessionState::Recording;
            trace!(tables = ?self.attached_tables, "Session recording");
            Ok(())
         }
         Err(e) => {
            self.state = SessionState::Idle;
            Err(e)
         }
      }
   }

   fn start_recording(&self, backend: &Backend) -> Result<RawSession> {
      if self.attached_tables.is_empty() {
         warn!("Session started without attached tables; nothing will be recorded");
      }

      let mut session = RawSession::create(backend, &self.database_name)?;
      for table in &self.attached_tables {
         self.warn_if_unrecordable(backend, table);
         session.attach(table)?;
      }
      Ok(session)
   }

   fn warn_if_unrecordable(&self, backend: &Backend, table: &str) {
      match query_table_info(backend, &self.database_name, table) {
         Ok(Some(info)) if info.is_recordable() => {}
         Ok(Some(_)) => {
            warn!(table = %table, "Attached table has no primary key; its changes are not recorded")
         }
         Ok(None) => warn!(table = %table, "Attached table not found in schema"),
         Err(e) => warn!(table = %table, error = %e, "Failed to query table info"),
      }
   }

   /// Ends the window and turns it into a change set.
   ///
   /// A non-empty change set is written to the store table in the caller's
   /// still-open transaction and held as pending until [`publish`](Self::publish).
   /// When nothing is recording, the pending window (if any) is returned
   /// again, which makes a retried COMMIT safe.
   pub fn commit(&mut self, backend: &Backend) -> Result<Option<SessionChangeSet>> {
      let Some(mut session) = self.session.take() else {
         if let Some(pending) = &self.pending {
            trace!("Returning pending change set");
            return Ok(pending.clone());
         }
         debug!("Session commit without an active recording");
         return Ok(None);
      };

      self.state = SessionState::Finalizing;
      let result = self.finalize(backend, &mut session);
      drop(session);
      self.state = SessionState::Idle;

      // A failed window is still pending as "nothing recorded"
      self.pending = Some(result.as_ref().ok().cloned().flatten());
      result
   }

   fn finalize(
      &mut self,
      backend: &Backend,
      session: &mut RawSession,
   ) -> Result<Option<SessionChangeSet>> {
      if session.is_empty()? {
         trace!("Session recorded no changes");
         return Ok(None);
      }

      let change_set = session.changeset()?;
      let insert_sql = self.insert_sql.as_deref().ok_or_else(|| Error::Session {
         operation: "store",
         code: ffi::SQLITE_READONLY,
         message: "change sets cannot be stored on a read-only connection".to_string(),
      })?;
      backend.execute_cached(insert_sql, &[ColumnValue::Blob(change_set.as_bytes().to_vec())])?;

      debug!(bytes = change_set.len(), "Session committed");
      Ok(Some(change_set))
   }

   /// Marks the pending window as durable once its transaction has committed.
   ///
   /// Returns the published change set. A no-op when nothing is pending, so
   /// plain transactions leave the last window's result in place.
   pub fn publish(&mut self) -> Option<SessionChangeSet> {
      if let Some(pending) = self.pending.take() {
         self.latest = pending;
      }
      self.latest.clone()
   }

   /// Whether a finalized window is waiting for its transaction to commit.
   pub fn has_pending(&self) -> bool {
      self.pending.is_some()
   }

   /// Ends the window and discards everything it recorded, including a
   /// finalized window whose transaction is being rolled back.
   pub fn rollback(&mut self) {
      if self.session.take().is_some() {
         trace!("Session rolled back");
      }
      if self.pending.take().is_some() {
         trace!("Pending change set discarded");
      }
      self.latest = None;
      self.state = SessionState::Idle;
   }

   /// The change set of the most recently completed window, if it recorded anything.
   pub fn change_sets(&self) -> SessionChangeSets {
      self.latest.iter().cloned().collect()
   }

   /// Every change set in the store table, newest first.
   pub fn stored_change_sets(&self, backend: &Backend) -> Result<SessionChangeSets> {
      self.select_stored(backend, "DESC")
   }

   fn select_stored(&self, backend: &Backend, order: &str) -> Result<SessionChangeSets> {
      let sql = format!(
         "SELECT changeset FROM {}.{} ORDER BY id {}",
         quote_identifier(&self.database_name),
         quote_identifier(&self.session_table),
         order
      );
      let rows = backend.fetch_all(&sql, &[])?;

      Ok(rows
         .into_iter()
         .filter_map(|row| match row.into_iter().next() {
            Some(ColumnValue::Blob(bytes)) => Some(SessionChangeSet::from_bytes(bytes)),
            _ => None,
         })
         .collect())
   }

   /// Removes every stored change set.
   pub fn delete_stored(&self, backend: &Backend) -> Result<()> {
      backend.execute(&format!(
         "DELETE FROM {}.{}",
         quote_identifier(&self.database_name),
         quote_identifier(&self.session_table)
      ))?;
      Ok(())
   }

   /// Replays every stored change set (oldest first) into this connection while
   /// recording, then replaces the stored sets with the single coalesced result.
   ///
   /// Must run inside a transaction and while no window is recording.
   pub fn apply_and_update_sessions(&mut self, backend: &Backend) -> Result<()> {
      if self.state != SessionState::Idle {
         return Err(Error::Recording);
      }

      let stored = self.select_stored(backend, "ASC")?;
      self.create(backend)?;

      let applied = stored
         .iter()
         .try_for_each(|change_set| apply_change_set(backend, change_set))
         .and_then(|()| self.delete_stored(backend));
      if let Err(e) = applied {
         self.rollback();
         return Err(e);
      }

      self.commit(backend)?;
      debug!(applied = stored.len(), "Stored sessions applied and coalesced");
      Ok(())
   }

   /// Undoes every stored change set, newest first.
   ///
   /// Must run inside a transaction and while no window is recording.
   pub fn revert(&self, backend: &Backend) -> Result<()> {
      if self.state != SessionState::Idle {
         return Err(Error::Recording);
      }

      for change_set in self.stored_change_sets(backend)? {
         apply_change_set(backend, &change_set.invert()?)?;
      }
      Ok(())
   }
}

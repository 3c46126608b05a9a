use std::ffi::{CStr, c_char, c_int, c_uchar, c_void};

use libsqlite3_sys as ffi;
use rusqlite::session::{ChangesetItem, ConflictAction, ConflictType, invert_strm};
use serde::{Deserialize, Serialize};
use sqlite_conn::{Backend, ColumnValue};
use tracing::trace;

use crate::{Error, Result};

/// Change sets produced by completed recording windows.
pub type SessionChangeSets = Vec<SessionChangeSet>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
   Insert,
   Update,
   Delete,
}

impl ChangeOperation {
   fn from_code(code: c_int) -> Option<Self> {
      match code {
         ffi::SQLITE_INSERT => Some(ChangeOperation::Insert),
         ffi::SQLITE_UPDATE => Some(ChangeOperation::Update),
         ffi::SQLITE_DELETE => Some(ChangeOperation::Delete),
         _ => None,
      }
   }
}

/// The recorded mutations of one completed recording window.
///
/// Opaque and immutable: the payload is SQLite's native changeset format and
/// can be stored, shipped elsewhere, decoded with [`changes`](Self::changes)
/// or replayed with [`apply_change_set`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChangeSet {
   bytes: Vec<u8>,
}

impl SessionChangeSet {
   pub fn from_bytes(bytes: Vec<u8>) -> Self {
      Self { bytes }
   }

   pub fn as_bytes(&self) -> &[u8] {
      &self.bytes
   }

   pub fn into_bytes(self) -> Vec<u8> {
      self.bytes
   }

   pub fn len(&self) -> usize {
      self.bytes.len()
   }

   pub fn is_empty(&self) -> bool {
      self.bytes.is_empty()
   }

   /// Decodes the recorded mutations, in the order they were recorded.
   ///
   /// Walks the native iterator directly: UPDATE records leave unchanged
   /// columns without a value, which rusqlite's `ChangesetItem` accessors
   /// cannot represent.
   pub fn changes(&self) -> Result<Vec<SessionChange>> {
      if self.bytes.is_empty() {
         return Ok(Vec::new());
      }

      let mut iter: *mut ffi::sqlite3_changeset_iter = std::ptr::null_mut();
      let code = unsafe {
         ffi::sqlite3changeset_start(&mut iter, self.len_c()?, self.bytes_ptr())
      };
      if code != ffi::SQLITE_OK {
         return Err(Error::session("changeset_start", code));
      }

      let mut changes = Vec::new();
      let outcome = loop {
         match unsafe { ffi::sqlite3changeset_next(iter) } {
            ffi::SQLITE_ROW => match unsafe { read_change(iter) } {
               Ok(change) => changes.push(change),
               Err(e) => break Err(e),
            },
            ffi::SQLITE_DONE => break Ok(()),
            code => break Err(Error::session("changeset_next", code)),
         }
      };

      let code = unsafe { ffi::sqlite3changeset_finalize(iter) };
      outcome?;
      if code != ffi::SQLITE_OK {
         return Err(Error::session("changeset_finalize", code));
      }

      Ok(changes)
   }

   /// Builds the change set that undoes this one.
   pub fn invert(&self) -> Result<SessionChangeSet> {
      if self.bytes.is_empty() {
         return Ok(SessionChangeSet::default());
      }

      let mut input: &[u8] = &self.bytes;
      let mut inverted = Vec::with_capacity(self.bytes.len());
      invert_strm(&mut input, &mut inverted)
         .map_err(|e| Error::from_rusqlite("changeset_invert", e))?;
      Ok(SessionChangeSet::from_bytes(inverted))
   }

   fn len_c(&self) -> Result<c_int> {
      c_int::try_from(self.bytes.len()).map_err(|_| Error::Session {
         operation: "changeset_size",
         code: ffi::SQLITE_TOOBIG,
         message: "change set is larger than SQLite can address".to_string(),
      })
   }

   /// SQLite's changeset readers take `*mut` but never write through it.
   fn bytes_ptr(&self) -> *mut c_void {
      self.bytes.as_ptr() as *mut c_void
   }
}

impl Default for SessionChangeSet {
   fn default() -> Self {
      Self::from_bytes(Vec::new())
   }
}

/// One decoded row mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionChange {
   pub table: String,
   pub operation: ChangeOperation,
   /// True when the change was made by a trigger or foreign-key action.
   pub indirect: bool,
   /// The primary key value(s) for the affected row.
   /// For composite primary keys, values are ordered by column index.
   /// For DELETE operations, this contains the old PK values.
   /// For INSERT/UPDATE operations, this contains the new PK values.
   pub primary_key: Vec<ColumnValue>,
   /// Column values before the change. Empty for INSERT. For UPDATE only the
   /// primary key and the modified columns are present; the rest are `None`.
   pub old_values: Vec<Option<ColumnValue>>,
   /// Column values after the change. Empty for DELETE. For UPDATE only the
   /// modified columns are present.
   pub new_values: Vec<Option<ColumnValue>>,
}

unsafe fn read_change(iter: *mut ffi::sqlite3_changeset_iter) -> Result<SessionChange> {
   let mut table: *const c_char = std::ptr::null();
   let mut column_count: c_int = 0;
   let mut op: c_int = 0;
   let mut indirect: c_int = 0;

   let code = unsafe {
      ffi::sqlite3changeset_op(iter, &mut table, &mut column_count, &mut op, &mut indirect)
   };
   if code != ffi::SQLITE_OK {
      return Err(Error::session("changeset_op", code));
   }

   let operation = ChangeOperation::from_code(op).ok_or(Error::Session {
      operation: "changeset_op",
      code: ffi::SQLITE_CORRUPT,
      message: format!("unknown change operation {}", op),
   })?;
   let table = if table.is_null() {
      String::new()
   } else {
      unsafe { CStr::from_ptr(table) }
         .to_string_lossy()
         .into_owned()
   };

   let mut pk_flags: *mut c_uchar = std::ptr::null_mut();
   let mut pk_len: c_int = 0;
   let code = unsafe { ffi::sqlite3changeset_pk(iter, &mut pk_flags, &mut pk_len) };
   if code != ffi::SQLITE_OK {
      return Err(Error::session("changeset_pk", code));
   }
   let pk_flags: &[c_uchar] = if pk_flags.is_null() || pk_len <= 0 {
      &[]
   } else {
      unsafe { std::slice::from_raw_parts(pk_flags, pk_len as usize) }
   };

   let old_values = if operation == ChangeOperation::Insert {
      Vec::new()
   } else {
      unsafe { read_values(iter, column_count, ffi::sqlite3changeset_old, "changeset_old")? }
   };
   let new_values = if operation == ChangeOperation::Delete {
      Vec::new()
   } else {
      unsafe { read_values(iter, column_count, ffi::sqlite3changeset_new, "changeset_new")? }
   };

   let primary_key = pk_flags
      .iter()
      .enumerate()
      .filter(|(_, flag)| **flag != 0)
      .filter_map(|(i, _)| {
         let new = new_values.get(i).cloned().flatten();
         let old = old_values.get(i).cloned().flatten();
         new.or(old)
      })
      .collect();

   trace!(table = %table, ?operation, "Decoded change");
   Ok(SessionChange {
      table,
      operation,
      indirect: indirect != 0,
      primary_key,
      old_values,
      new_values,
   })
}

type ValueReader = unsafe extern "C" fn(
   *mut ffi::sqlite3_changeset_iter,
   c_int,
   *mut *mut ffi::sqlite3_value,
) -> c_int;

unsafe fn read_values(
   iter: *mut ffi::sqlite3_changeset_iter,
   column_count: c_int,
   reader: ValueReader,
   operation: &'static str,
) -> Result<Vec<Option<ColumnValue>>> {
   (0..column_count)
      .map(|i| {
         let mut value: *mut ffi::sqlite3_value = std::ptr::null_mut();
         let code = unsafe { reader(iter, i, &mut value) };
         if code != ffi::SQLITE_OK {
            return Err(Error::session(operation, code));
         }
         // A null value pointer means the column was not recorded (unchanged)
         Ok((!value.is_null()).then(|| unsafe { ColumnValue::from_raw(value) }))
      })
      .collect()
}

/// Copies a buffer allocated by SQLite and releases it.
///
/// # Safety
///
/// `ptr` must be null or a buffer of at least `len` bytes from `sqlite3_malloc`.
pub(crate) unsafe fn take_sqlite_buffer(ptr: *mut c_void, len: c_int) -> Vec<u8> {
   if ptr.is_null() {
      return Vec::new();
   }
   let bytes = if len > 0 {
      unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) }.to_vec()
   } else {
      Vec::new()
   };
   unsafe { ffi::sqlite3_free(ptr) };
   bytes
}

/// Replays `change_set` into the database behind `backend`.
///
/// Conflicts are resolved in favor of the change set: rows that differ or
/// already exist are replaced, rows that are gone or would violate a
/// constraint are skipped.
pub fn apply_change_set(backend: &Backend, change_set: &SessionChangeSet) -> Result<()> {
   if change_set.is_empty() {
      return Ok(());
   }

   let mut input: &[u8] = change_set.as_bytes();
   backend
      .connection()?
      .apply_strm(&mut input, None::<fn(&str) -> bool>, resolve_conflict)
      .map_err(|e| Error::from_rusqlite("changeset_apply", e))?;

   trace!(bytes = change_set.len(), "Applied change set");
   Ok(())
}

fn resolve_conflict(conflict: ConflictType, _item: ChangesetItem) -> ConflictAction {
   match conflict {
      ConflictType::SQLITE_CHANGESET_DATA | ConflictType::SQLITE_CHANGESET_CONFLICT => {
         ConflictAction::SQLITE_CHANGESET_REPLACE
      }
      ConflictType::SQLITE_CHANGESET_NOTFOUND
      | ConflictType::SQLITE_CHANGESET_CONSTRAINT
      | ConflictType::SQLITE_CHANGESET_FOREIGN_KEY => ConflictAction::SQLITE_CHANGESET_OMIT,
      _ => ConflictAction::SQLITE_CHANGESET_ABORT,
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_empty_change_set_decodes_to_nothing() {
      let change_set = SessionChangeSet::default();
      assert!(change_set.is_empty());
      assert!(change_set.changes().unwrap().is_empty());
      assert!(change_set.invert().unwrap().is_empty());
   }

   #[test]
   fn test_garbage_change_set_is_rejected() {
      let change_set = SessionChangeSet::from_bytes(vec![0xFF, 0x00, 0x13, 0x37]);
      assert!(change_set.changes().is_err());
      assert!(matches!(
         change_set.invert(),
         Err(Error::Session { operation: "changeset_invert", .. })
      ));
   }

   #[test]
   fn test_change_set_serializes_as_bytes() {
      let change_set = SessionChangeSet::from_bytes(vec![1, 2, 3]);
      let json = serde_json::to_string(&change_set).unwrap();
      let back: SessionChangeSet = serde_json::from_str(&json).unwrap();
      assert_eq!(back, change_set);
      assert_eq!(back.into_bytes(), vec![1, 2, 3]);
   }
}

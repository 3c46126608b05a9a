use std::ffi::c_char;

use libsqlite3_sys as ffi;
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Typed column value from SQLite.
///
/// Represents a single column's value with its native SQLite storage class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
   Null,
   Integer(i64),
   Real(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl ColumnValue {
   /// Copies a protected or unprotected `sqlite3_value` into an owned value.
   ///
   /// # Safety
   ///
   /// `value` must be a valid pointer obtained from SQLite and not yet released.
   pub unsafe fn from_raw(value: *mut ffi::sqlite3_value) -> Self {
      unsafe {
         match ffi::sqlite3_value_type(value) {
            ffi::SQLITE_INTEGER => ColumnValue::Integer(ffi::sqlite3_value_int64(value)),
            ffi::SQLITE_FLOAT => ColumnValue::Real(ffi::sqlite3_value_double(value)),
            ffi::SQLITE_TEXT => {
               let text = ffi::sqlite3_value_text(value) as *const c_char;
               let len = ffi::sqlite3_value_bytes(value) as usize;
               if text.is_null() {
                  return ColumnValue::Text(String::new());
               }
               let bytes = std::slice::from_raw_parts(text as *const u8, len);
               ColumnValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            ffi::SQLITE_BLOB => {
               let blob = ffi::sqlite3_value_blob(value);
               let len = ffi::sqlite3_value_bytes(value) as usize;
               if blob.is_null() || len == 0 {
                  return ColumnValue::Blob(Vec::new());
               }
               ColumnValue::Blob(std::slice::from_raw_parts(blob as *const u8, len).to_vec())
            }
            _ => ColumnValue::Null,
         }
      }
   }

   /// Returns true if this value is null.
   pub fn is_null(&self) -> bool {
      matches!(self, ColumnValue::Null)
   }

   /// Attempts to get this value as an integer.
   pub fn as_integer(&self) -> Option<i64> {
      match self {
         ColumnValue::Integer(i) => Some(*i),
         _ => None,
      }
   }

   /// Attempts to get this value as a float.
   pub fn as_real(&self) -> Option<f64> {
      match self {
         ColumnValue::Real(r) => Some(*r),
         _ => None,
      }
   }

   /// Attempts to get this value as a string reference.
   pub fn as_text(&self) -> Option<&str> {
      match self {
         ColumnValue::Text(s) => Some(s),
         _ => None,
      }
   }

   /// Attempts to get this value as a blob reference.
   pub fn as_blob(&self) -> Option<&[u8]> {
      match self {
         ColumnValue::Blob(b) => Some(b),
         _ => None,
      }
   }
}

impl From<ValueRef<'_>> for ColumnValue {
   fn from(value: ValueRef<'_>) -> Self {
      match value {
         ValueRef::Null => ColumnValue::Null,
         ValueRef::Integer(i) => ColumnValue::Integer(i),
         ValueRef::Real(r) => ColumnValue::Real(r),
         ValueRef::Text(text) => ColumnValue::Text(String::from_utf8_lossy(text).into_owned()),
         ValueRef::Blob(blob) => ColumnValue::Blob(blob.to_vec()),
      }
   }
}

impl ToSql for ColumnValue {
   fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
      Ok(ToSqlOutput::Borrowed(match self {
         ColumnValue::Null => ValueRef::Null,
         ColumnValue::Integer(i) => ValueRef::Integer(*i),
         ColumnValue::Real(r) => ValueRef::Real(*r),
         ColumnValue::Text(s) => ValueRef::Text(s.as_bytes()),
         ColumnValue::Blob(b) => ValueRef::Blob(b),
      }))
   }
}

impl From<i64> for ColumnValue {
   fn from(value: i64) -> Self {
      ColumnValue::Integer(value)
   }
}

impl From<f64> for ColumnValue {
   fn from(value: f64) -> Self {
      ColumnValue::Real(value)
   }
}

impl From<&str> for ColumnValue {
   fn from(value: &str) -> Self {
      ColumnValue::Text(value.to_string())
   }
}

impl From<String> for ColumnValue {
   fn from(value: String) -> Self {
      ColumnValue::Text(value)
   }
}

impl From<Vec<u8>> for ColumnValue {
   fn from(value: Vec<u8>) -> Self {
      ColumnValue::Blob(value)
   }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
   fn from(value: Option<T>) -> Self {
      value.map_or(ColumnValue::Null, Into::into)
   }
}

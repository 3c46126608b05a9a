//! Error types for sqlite-conn

use std::ffi::c_int;

use libsqlite3_sys as ffi;
use thiserror::Error;

/// Errors that may occur when working with a SQLite connection
#[derive(Error, Debug)]
pub enum Error {
   /// The database file could not be opened: inaccessible path, incompatible
   /// lock held by another connection, or an unreadable on-disk format.
   #[error("cannot open database '{path}': {message}")]
   Open {
      path: String,
      code: c_int,
      message: String,
   },

   /// A statement failed to prepare or run (malformed SQL, constraint violation, ...)
   #[error("execution failed: {message}")]
   Execution { code: c_int, message: String },

   /// The engine could not acquire a lock held by another connection within
   /// the configured busy policy.
   #[error("database is busy: {message}")]
   Busy { code: c_int, message: String },

   /// A pragma did not take the value that was requested.
   #[error("pragma '{pragma}' could not be set to '{expected}' (engine reports '{actual}')")]
   PragmaValueNotSet {
      pragma: String,
      expected: String,
      actual: String,
   },

   /// rusqlite rejected the call before the engine saw it: an interior NUL
   /// byte, a wrong parameter count, an oversized blob, ...
   #[error(transparent)]
   Driver(rusqlite::Error),

   /// The backend has no live connection
   #[error("backend is not connected")]
   NotConnected,
}

impl From<rusqlite::Error> for Error {
   fn from(err: rusqlite::Error) -> Self {
      match err {
         rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.unwrap_or_else(|| failure.to_string());
            Error::from_code_and_message(failure.extended_code, message)
         }
         other => Error::Driver(other),
      }
   }
}

impl Error {
   pub(crate) fn from_code_and_message(code: c_int, message: String) -> Self {
      match code & 0xff {
         ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => Error::Busy { code, message },
         _ => Error::Execution { code, message },
      }
   }

   /// The SQLite extended result code carried by this error, if any.
   pub fn sqlite_code(&self) -> Option<c_int> {
      match self {
         Error::Open { code, .. } | Error::Execution { code, .. } | Error::Busy { code, .. } => {
            Some(*code)
         }
         _ => None,
      }
   }

   /// Returns true for lock contention that outlasted the busy policy.
   pub fn is_busy(&self) -> bool {
      matches!(self, Error::Busy { .. })
   }

   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::Open { .. } => "OPEN_ERROR".to_string(),
         Error::Execution { code, .. } => format!("EXECUTION_ERROR_{}", code),
         Error::Busy { .. } => "BUSY".to_string(),
         Error::PragmaValueNotSet { .. } => "PRAGMA_VALUE_NOT_SET".to_string(),
         Error::Driver(_) => "DRIVER_ERROR".to_string(),
         Error::NotConnected => "NOT_CONNECTED".to_string(),
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_busy_and_locked_codes_map_to_busy() {
      let err = Error::from_code_and_message(ffi::SQLITE_BUSY, "database is locked".into());
      assert!(err.is_busy());
      assert_eq!(err.error_code(), "BUSY");

      // Extended code SQLITE_BUSY_SNAPSHOT keeps the primary code in the low byte
      let err = Error::from_code_and_message(ffi::SQLITE_BUSY | (2 << 8), "snapshot".into());
      assert!(err.is_busy());

      let err = Error::from_code_and_message(ffi::SQLITE_LOCKED, "table locked".into());
      assert!(err.is_busy());
   }

   #[test]
   fn test_other_codes_map_to_execution() {
      let err = Error::from_code_and_message(ffi::SQLITE_CONSTRAINT, "UNIQUE failed".into());
      assert!(!err.is_busy());
      assert_eq!(err.sqlite_code(), Some(ffi::SQLITE_CONSTRAINT));
      assert!(err.to_string().contains("UNIQUE failed"));
   }

   #[test]
   fn test_rusqlite_failures_keep_extended_code() {
      let failure = rusqlite::Error::SqliteFailure(
         ffi::Error::new(ffi::SQLITE_BUSY | (2 << 8)),
         Some("database is locked".into()),
      );
      let err = Error::from(failure);
      assert!(err.is_busy());
      assert_eq!(err.sqlite_code(), Some(ffi::SQLITE_BUSY | (2 << 8)));
      assert!(err.to_string().contains("database is locked"));
   }

   #[test]
   fn test_driver_errors_are_not_engine_errors() {
      let err = Error::from(rusqlite::Error::InvalidParameterCount(2, 1));
      assert_eq!(err.error_code(), "DRIVER_ERROR");
      assert_eq!(err.sqlite_code(), None);
      assert!(!err.is_busy());
   }

   #[test]
   fn test_pragma_error_display() {
      let err = Error::PragmaValueNotSet {
         pragma: "journal_mode".into(),
         expected: "wal".into(),
         actual: "memory".into(),
      };
      assert_eq!(err.error_code(), "PRAGMA_VALUE_NOT_SET");
      assert!(err.to_string().contains("journal_mode"));
      assert!(err.to_string().contains("memory"));
   }
}

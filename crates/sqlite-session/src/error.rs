//! Error types for the sqlite-session crate.

use std::ffi::{CStr, c_int};

use libsqlite3_sys as ffi;

/// Errors that can occur during change-capture operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The native session extension rejected an attach, detach or changeset call.
   #[error("session operation '{operation}' failed: {message}")]
   Session {
      operation: &'static str,
      code: c_int,
      message: String,
   },

   /// Reading or writing the change-set store failed.
   #[error(transparent)]
   Store(#[from] sqlite_conn::Error),

   /// The change-set store table cannot itself be recorded.
   #[error("table '{0}' holds recorded change sets and cannot be attached")]
   ReservedTable(String),

   /// The operation is only valid while no session is recording.
   #[error("a session is currently recording")]
   Recording,
}

impl Error {
   pub(crate) fn session(operation: &'static str, code: c_int) -> Self {
      let message = unsafe {
         let ptr = ffi::sqlite3_errstr(code);
         if ptr.is_null() {
            format!("SQLite error {}", code)
         } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
         }
      };
      Error::Session {
         operation,
         code,
         message,
      }
   }

   /// Maps an engine failure reported through rusqlite to a session error.
   pub(crate) fn from_rusqlite(operation: &'static str, err: rusqlite::Error) -> Self {
      match err {
         rusqlite::Error::SqliteFailure(failure, message) => Error::Session {
            operation,
            code: failure.extended_code,
            message: message.unwrap_or_else(|| failure.to_string()),
         },
         other => Error::Store(other.into()),
      }
   }

   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::Session { .. } => "SESSION_ERROR".to_string(),
         Error::Store(e) => e.error_code(),
         Error::ReservedTable(_) => "RESERVED_TABLE".to_string(),
         Error::Recording => "SESSION_RECORDING".to_string(),
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_session_error_reads_engine_description() {
      let err = Error::session("attach", ffi::SQLITE_NOMEM);
      assert_eq!(err.error_code(), "SESSION_ERROR");
      assert!(err.to_string().contains("attach"));
      assert!(err.to_string().contains("out of memory"));
   }

   #[test]
   fn test_store_error_keeps_backend_code() {
      let err = Error::from(sqlite_conn::Error::NotConnected);
      assert_eq!(err.error_code(), "NOT_CONNECTED");
   }
}

//! Error types for the database façade.

use crate::TransactionState;

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Connection`](crate::Connection) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Open, execution, busy and pragma failures reported by the connection.
   #[error(transparent)]
   Backend(#[from] sqlite_conn::Error),

   /// Change capture failed while the surrounding transaction operation
   /// otherwise succeeded.
   #[error(transparent)]
   Session(#[from] sqlite_session::Error),

   /// The caller broke the transaction or lifecycle rules. Retrying the same
   /// call cannot succeed.
   #[error(transparent)]
   Logic(#[from] LogicError),
}

/// Misuse of the connection lifecycle or transaction state machine.
///
/// Always raised before anything reaches the engine, so state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogicError {
   #[error("database is already open")]
   AlreadyOpen,

   #[error("database is not open")]
   NotOpen,

   #[error("{current} transaction already active")]
   TransactionActive { current: TransactionState },

   #[error("no transaction is active")]
   NoTransaction,

   /// Connection-level settings are fixed while the database is open.
   #[error("{setting} cannot be changed while the database is open")]
   OpenWhileConfiguring { setting: &'static str },

   /// The operation would interfere with the recording session.
   #[error("a session is currently recording")]
   SessionRecording,
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Backend(e) => e.error_code(),
         Error::Session(e) => e.error_code(),
         Error::Logic(_) => "LOGIC_ERROR".to_string(),
      }
   }

   /// True for lock contention that outlasted the busy policy. Safe to retry.
   pub fn is_busy(&self) -> bool {
      match self {
         Error::Backend(e) => e.is_busy(),
         Error::Session(sqlite_session::Error::Store(e)) => e.is_busy(),
         _ => false,
      }
   }

   pub fn is_logic_error(&self) -> bool {
      matches!(self, Error::Logic(_))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_codes() {
      assert_eq!(Error::from(LogicError::NoTransaction).error_code(), "LOGIC_ERROR");
      assert_eq!(
         Error::from(sqlite_conn::Error::NotConnected).error_code(),
         "NOT_CONNECTED"
      );
      assert_eq!(
         Error::from(sqlite_session::Error::Recording).error_code(),
         "SESSION_RECORDING"
      );
   }

   #[test]
   fn test_busy_is_detected_through_session_store() {
      let busy = || sqlite_conn::Error::Busy {
         code: 5,
         message: "database is locked".to_string(),
      };
      assert!(Error::from(busy()).is_busy());
      assert!(Error::from(sqlite_session::Error::Store(busy())).is_busy());
      assert!(!Error::from(LogicError::NotOpen).is_busy());
   }

   #[test]
   fn test_logic_error_message() {
      let err = Error::from(LogicError::TransactionActive {
         current: TransactionState::Immediate,
      });
      assert!(err.is_logic_error());
      assert_eq!(err.to_string(), "immediate transaction already active");
   }
}

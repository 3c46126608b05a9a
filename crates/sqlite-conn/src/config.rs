//! Configuration for a SQLite connection

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

use crate::log::EngineLog;

/// Strategy SQLite uses to journal pre-write state for atomic commit and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
   Delete,
   Truncate,
   Persist,
   Memory,
   #[default]
   Wal,
   Off,
}

impl JournalMode {
   /// Value used with `PRAGMA journal_mode`, as echoed back by the engine.
   pub fn as_pragma(self) -> &'static str {
      match self {
         JournalMode::Delete => "delete",
         JournalMode::Truncate => "truncate",
         JournalMode::Persist => "persist",
         JournalMode::Memory => "memory",
         JournalMode::Wal => "wal",
         JournalMode::Off => "off",
      }
   }

   /// Parses the value returned by `PRAGMA journal_mode`.
   pub fn from_pragma(value: &str) -> Option<Self> {
      match value.to_ascii_lowercase().as_str() {
         "delete" => Some(JournalMode::Delete),
         "truncate" => Some(JournalMode::Truncate),
         "persist" => Some(JournalMode::Persist),
         "memory" => Some(JournalMode::Memory),
         "wal" => Some(JournalMode::Wal),
         "off" => Some(JournalMode::Off),
         _ => None,
      }
   }
}

/// Whether the connection holds its file lock for its whole lifetime or
/// negotiates locks per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockingMode {
   #[default]
   Default,
   Exclusive,
}

impl LockingMode {
   /// Value used with `PRAGMA locking_mode`, as echoed back by the engine.
   pub fn as_pragma(self) -> &'static str {
      match self {
         LockingMode::Default => "normal",
         LockingMode::Exclusive => "exclusive",
      }
   }
}

/// Access and creation policy for opening the database file.
///
/// SQLite only accepts three combinations; a read-only open never creates the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
   /// Read-only, the file must exist
   ReadOnly,
   /// Read-write, the file must exist
   ReadWrite,
   /// Read-write, the file is created if missing
   #[default]
   ReadWriteCreate,
}

impl OpenMode {
   pub(crate) fn flags(self) -> OpenFlags {
      let access = match self {
         OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
         OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
         OpenMode::ReadWriteCreate => {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
         }
      };
      // FULLMUTEX keeps the handle safe to move between threads; the
      // database-level lock is what serializes callers.
      access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_FULL_MUTEX
   }

   pub fn is_read_only(self) -> bool {
      matches!(self, OpenMode::ReadOnly)
   }
}

/// Callback consulted by the engine on every contention event.
///
/// Receives the number of times it has already been invoked for the current
/// lock attempt and returns `true` to keep retrying or `false` to give up with
/// a busy error.
#[derive(Clone)]
pub struct BusyHandler(Arc<dyn Fn(u32) -> bool + Send + Sync>);

impl BusyHandler {
   pub fn new<F>(handler: F) -> Self
   where
      F: Fn(u32) -> bool + Send + Sync + 'static,
   {
      Self(Arc::new(handler))
   }

   /// Sleeps 10ms between attempts and never gives up.
   pub fn sleep_and_retry() -> Self {
      Self::new(|_| {
         std::thread::sleep(Duration::from_millis(10));
         true
      })
   }

   pub(crate) fn call(&self, attempts: u32) -> bool {
      (self.0)(attempts)
   }
}

impl fmt::Debug for BusyHandler {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("BusyHandler(..)")
   }
}

impl Default for BusyHandler {
   fn default() -> Self {
      Self::sleep_and_retry()
   }
}

/// How the connection reacts when another connection holds a needed lock.
///
/// Exactly one policy is active on an open connection; it is chosen at open time.
#[derive(Debug, Clone)]
pub enum BusyPolicy {
   /// The engine retries internally until the duration elapses, then reports busy
   Timeout(Duration),
   /// The engine invokes the handler on every contention event
   Handler(BusyHandler),
}

impl BusyPolicy {
   /// Uses a fixed timeout when `timeout` is non-zero and the default
   /// sleep-and-retry handler otherwise.
   pub fn from_timeout(timeout: Duration) -> Self {
      if timeout > Duration::ZERO {
         BusyPolicy::Timeout(timeout)
      } else {
         BusyPolicy::Handler(BusyHandler::default())
      }
   }
}

impl Default for BusyPolicy {
   fn default() -> Self {
      BusyPolicy::Handler(BusyHandler::default())
   }
}

/// Settings applied when a [`Backend`](crate::Backend) opens its connection
///
/// # Examples
///
/// ```
/// use sqlite_conn::{BusyPolicy, JournalMode, OpenOptions};
/// use std::time::Duration;
///
/// // Use defaults
/// let options = OpenOptions::default();
///
/// // Override just what you need
/// let options = OpenOptions {
///     journal_mode: JournalMode::Delete,
///     busy_policy: BusyPolicy::Timeout(Duration::from_millis(250)),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
   /// Access and creation policy
   ///
   /// Default: read-write, create if missing
   pub open_mode: OpenMode,

   /// Journal mode applied right after the file is opened
   ///
   /// Default: WAL
   pub journal_mode: JournalMode,

   /// Locking mode applied right after the file is opened
   ///
   /// Default: normal (per-transaction) locking
   pub locking_mode: LockingMode,

   /// Contention policy
   ///
   /// Default: sleep 10ms and retry indefinitely
   pub busy_policy: BusyPolicy,

   /// Engine logging environment shared by every connection that uses it
   pub engine_log: Arc<EngineLog>,
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_journal_mode_pragma_round_trip() {
      for mode in [
         JournalMode::Delete,
         JournalMode::Truncate,
         JournalMode::Persist,
         JournalMode::Memory,
         JournalMode::Wal,
         JournalMode::Off,
      ] {
         assert_eq!(JournalMode::from_pragma(mode.as_pragma()), Some(mode));
      }
      assert_eq!(JournalMode::from_pragma("WAL"), Some(JournalMode::Wal));
      assert_eq!(JournalMode::from_pragma("bogus"), None);
   }

   #[test]
   fn test_busy_policy_from_timeout() {
      assert!(matches!(
         BusyPolicy::from_timeout(Duration::from_millis(5)),
         BusyPolicy::Timeout(d) if d == Duration::from_millis(5)
      ));
      assert!(matches!(
         BusyPolicy::from_timeout(Duration::ZERO),
         BusyPolicy::Handler(_)
      ));
   }

   #[test]
   fn test_open_mode_flags() {
      assert!(OpenMode::ReadOnly.flags().contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
      assert!(!OpenMode::ReadWrite.flags().contains(OpenFlags::SQLITE_OPEN_CREATE));
      assert!(OpenMode::ReadWriteCreate.flags().contains(OpenFlags::SQLITE_OPEN_CREATE));
      assert!(OpenMode::ReadWrite.flags().contains(OpenFlags::SQLITE_OPEN_FULL_MUTEX));
   }

   #[test]
   fn test_config_enums_serialize_lowercase() {
      let json = serde_json::to_string(&JournalMode::Wal).unwrap();
      assert_eq!(json, "\"wal\"");
      let json = serde_json::to_string(&OpenMode::ReadWriteCreate).unwrap();
      assert_eq!(json, "\"read_write_create\"");
   }
}

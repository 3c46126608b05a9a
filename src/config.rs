//! Configuration for a [`Database`](crate::Database)

use std::sync::Arc;

use sqlite_conn::{BusyPolicy, EngineLog, JournalMode, LockingMode, OpenMode, OpenOptions};
use sqlite_session::{DEFAULT_DATABASE_NAME, DEFAULT_SESSION_TABLE};

/// Settings that persist across open/close cycles of a database
///
/// The locking mode is chosen per [`open`](crate::Connection::open) call and is
/// therefore not part of this struct.
///
/// # Examples
///
/// ```
/// use sqlite_database::{BusyPolicy, DatabaseConfig, JournalMode};
/// use std::time::Duration;
///
/// // Use defaults
/// let config = DatabaseConfig::default();
///
/// // Override just what you need
/// let config = DatabaseConfig {
///     journal_mode: JournalMode::Delete,
///     busy_policy: BusyPolicy::Timeout(Duration::from_secs(2)),
///     attached_tables: vec!["notes".to_string()],
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
   /// Default: read-write, create if missing
   pub open_mode: OpenMode,

   /// Default: WAL
   pub journal_mode: JournalMode,

   /// Default: sleep 10ms and retry indefinitely
   pub busy_policy: BusyPolicy,

   /// Engine logging environment handed to every connection opened with this config
   pub engine_log: Arc<EngineLog>,

   /// Tables recorded by session transactions
   ///
   /// Default: none
   pub attached_tables: Vec<String>,

   /// Table that stores committed change sets
   ///
   /// Default: `databaseSessions`
   pub session_table: String,

   /// Schema recorded by session transactions
   ///
   /// Default: `main`
   pub database_name: String,
}

impl DatabaseConfig {
   pub(crate) fn open_options(&self, locking_mode: LockingMode) -> OpenOptions {
      OpenOptions {
         open_mode: self.open_mode,
         journal_mode: self.journal_mode,
         locking_mode,
         busy_policy: self.busy_policy.clone(),
         engine_log: Arc::clone(&self.engine_log),
      }
   }
}

impl Default for DatabaseConfig {
   fn default() -> Self {
      Self {
         open_mode: OpenMode::default(),
         journal_mode: JournalMode::default(),
         busy_policy: BusyPolicy::default(),
         engine_log: Arc::default(),
         attached_tables: Vec::new(),
         session_table: DEFAULT_SESSION_TABLE.to_string(),
         database_name: DEFAULT_DATABASE_NAME.to_string(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults() {
      let config = DatabaseConfig::default();
      assert_eq!(config.open_mode, OpenMode::ReadWriteCreate);
      assert_eq!(config.journal_mode, JournalMode::Wal);
      assert!(matches!(config.busy_policy, BusyPolicy::Handler(_)));
      assert!(config.attached_tables.is_empty());
      assert_eq!(config.session_table, "databaseSessions");
      assert_eq!(config.database_name, "main");
   }

   #[test]
   fn test_open_options_share_engine_log() {
      let config = DatabaseConfig::default();
      let options = config.open_options(LockingMode::Exclusive);
      assert_eq!(options.locking_mode, LockingMode::Exclusive);
      assert!(Arc::ptr_eq(&options.engine_log, &config.engine_log));
   }
}

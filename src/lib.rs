//! # sqlite-database
//!
//! A synchronous SQLite database with an explicit transaction state machine
//! and row-level change capture.
//!
//! ## Core Types
//!
//! - **[`Database`]**: thread-safe owner of one connection; [`Database::lock`] hands out a guard
//! - **[`Connection`]**: open/close, SQL execution, transactions and session operations
//! - **[`TransactionState`]**: none, deferred, immediate or exclusive
//! - **[`Transaction`]** / **[`SessionTransaction`]**: scoped transactions that roll back on drop
//! - **[`SessionChangeSet`]**: the recorded mutations of one committed session
//! - **[`Error`]**: backend, session and logic errors
//!
//! ## Sessions
//!
//! A session records every insert, update and delete on the attached tables
//! for exactly one immediate transaction:
//!
//! ```no_run
//! use sqlite_database::{Database, DatabaseConfig};
//!
//! # fn example() -> sqlite_database::Result<()> {
//! let db = Database::open_with("app.db", DatabaseConfig {
//!    attached_tables: vec!["T".to_string()],
//!    ..Default::default()
//! })?;
//!
//! let mut conn = db.lock();
//! let mut tx = conn.session_transaction()?;
//! tx.execute("UPDATE T SET x = 1 WHERE id = 1")?;
//! if let Some(change_set) = tx.commit()? {
//!    for change in change_set.changes()? {
//!       println!("{} {:?}", change.table, change.operation);
//!    }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod database;
mod error;
mod statements;
mod transaction;

pub use config::DatabaseConfig;
pub use database::{Connection, Database, DatabaseGuard};
pub use error::{Error, LogicError, Result};
pub use transaction::{SessionTransaction, Transaction, TransactionKind, TransactionState};

pub use sqlite_conn::{
   Backend, BusyHandler, BusyPolicy, ColumnValue, EngineLog, JournalMode, LockingMode, OpenMode,
};
pub use sqlite_session::{ChangeOperation, SessionChange, SessionChangeSet, SessionChangeSets};

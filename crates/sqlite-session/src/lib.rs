//! # sqlite-session
//!
//! Row-level change capture for a [`sqlite_conn::Backend`], built on SQLite's
//! native session extension.
//!
//! ## Core Types
//!
//! - **[`Sessions`]**: records mutations on attached tables for one window at a time
//! - **[`SessionChangeSet`]**: immutable, serializable output of one completed window
//! - **[`SessionChange`]**: one decoded row mutation
//!
//! Change sets are stored in a table (default `databaseSessions`) inside the
//! same transaction that produced them, and can be replayed with
//! [`apply_change_set`] or coalesced with [`Sessions::apply_and_update_sessions`].
//!
//! # Example
//!
//! ```no_run
//! use sqlite_conn::{Backend, OpenOptions};
//! use sqlite_session::{DEFAULT_DATABASE_NAME, DEFAULT_SESSION_TABLE, Sessions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let backend = Backend::open("app.db", &OpenOptions::default())?;
//!    let mut sessions = Sessions::new(&backend, DEFAULT_DATABASE_NAME, DEFAULT_SESSION_TABLE)?;
//!    sessions.set_attached_tables(["users"])?;
//!
//!    backend.execute("BEGIN IMMEDIATE")?;
//!    sessions.create(&backend)?;
//!    backend.execute("UPDATE users SET name = 'Alice' WHERE id = 1")?;
//!    let change_set = sessions.commit(&backend)?;
//!    backend.execute("COMMIT")?;
//!    sessions.publish();
//!
//!    if let Some(change_set) = change_set {
//!       for change in change_set.changes()? {
//!          println!("{} {:?} {:?}", change.table, change.operation, change.primary_key);
//!       }
//!    }
//!    Ok(())
//! }
//! ```

mod change;
mod error;
mod schema;
mod session;

pub use change::{
   ChangeOperation, SessionChange, SessionChangeSet, SessionChangeSets, apply_change_set,
};
pub use error::{Error, Result};
pub use schema::{TableInfo, query_table_info};
pub use session::{DEFAULT_DATABASE_NAME, DEFAULT_SESSION_TABLE, SessionState, Sessions};

pub use sqlite_conn::ColumnValue;

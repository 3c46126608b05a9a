//! # sqlite-conn
//!
//! A thin, synchronous owner of one SQLite connection, built on `rusqlite`.
//!
//! ## Core Types
//!
//! - **[`Backend`]**: the native connection; open/close, raw SQL, cached statements, pragmas and busy policy
//! - **[`HandleLease`]**: access to the native handle for objects that outlive a borrow of the backend
//! - **[`OpenOptions`]**: open mode, journal mode, locking mode and busy policy
//! - **[`EngineLog`]**: explicit process-wide engine logging state
//! - **[`Error`]**: error type for connection operations
//!
//! ## Busy policy
//!
//! Exactly one of two policies is active on an open connection:
//! - **[`BusyPolicy::Timeout`]**: the engine retries internally for a fixed duration
//! - **[`BusyPolicy::Handler`]**: a callback decides after every contention event

mod backend;
mod config;
mod error;
mod log;
mod value;

// Re-export public types
pub use backend::{Backend, HandleLease};
pub use config::{BusyHandler, BusyPolicy, JournalMode, LockingMode, OpenMode, OpenOptions};
pub use error::{Error, Result};
pub use log::EngineLog;
pub use value::ColumnValue;

/// Re-exported so dependent crates reach the same native bindings.
pub use libsqlite3_sys as ffi;
pub use rusqlite;

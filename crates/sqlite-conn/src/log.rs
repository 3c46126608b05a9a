//! Engine logging environment
//!
//! SQLite's error log is a process-wide setting that can only be installed
//! before the library initializes. [`EngineLog`] makes that state explicit:
//! applications create one (usually at startup), call [`EngineLog::activate`]
//! before opening the first connection, and hand it to every backend they open.
//! Tests create a fresh instance per case.
//!
//! Rules:
//! - `activate` installs the global callback at most once per process. Calling it
//!   after SQLite initialized reports the engine's misuse error; the callback, once
//!   installed, stays in place until the process exits.
//! - Statement tracing is per instance: backends opened with an `EngineLog` whose
//!   `trace_statements` flag is set register a statement tracer on their connection.

use std::ffi::c_int;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use libsqlite3_sys as ffi;
use rusqlite::Connection;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Result code of the one attempt this process makes to install the log callback
static GLOBAL_LOG_INSTALL: OnceLock<c_int> = OnceLock::new();

/// Process-wide SQLite logging state
#[derive(Debug, Default)]
pub struct EngineLog {
   trace_statements: AtomicBool,
}

impl EngineLog {
   pub fn new() -> Self {
      Self::default()
   }

   /// Forwards SQLite's internal error log to `tracing` (target `sqlite::engine`).
   ///
   /// Idempotent; only the first call in the process talks to the engine, later
   /// calls report the outcome of that first attempt.
   pub fn activate(&self) -> Result<()> {
      let code = *GLOBAL_LOG_INSTALL.get_or_init(|| {
         // SAFETY: the callback only formats its arguments and emits a tracing event
         match unsafe { rusqlite::trace::config_log(Some(engine_log_callback)) } {
            Ok(()) => ffi::SQLITE_OK,
            Err(rusqlite::Error::SqliteFailure(failure, _)) => failure.extended_code,
            Err(_) => ffi::SQLITE_MISUSE,
         }
      });

      if code != ffi::SQLITE_OK {
         return Err(Error::from_code_and_message(
            code,
            "engine log must be activated before SQLite initializes".to_string(),
         ));
      }

      debug!("SQLite engine log forwarding active");
      Ok(())
   }

   /// Whether the process-wide callback has been installed.
   pub fn is_active(&self) -> bool {
      GLOBAL_LOG_INSTALL.get() == Some(&ffi::SQLITE_OK)
   }

   pub fn set_trace_statements(&self, enabled: bool) {
      self.trace_statements.store(enabled, Ordering::Relaxed);
   }

   pub fn trace_statements(&self) -> bool {
      self.trace_statements.load(Ordering::Relaxed)
   }

   /// Registers statement tracing on `conn` if this environment asks for it.
   pub(crate) fn install_on(&self, conn: &mut Connection) {
      if self.trace_statements() {
         conn.trace(Some(trace_statement));
      }
   }
}

fn engine_log_callback(code: c_int, message: &str) {
   match code & 0xff {
      ffi::SQLITE_NOTICE | ffi::SQLITE_WARNING => {
         debug!(target: "sqlite::engine", code, "{}", message)
      }
      _ => warn!(target: "sqlite::engine", code, "{}", message),
   }
}

fn trace_statement(sql: &str) {
   trace!(target: "sqlite::statement", sql, "Running statement");
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{Backend, JournalMode, OpenOptions};
   use parking_lot::Mutex;
   use std::sync::Arc;

   #[test]
   fn test_trace_statements_toggle_is_per_instance() {
      let first = EngineLog::new();
      let second = EngineLog::new();

      first.set_trace_statements(true);
      assert!(first.trace_statements());
      assert!(!second.trace_statements());
   }

   #[derive(Clone, Default)]
   struct CapturedLines(Arc<Mutex<Vec<u8>>>);

   impl std::io::Write for CapturedLines {
      fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
         self.0.lock().extend_from_slice(buf);
         Ok(buf.len())
      }

      fn flush(&mut self) -> std::io::Result<()> {
         Ok(())
      }
   }

   #[test]
   fn test_traced_connection_emits_statement_events() {
      let captured = CapturedLines::default();
      let writer = captured.clone();
      let subscriber = tracing_subscriber::fmt()
         .with_max_level(tracing::Level::TRACE)
         .with_ansi(false)
         .with_writer(move || writer.clone())
         .finish();

      let engine_log = Arc::new(EngineLog::new());
      engine_log.set_trace_statements(true);
      let options = OpenOptions {
         journal_mode: JournalMode::Memory,
         engine_log,
         ..Default::default()
      };

      tracing::subscriber::with_default(subscriber, || {
         let backend = Backend::open(":memory:", &options).unwrap();
         backend.execute("CREATE TABLE traced (id INTEGER PRIMARY KEY)").unwrap();
      });

      let output = String::from_utf8(captured.0.lock().clone()).unwrap();
      assert!(output.contains("sqlite::statement"), "{output}");
      assert!(output.contains("CREATE TABLE traced"), "{output}");
   }
}

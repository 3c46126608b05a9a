//! Schema introspection for attached tables.
//!
//! The session extension silently ignores tables that do not exist or have no
//! PRIMARY KEY, so attaching them yields change sets that are always empty.
//! These helpers let the engine warn about that up front.

use sqlite_conn::{Backend, ColumnValue};

/// Schema information for an attached table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
   /// Column indices that form the primary key, in declaration order.
   /// Empty when the table has no explicit primary key.
   pub pk_columns: Vec<usize>,
}

impl TableInfo {
   /// Whether the session extension can record this table.
   pub fn is_recordable(&self) -> bool {
      !self.pk_columns.is_empty()
   }
}

/// Queries the schema information for `table_name` in `database_name`.
///
/// Returns `None` if the table doesn't exist.
pub fn query_table_info(
   backend: &Backend,
   database_name: &str,
   table_name: &str,
) -> sqlite_conn::Result<Option<TableInfo>> {
   // PRAGMA table_info returns: cid, name, type, notnull, dflt_value, pk
   // pk is 0 for non-PK columns, or 1-indexed position for PK columns
   let pragma = format!(
      "PRAGMA {}.table_info({})",
      quote_identifier(database_name),
      quote_identifier(table_name)
   );

   let rows = backend.fetch_all(&pragma, &[])?;
   if rows.is_empty() {
      return Ok(None); // Table doesn't exist
   }

   // Collect (cid, pk_position) for columns that are part of the PK
   let mut pk_columns: Vec<(usize, i64)> = rows
      .iter()
      .filter_map(|row| match (row.first(), row.get(5)) {
         (Some(ColumnValue::Integer(cid)), Some(ColumnValue::Integer(pk))) if *pk > 0 => {
            usize::try_from(*cid).ok().map(|cid| (cid, *pk))
         }
         _ => None,
      })
      .collect();

   // Sort by pk position to get correct order for composite PKs
   pk_columns.sort_by_key(|(_, pk_pos)| *pk_pos);

   Ok(Some(TableInfo {
      pk_columns: pk_columns.into_iter().map(|(cid, _)| cid).collect(),
   }))
}

/// Quotes a SQLite identifier to prevent SQL injection.
pub(crate) fn quote_identifier(name: &str) -> String {
   // Double any existing double quotes and wrap in double quotes
   format!("\"{}\"", name.replace('"', "\"\""))
}

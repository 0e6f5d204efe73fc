//! Similarity index database migrations
//!
//! SQL migrations are embedded as strings and executed when the index opens.

use rusqlite::Connection;

use crate::error::Result;

/// Document tables SQL (001)
pub const DOCUMENT_TABLES_SQL: &str = include_str!("001_document_tables.sql");

/// Run all similarity index migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(DOCUMENT_TABLES_SQL)?;
    Ok(())
}

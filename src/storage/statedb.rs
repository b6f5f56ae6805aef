//! Read-only access to embedded application state databases
//!
//! The VS Code-derived editors keep a key-value `ItemTable` inside a WAL-mode
//! SQLite file (`state.vscdb`). The owning application holds the write lock,
//! so we open READ_WRITE (not READONLY) to let SQLite attach the WAL -shm
//! correctly; we never issue a write.

use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateDbError {
    #[error("Failed to open database at {path}: {message}")]
    Open { path: String, message: String },
    #[error("Failed to run query: {0}")]
    Query(String),
}

pub type Row = HashMap<String, String>;

/// Read-only SQL access to an embedded key-value database.
pub trait StateDb: Send + Sync {
    fn query(&self, db_path: &Path, sql: &str) -> Result<Vec<Row>, StateDbError>;
}

pub struct SqliteStateDb;

impl SqliteStateDb {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteStateDb {
    fn default() -> Self {
        Self::new()
    }
}

impl StateDb for SqliteStateDb {
    fn query(&self, db_path: &Path, sql: &str) -> Result<Vec<Row>, StateDbError> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StateDbError::Open {
            path: db_path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StateDbError::Query(e.to_string()))?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = Vec::new();
        let mut raw_rows = stmt
            .query([])
            .map_err(|e| StateDbError::Query(e.to_string()))?;
        while let Some(raw) = raw_rows
            .next()
            .map_err(|e| StateDbError::Query(e.to_string()))?
        {
            let mut row = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = match raw.get_ref(i) {
                    Ok(rusqlite::types::ValueRef::Text(text)) => {
                        String::from_utf8_lossy(text).into_owned()
                    }
                    Ok(rusqlite::types::ValueRef::Integer(n)) => n.to_string(),
                    Ok(rusqlite::types::ValueRef::Real(f)) => f.to_string(),
                    _ => continue,
                };
                row.insert(name.clone(), value);
            }
            rows.push(row);
        }

        Ok(rows)
    }
}

/// Look up a single value in the `ItemTable` key-value table.
pub fn read_item(db: &dyn StateDb, db_path: &Path, key: &str) -> Option<String> {
    let sql = format!(
        "SELECT value FROM ItemTable WHERE key = '{}' LIMIT 1",
        key.replace('\'', "''")
    );
    let rows = db.query(db_path, &sql).ok()?;
    rows.first()?.get("value").cloned().filter(|v| !v.is_empty())
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use super::error::Result;
use super::keyed_store::{Document, KeyedStore};
use super::notifier::ChangeNotifier;

/// Shared handle to the SQLite file holding every logical document table.
///
/// All tables live in one `documents` relation keyed by `(tbl, key)`, so a
/// table is just a name and needs no schema of its own. Every view of a table
/// name shares that table's [`ChangeNotifier`].
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    notifiers: Arc<Mutex<HashMap<String, ChangeNotifier>>>,
}

impl Database {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening document database");

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// Volatile database, used in tests
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (tbl, key)
            ) WITHOUT ROWID;
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            notifiers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Typed view over one named table
    pub fn table<T: Document>(&self, name: &str) -> KeyedStore<T> {
        KeyedStore::new(self.clone(), name)
    }

    pub(crate) fn notifier(&self, table: &str) -> ChangeNotifier {
        self.notifiers
            .lock()
            .entry(table.to_string())
            .or_default()
            .clone()
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

//! C1 — embedded SQL engine wrapper. One writer connection, WAL
//! journaling, foreign keys on. Grounded in `skynet-sessions::SessionManager`
//! (single `Mutex<Connection>`) generalized with a `transaction` helper
//! so every mutating queue/history/cursor operation runs inside one
//! transaction, per spec.md §4.1.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};

use crate::error::Result;
use crate::schema;

/// The single embedded store shared by every component. Lifecycle =
/// process (spec.md §5, "Shared state").
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the database at `path`, or an
    /// in-memory database when `path` is `:memory:` (used by tests).
    pub fn open(path: &Path) -> Result<Self> {
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        };

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::init(&conn)?;

        tracing::info!(path = %path.display(), "store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a single SQL transaction, committing on `Ok` and
    /// rolling back on `Err`. Every mutating operation on the inbox,
    /// outbox, and cursor goes through this to preserve their
    /// invariants under a crash (spec.md §4.1).
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Delete all inbox and outbox rows. Not reachable over HTTP
    /// (spec.md §6.1 lists no admin route for it); exists for tests
    /// and a future admin surface per SPEC_FULL.md §F.
    pub fn purge(&self) -> Result<()> {
        self.transaction(|tx| {
            tx.execute("DELETE FROM inbox_messages", [])?;
            tx.execute("DELETE FROM outbox_messages", [])?;
            Ok(())
        })
    }
}

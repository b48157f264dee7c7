//! Nestable transactions.
//!
//! Archiving an object graph re-enters the archive once per nested object, and each of those calls opens its own
//! [Transaction].  Only the outermost one talks to sqlite: it issues `BEGIN` when created and `COMMIT` or `ROLLBACK`
//! when dropped.  The inner ones just move a shared depth counter up and down, so the whole graph lands in one sqlite
//! transaction.
//!
//! Unlike `rusqlite::Transaction`, dropping rolls back only at the outermost level; an inner transaction that isn't
//! marked successful has no effect of its own.  The error it returned is expected to propagate up so that the outer
//! level isn't marked either.
use std::cell::Cell;

use log::*;

use crate::{Database, Result};

pub(crate) const BEGIN_SQL: &str = "BEGIN";
pub(crate) const COMMIT_SQL: &str = "COMMIT";
pub(crate) const ROLLBACK_SQL: &str = "ROLLBACK";

/// The statements every transaction may run.  Prepared when the database opens.  The database sizes the statement
/// cache so that these are never evicted.
pub(crate) const STANDING_STATEMENTS: [&str; 3] = [BEGIN_SQL, COMMIT_SQL, ROLLBACK_SQL];

pub struct Transaction<'a> {
    database: &'a Database,
    nesting: &'a Cell<u64>,

    /// Set if this transaction issued the `BEGIN`, and so must finish it.
    cleanup: bool,

    successful: bool,
}

fn run_standing(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<()> {
    conn.prepare_cached(sql)?.raw_execute()?;
    Ok(())
}

impl<'a> Transaction<'a> {
    /// Join the transaction in progress or, if there isn't one, begin one.
    ///
    /// If `BEGIN` fails, the counter is left alone and nothing happens on drop.
    pub(crate) fn new(database: &'a Database, nesting: &'a Cell<u64>) -> Result<Self> {
        let cleanup = nesting.get() == 0;
        if cleanup {
            trace!("{}", BEGIN_SQL);
            run_standing(database.connection(), BEGIN_SQL)?;
        }

        nesting.set(nesting.get() + 1);
        Ok(Transaction {
            database,
            nesting,
            cleanup,
            successful: false,
        })
    }

    /// Commit when this transaction is dropped, if it is the outermost one.
    pub fn mark_successful(&mut self) {
        self.successful = true;
    }

    pub fn is_outermost(&self) -> bool {
        self.cleanup
    }

    pub fn depth(&self) -> u64 {
        self.nesting.get()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let depth = self.nesting.get();
        debug_assert!(depth > 0, "Transaction nesting counter underflow");
        let depth = depth.saturating_sub(1);
        self.nesting.set(depth);

        if depth != 0 || !self.cleanup {
            return;
        }

        let sql = if self.successful {
            COMMIT_SQL
        } else {
            ROLLBACK_SQL
        };
        trace!("{}", sql);

        // Sqlite promises that these succeed after a successful BEGIN.  If they don't, the connection is in a state we
        // can't reason about.
        if let Err(e) = run_standing(self.database.connection(), sql) {
            panic!("{} failed after a successful {}: {}", sql, BEGIN_SQL, e);
        }

        if self.successful {
            self.database.tables_committed();
        } else {
            self.database.tables_rolled_back();
        }
    }
}

//! The database wraps a rusqlite connection and the registrations of every type archived through it.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use log::*;

use crate::registration::{ArchiveDef, ClassRegistration};
use crate::transaction::{Transaction, STANDING_STATEMENTS};
use crate::{ArchiveConfig, Result};

pub struct Database {
    conn: rusqlite::Connection,

    /// Maps table name to the registration built for it.  Invalid registrations are kept too, so that a broken def
    /// only tries to create its table once.
    registrations: RefCell<HashMap<String, Rc<ClassRegistration>>>,

    /// Registrations whose table was created since the last commit.
    uncommitted_tables: RefCell<Vec<Rc<ClassRegistration>>>,

    /// Current capacity of the connection's statement cache.
    statement_cache_capacity: Cell<usize>,

    config: ArchiveConfig,
}

/// Statements each registered type may keep in the cache: one insert and two queries.
const STATEMENTS_PER_REGISTRATION: usize = 3;

impl Database {
    /// Open or create an on-disk database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Database::open_with_config(ArchiveConfig::new(path))
    }

    pub fn open_in_memory() -> Result<Self> {
        Database::open_with_config(ArchiveConfig::in_memory())
    }

    pub fn open_with_config(config: ArchiveConfig) -> Result<Self> {
        let conn = match config.path.as_ref() {
            Some(p) => {
                info!("Opening database at {}", p.display());
                rusqlite::Connection::open(p)?
            }
            None => {
                info!("Opening in-memory database");
                rusqlite::Connection::open_in_memory()?
            }
        };
        Database::with_connection(conn, config)
    }

    /// Build a database from an already-existing connection.
    ///
    /// The connection must not be inside a transaction.
    pub fn with_connection(conn: rusqlite::Connection, config: ArchiveConfig) -> Result<Self> {
        let capacity = config
            .statement_cache_capacity
            .max(STANDING_STATEMENTS.len());
        conn.set_prepared_statement_cache_capacity(capacity);
        conn.execute_batch(&config.initial_sql()?)?;

        for sql in STANDING_STATEMENTS {
            conn.prepare_cached(sql)?;
        }

        Ok(Database {
            conn,
            registrations: Default::default(),
            uncommitted_tables: Default::default(),
            statement_cache_capacity: Cell::new(capacity),
            config,
        })
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub(crate) fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Capacity of the statement cache.  Never below what the transaction statements and every registered type need
    /// together, so the cache never evicts them.
    pub fn statement_cache_capacity(&self) -> usize {
        self.statement_cache_capacity.get()
    }

    fn grow_statement_cache(&self) {
        let needed = STANDING_STATEMENTS.len() + STATEMENTS_PER_REGISTRATION * self.registrations.borrow().len();
        if needed > self.statement_cache_capacity.get() {
            debug!("Growing statement cache to {}", needed);
            self.conn.set_prepared_statement_cache_capacity(needed);
            self.statement_cache_capacity.set(needed);
        }
    }

    /// Get the registration for a def, building it on first use.
    ///
    /// The result may be invalid; check [ClassRegistration::is_valid].  Registrations are keyed by table name alone,
    /// so the same registration comes back for the lifetime of this database even if a later def disagrees with it.
    pub fn get_registration(&self, def: &ArchiveDef) -> Rc<ClassRegistration> {
        if let Some(r) = self.registrations.borrow().get(def.table_name) {
            if !r.matches(def) {
                warn!(
                    "Table {:?} is already registered with a different definition; using the existing one",
                    def.table_name
                );
            }
            return r.clone();
        }

        let registration = Rc::new(ClassRegistration::new(&self.conn, def));
        if registration.is_valid() && self.is_in_transaction() {
            self.uncommitted_tables
                .borrow_mut()
                .push(registration.clone());
        }

        let registration = self
            .registrations
            .borrow_mut()
            .entry(def.table_name.to_string())
            .or_insert(registration)
            .clone();
        self.grow_statement_cache();
        registration
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.borrow().len()
    }

    pub fn last_insert_row_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// True while an outermost [Transaction] is alive.
    pub fn is_in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Join or begin a transaction whose depth is tracked by `nesting`.
    ///
    /// All transactions against this database must share one counter.
    pub fn create_transaction<'a>(&'a self, nesting: &'a Cell<u64>) -> Result<Transaction<'a>> {
        Transaction::new(self, nesting)
    }

    /// Called by the outermost transaction after `COMMIT`.
    pub(crate) fn tables_committed(&self) {
        self.uncommitted_tables.borrow_mut().clear();
    }

    /// Called by the outermost transaction after `ROLLBACK`, which also undid any `CREATE TABLE` since the last commit.
    ///
    /// The registrations stay on the list: they get their tables back the next time they build a statement, and that
    /// may happen inside a transaction which rolls back too.
    pub(crate) fn tables_rolled_back(&self) {
        for r in self.uncommitted_tables.borrow().iter() {
            r.forget_table();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const DEF: ArchiveDef = ArchiveDef::new("things", false, &[1, 2]);

    #[test]
    fn opens() {
        let tdir = tempfile::TempDir::new().unwrap();
        Database::open(tdir.path().join("db.sqlite")).expect("Database should open");
    }

    #[test]
    fn opens_twice() {
        let tdir = tempfile::TempDir::new().unwrap();
        let path = tdir.path().join("db.sqlite");
        {
            let db = Database::open(&path).expect("Database should open");
            assert!(db.get_registration(&DEF).is_valid());
        }
        let db = Database::open(&path).expect("Database should open");
        assert!(db.get_registration(&DEF).is_valid());
    }

    #[test]
    fn fails_to_open_in_missing_directory() {
        let tdir = tempfile::TempDir::new().unwrap();
        assert!(Database::open(tdir.path().join("missing").join("db.sqlite")).is_err());
    }

    #[test]
    fn registrations_are_memoized() {
        let db = Database::open_in_memory().unwrap();
        let a = db.get_registration(&DEF);
        let b = db.get_registration(&DEF);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(db.registration_count(), 1);

        // Same table, different members: still the first registration.
        let c = db.get_registration(&ArchiveDef::new("things", false, &[5]));
        assert!(Rc::ptr_eq(&a, &c));
        assert_eq!(c.members(), &[1, 2]);
    }

    #[test]
    fn invalid_registrations_are_memoized() {
        let db = Database::open_in_memory().unwrap();
        let def = ArchiveDef::new("empty", false, &[]);
        let a = db.get_registration(&def);
        let b = db.get_registration(&def);
        assert!(!a.is_valid());
        assert!(Rc::ptr_eq(&a, &b));
    }

    /// The cache always has room for the transaction statements and three statements per registered type.
    #[test]
    fn statement_cache_grows_with_registrations() {
        let config = ArchiveConfig {
            statement_cache_capacity: 1,
            ..ArchiveConfig::in_memory()
        };
        let db = Database::open_with_config(config).unwrap();
        assert_eq!(db.statement_cache_capacity(), 3);

        db.get_registration(&DEF);
        assert_eq!(db.statement_cache_capacity(), 6);
        db.get_registration(&DEF);
        assert_eq!(db.statement_cache_capacity(), 6);
        db.get_registration(&ArchiveDef::new("others", true, &[1]));
        assert_eq!(db.statement_cache_capacity(), 9);

        let db = Database::open_in_memory().unwrap();
        db.get_registration(&DEF);
        assert_eq!(db.statement_cache_capacity(), 64);
    }

    #[test]
    fn transactions_share_the_counter() {
        let db = Database::open_in_memory().unwrap();
        let nesting = Cell::new(0);
        assert!(!db.is_in_transaction());
        {
            let _outer = db.create_transaction(&nesting).unwrap();
            let _inner = db.create_transaction(&nesting).unwrap();
            assert_eq!(nesting.get(), 2);
            assert!(db.is_in_transaction());
        }
        assert_eq!(nesting.get(), 0);
        assert!(!db.is_in_transaction());
    }

    /// A registration first built inside a transaction that rolls back still works afterwards.
    #[test]
    fn registration_survives_rollback() {
        let db = Database::open_in_memory().unwrap();
        let nesting = Cell::new(0);
        let registration = {
            let _transaction = db.create_transaction(&nesting).unwrap();
            db.get_registration(&DEF)
        };

        let mut insert = registration
            .create_insert_statement(db.connection())
            .unwrap();
        insert.reset().unwrap();
        insert.write_value(1, &5i64).unwrap();
        insert.execute().unwrap();
        assert_eq!(db.last_insert_row_id(), 1);
    }
}

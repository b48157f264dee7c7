//! The archive: the entry point for storing and loading [Archivable] values.
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use log::*;

use crate::archivable::{Archivable, PrimaryKey};
use crate::location::{ReadLocation, WriteLocation};
use crate::registration::{ArchiveDef, ClassRegistration};
use crate::statement::Step;
use crate::{ArchiveConfig, Database, Error, Result};

/// Stores and loads archivable values.
///
/// Every call runs inside a transaction.  Calls made while another is in progress on the same archive (which is what
/// happens when a value archives its nested values) join the outer call's transaction instead of starting their own,
/// so an object graph is written or rolled back as a whole.
///
/// Not thread safe, and it doesn't need to be: all of the reentrancy is on one call stack.
pub struct Archive {
    database: Database,

    /// Depth of the transactions currently alive against the database.
    nesting: Cell<u64>,
}

impl Archive {
    pub fn new(database: Database) -> Archive {
        Archive {
            database,
            nesting: Cell::new(0),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Archive> {
        Ok(Archive::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Archive> {
        Ok(Archive::new(Database::open_in_memory()?))
    }

    pub fn open_with_config(config: ArchiveConfig) -> Result<Archive> {
        Ok(Archive::new(Database::open_with_config(config)?))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn valid_registration(&self, def: &ArchiveDef) -> Result<Rc<ClassRegistration>> {
        let registration = self.database.get_registration(def);
        if !registration.is_valid() {
            return Err(Error::InvalidRegistration(def.table_name.to_string()));
        }
        Ok(registration)
    }

    /// Write `value` as one row of its table, returning the row's primary key.
    ///
    /// If the value supplies its own key, the row is inserted or replaced at that key.  On failure nothing is
    /// committed, unless this call is nested in a larger operation which goes on to succeed anyway.
    pub fn archive_instance<T: Archivable>(&self, value: &T) -> Result<i64> {
        let mut transaction = self.database.create_transaction(&self.nesting)?;
        let registration = self.valid_registration(&T::ARCHIVE_DEF)?;
        let mut statement = registration.create_insert_statement(self.database.connection())?;
        statement.reset()?;

        let primary_key = value.primary_key();
        if let Some(k) = primary_key {
            statement.write_value(0, &k)?;
        }

        {
            let mut location = WriteLocation::new(self, &registration, &mut statement, primary_key);
            value.write(&mut location)?;
        }

        if statement.execute()? != Step::Done {
            return Err(Error::UnexpectedRow(registration.table_name().to_string()));
        }

        let row_id = self.database.last_insert_row_id();
        if let Some(requested) = primary_key {
            if requested != row_id {
                warn!(
                    "{}: asked for primary key {} but got {}",
                    registration.table_name(),
                    requested,
                    row_id
                );
                return Err(Error::KeyMismatch {
                    table: registration.table_name().to_string(),
                    requested,
                    assigned: row_id,
                });
            }
        }

        transaction.mark_successful();
        debug!("Archived {} row {}", registration.table_name(), row_id);
        Ok(row_id)
    }

    /// Read one row into `out`.
    ///
    /// With a key, reads that row; without one, reads the first row of the table.  Returns whether a row was found.
    pub fn unarchive_instance<T: Archivable>(&self, key: PrimaryKey, out: &mut T) -> Result<bool> {
        let count = self.unarchive_instances(&T::ARCHIVE_DEF, key, |location| {
            out.read(location)?;
            Ok(false)
        })?;
        Ok(count == 1)
    }

    /// Read rows of `def`'s table, calling `stepper` once per row until it returns false.
    ///
    /// With a key, at most the one row with that key is visited.  Otherwise the table is scanned in key order.  Returns
    /// how many rows were handed to the stepper.  Reads never commit anything.
    pub fn unarchive_instances<F>(&self, def: &ArchiveDef, key: PrimaryKey, mut stepper: F) -> Result<usize>
    where
        F: FnMut(&ReadLocation<'_, '_>) -> Result<bool>,
    {
        let _transaction = self.database.create_transaction(&self.nesting)?;
        let registration = self.valid_registration(def)?;
        let single = key.is_some();
        let mut statement =
            registration.create_query_statement(self.database.connection(), single)?;
        statement.reset()?;
        if let Some(k) = key {
            statement.write_value(0, &k)?;
        }

        let expected = registration.member_count() + 1;
        if statement.column_count() != expected {
            return Err(Error::ColumnCountMismatch {
                table: registration.table_name().to_string(),
                expected,
                actual: statement.column_count(),
            });
        }

        let mut rows_read = 0;
        let mut cursor = statement.query();
        while let Some(row) = cursor.step()? {
            let location = ReadLocation::new(self, &registration, row, key);
            let more = stepper(&location)?;
            rows_read += 1;
            if !more || single {
                break;
            }
        }

        Ok(rows_read)
    }

    /// Load the row with primary key `key`.
    pub fn load<T: Archivable + Default>(&self, key: i64) -> Result<T> {
        let mut out = T::default();
        if !self.unarchive_instance(Some(key), &mut out)? {
            return Err(Error::NotFound {
                table: T::ARCHIVE_DEF.table_name.to_string(),
                key,
            });
        }
        Ok(out)
    }

    /// Load every row of `T`'s table, in primary key order.
    pub fn unarchive_all<T: Archivable + Default>(&self) -> Result<Vec<T>> {
        let mut ret = vec![];
        self.unarchive_instances(&T::ARCHIVE_DEF, None, |location| {
            let mut value = T::default();
            value.read(location)?;
            ret.push(value);
            Ok(true)
        })?;
        Ok(ret)
    }

    /// Count the rows of `def`'s table.
    pub fn count_instances(&self, def: &ArchiveDef) -> Result<usize> {
        self.unarchive_instances(def, None, |_| Ok(true))
    }

    /// Run `body` in one transaction, committing if it returns `Ok`.
    ///
    /// Archive calls made by `body` join this transaction, so a batch of unrelated values can be written atomically.
    /// If `body` swallows an error from one of them, whatever that call had already written is still committed.
    pub fn transaction<R>(&self, body: impl FnOnce(&Archive) -> Result<R>) -> Result<R> {
        let mut transaction = self.database.create_transaction(&self.nesting)?;
        let ret = body(self)?;
        transaction.mark_successful();
        Ok(ret)
    }
}

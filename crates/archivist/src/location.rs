//! Locations: the handle an [Archivable] gets to read or write its row.
//!
//! A location lives exactly as long as one `write` or `read` call.  Members are addressed by id and resolved to
//! columns through the type's registration; an id the registration doesn't know is an error, and leaves everything
//! else about the row alone.
//!
//! Nested values are stored in their own tables and referenced by primary key.  Vectors of values are stored by
//! archiving each element, then archiving a [VectorHelper] holding the element keys, and storing the helper's key in
//! the member's column.
use rusqlite::types::{FromSql, ToSql};
use smallvec::SmallVec;

use crate::archivable::{Archivable, PrimaryKey};
use crate::registration::{ClassRegistration, MemberId};
use crate::statement::{read_value, Statement};
use crate::vector::VectorHelper;
use crate::{Archive, Error, Result};

/// Where an archivable writes itself: one bound, not yet executed, insert.
pub struct WriteLocation<'a, 'conn> {
    archive: &'a Archive,
    registration: &'a ClassRegistration,
    statement: &'a mut Statement<'conn>,
    primary_key: PrimaryKey,
}

/// Where an archivable reads itself from: the current row of a query.
pub struct ReadLocation<'a, 'stmt> {
    archive: &'a Archive,
    registration: &'a ClassRegistration,
    row: &'a rusqlite::Row<'stmt>,
    primary_key: PrimaryKey,
}

fn find_column(registration: &ClassRegistration, member: MemberId) -> Result<usize> {
    registration
        .find_column_index(member)
        .ok_or_else(|| Error::UnknownMember {
            table: registration.table_name().to_string(),
            member,
        })
}

impl<'a, 'conn> WriteLocation<'a, 'conn> {
    pub(crate) fn new(
        archive: &'a Archive,
        registration: &'a ClassRegistration,
        statement: &'a mut Statement<'conn>,
        primary_key: PrimaryKey,
    ) -> Self {
        Self {
            archive,
            registration,
            statement,
            primary_key,
        }
    }

    /// The key this row is being written at, if the value supplied one.
    pub fn primary_key(&self) -> PrimaryKey {
        self.primary_key
    }

    pub fn table_name(&self) -> &str {
        self.registration.table_name()
    }

    pub fn write<V: ToSql + ?Sized>(&mut self, member: MemberId, value: &V) -> Result<()> {
        let column = find_column(self.registration, member)?;
        self.statement.write_value(column, value)
    }

    /// Write a fieldless enum (or anything else with an integral representation).
    pub fn write_enum<E: Into<i64>>(&mut self, member: MemberId, value: E) -> Result<()> {
        self.write(member, &value.into())
    }

    /// Write any serde value as a JSON text column.
    pub fn write_json<V: serde::Serialize + ?Sized>(&mut self, member: MemberId, value: &V) -> Result<()> {
        let column = find_column(self.registration, member)?;
        let json = serde_json::to_string(value)?;
        self.statement.write_value(column, &json)
    }

    /// Archive `value` into its own table and store its key in `member`.
    ///
    /// Returns the nested row's key.  On failure, `member` is left as it was.
    pub fn write_archivable<A: Archivable>(&mut self, member: MemberId, value: &A) -> Result<i64> {
        let column = find_column(self.registration, member)?;
        let key = self.archive.archive_instance(value)?;
        self.statement.write_value(column, &key)?;
        Ok(key)
    }

    /// Archive every item, then a helper row listing their keys in order, and store the helper's key in `member`.
    ///
    /// Stops at the first item which fails.
    pub fn write_vector<A: Archivable>(&mut self, member: MemberId, items: &[A]) -> Result<()> {
        let column = find_column(self.registration, member)?;

        let mut keys: SmallVec<[i64; 16]> = SmallVec::with_capacity(items.len());
        for i in items {
            keys.push(self.archive.archive_instance(i)?);
        }

        let helper = VectorHelper::new(keys.into_vec());
        let helper_key = self.archive.archive_instance(&helper)?;
        self.statement.write_value(column, &helper_key)
    }
}

impl<'a, 'stmt> ReadLocation<'a, 'stmt> {
    pub(crate) fn new(
        archive: &'a Archive,
        registration: &'a ClassRegistration,
        row: &'a rusqlite::Row<'stmt>,
        primary_key: PrimaryKey,
    ) -> Self {
        Self {
            archive,
            registration,
            row,
            primary_key,
        }
    }

    /// The key of the row being read.
    pub fn primary_key(&self) -> Result<i64> {
        match self.primary_key {
            Some(k) => Ok(k),
            None => read_value(self.row, 0),
        }
    }

    pub fn table_name(&self) -> &str {
        self.registration.table_name()
    }

    pub fn read<V: FromSql>(&self, member: MemberId) -> Result<V> {
        let column = find_column(self.registration, member)?;
        read_value(self.row, column)
    }

    pub fn read_enum<E: TryFrom<i64>>(&self, member: MemberId) -> Result<E> {
        let value: i64 = self.read(member)?;
        E::try_from(value).map_err(|_| Error::InvalidEnumValue { member, value })
    }

    pub fn read_json<V: serde::de::DeserializeOwned>(&self, member: MemberId) -> Result<V> {
        let json: String = self.read(member)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Follow the key stored in `member` and read the row it points at into `out`.
    pub fn read_archivable<A: Archivable>(&self, member: MemberId, out: &mut A) -> Result<()> {
        let key: i64 = self.read(member)?;
        if !self.archive.unarchive_instance(Some(key), out)? {
            return Err(Error::NotFound {
                table: A::ARCHIVE_DEF.table_name.to_string(),
                key,
            });
        }
        Ok(())
    }

    /// Read a vector written by [WriteLocation::write_vector], appending its items to `out` in their original order.
    ///
    /// If any item can't be read, `out` is left untouched.
    pub fn read_vector<A: Archivable + Default>(&self, member: MemberId, out: &mut Vec<A>) -> Result<()> {
        let mut helper = VectorHelper::default();
        self.read_archivable(member, &mut helper)?;

        let mut items = Vec::with_capacity(helper.keys().len());
        for key in helper.keys() {
            let mut item = A::default();
            if !self.archive.unarchive_instance(Some(*key), &mut item)? {
                return Err(Error::NotFound {
                    table: A::ARCHIVE_DEF.table_name.to_string(),
                    key: *key,
                });
            }
            items.push(item);
        }

        out.extend(items);
        Ok(())
    }
}

//! A thin wrapper over one prepared sqlite statement.
//!
//! Statements come out of the connection's statement cache, so dropping one hands it back to the cache rather than
//! finalizing it; the cache finalizes when it evicts or when the connection closes.  Parameters use 0-based indices
//! here, matching column indices, and are shifted to sqlite's 1-based positions internally.
use lazy_static::lazy_static;
use log::*;
use rusqlite::types::{FromSql, ToSql, Value, ValueRef};

use crate::Result;

/// What happened when a statement was stepped once.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    /// The statement produced a row.
    Row,
    /// The statement ran to completion.
    Done,
}

pub struct Statement<'conn> {
    inner: rusqlite::CachedStatement<'conn>,
}

/// Iterates the rows of a query.  Borrows the statement until dropped.
pub struct Cursor<'stmt> {
    rows: rusqlite::Rows<'stmt>,
}

impl<'conn> Statement<'conn> {
    pub fn prepare(conn: &'conn rusqlite::Connection, sql: &str) -> Result<Self> {
        let inner = conn.prepare_cached(sql).map_err(|e| {
            debug!("Unable to prepare {}: {}", sql.trim(), e);
            e
        })?;
        Ok(Self { inner })
    }

    pub fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    pub fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    /// Bind NULL to every parameter.
    ///
    /// Cached statements keep whatever was bound last time they were used, so this must happen before binding a new
    /// row.
    pub fn reset(&mut self) -> Result<()> {
        for i in 1..=self.inner.parameter_count() {
            self.inner.raw_bind_parameter(i, rusqlite::types::Null)?;
        }
        Ok(())
    }

    pub fn write_value<T: ToSql + ?Sized>(&mut self, index: usize, value: &T) -> Result<()> {
        self.inner.raw_bind_parameter(index + 1, value)?;
        Ok(())
    }

    /// Step the statement once with whatever is currently bound.
    ///
    /// This is for statements which modify the database; use [Statement::query] to read rows.
    pub fn execute(&mut self) -> Result<Step> {
        match self.inner.raw_execute() {
            Ok(_) => Ok(Step::Done),
            Err(rusqlite::Error::ExecuteReturnedResults) => Ok(Step::Row),
            Err(e) => Err(e.into()),
        }
    }

    /// Run the statement as a query with whatever is currently bound.
    pub fn query(&mut self) -> Cursor<'_> {
        Cursor {
            rows: self.inner.raw_query(),
        }
    }
}

impl<'stmt> Cursor<'stmt> {
    /// Advance to the next row.  `None` means the query is done.
    pub fn step(&mut self) -> Result<Option<&rusqlite::Row<'stmt>>> {
        Ok(self.rows.next()?)
    }
}

lazy_static! {
    static ref NUMERIC_PREFIX: regex::Regex =
        regex::Regex::new(r"^\s*[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?")
            .expect("Numeric prefix regex should compile");
}

/// Read the 0-based column `index` of a row.
///
/// A stored value of the wrong type is converted the way sqlite's column accessors convert it: NULL reads as zero or
/// empty, integers and reals convert into each other, and text is read for a leading number.  Only an index outside
/// the row, or a value which can't become a `T` even after conversion, is an error.
pub fn read_value<T: FromSql>(row: &rusqlite::Row<'_>, index: usize) -> Result<T> {
    let mismatch = match row.get(index) {
        Ok(v) => return Ok(v),
        Err(e @ rusqlite::Error::InvalidColumnType(..)) => e,
        Err(e) => return Err(e.into()),
    };

    let stored = row.get_ref(index)?;
    for candidate in conversions(stored) {
        if let Ok(v) = T::column_result(ValueRef::from(&candidate)) {
            trace!("Column {}: read {:?} as {:?}", index, stored.data_type(), candidate.data_type());
            return Ok(v);
        }
    }

    Err(mismatch.into())
}

/// What a stored value may be read as, in the order to try them.  Reals come before integers so that `f64` reads of
/// text keep their fraction.
fn conversions(stored: ValueRef<'_>) -> Vec<Value> {
    match stored {
        ValueRef::Null => vec![
            Value::Integer(0),
            Value::Real(0.0),
            Value::Text(String::new()),
            Value::Blob(Vec::new()),
        ],
        ValueRef::Integer(i) => vec![Value::Real(i as f64), Value::Text(i.to_string())],
        // `as` saturates, and NaN becomes 0.
        ValueRef::Real(r) => vec![Value::Integer(r as i64), Value::Text(r.to_string())],
        ValueRef::Text(t) => {
            let (integer, real) = parse_numeric_prefix(t);
            vec![Value::Real(real), Value::Integer(integer), Value::Blob(t.to_vec())]
        }
        ValueRef::Blob(b) => {
            let (integer, real) = parse_numeric_prefix(b);
            let mut out = vec![Value::Real(real), Value::Integer(integer)];
            if let Ok(text) = std::str::from_utf8(b) {
                out.push(Value::Text(text.to_string()));
            }
            out
        }
    }
}

/// The leading number of some text, as an integer and as a real.  Text with no leading number is 0.
fn parse_numeric_prefix(text: &[u8]) -> (i64, f64) {
    let text = String::from_utf8_lossy(text);
    let prefix = NUMERIC_PREFIX
        .find(&text)
        .map(|m| m.as_str().trim_start())
        .unwrap_or("");
    let real = prefix.parse::<f64>().unwrap_or(0.0);
    let integer = prefix.parse::<i64>().unwrap_or(real as i64);
    (integer, real)
}

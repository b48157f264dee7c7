use crate::registration::MemberId;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unable to render SQL template: {0}")]
    Template(#[from] tera::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The table for this type couldn't be registered; archiving it against this database is disabled.
    #[error("Registration for table {0:?} is invalid")]
    InvalidRegistration(String),

    #[error("Table {table} has no member {member}")]
    UnknownMember { table: String, member: MemberId },

    /// An insert stepped to a row instead of finishing.
    #[error("Insert into {0} returned a row")]
    UnexpectedRow(String),

    #[error("Query against {table} returned {actual} columns, but {expected} were expected")]
    ColumnCountMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// The row was inserted, but sqlite gave it a different key than the one the value asked for.
    #[error("Table {table}: requested primary key {requested} but sqlite assigned {assigned}")]
    KeyMismatch {
        table: String,
        requested: i64,
        assigned: i64,
    },

    #[error("Table {table} has no row with primary key {key}")]
    NotFound { table: String, key: i64 },

    #[error("Unable to decode vector payload: {0}")]
    VectorPayload(String),

    #[error("Member {member} holds {value}, which isn't a valid enum value")]
    InvalidEnumValue { member: MemberId, value: i64 },

    /// For [crate::Archivable] implementations which refuse to write or read for reasons of their own.
    #[error("{0}")]
    Custom(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! The archivist crate.
//!
//! This crate persists in-memory values to an sqlite DB without reflection or serde.  Each type that wants to be
//! stored implements [Archivable]: it declares a table layout as an [ArchiveDef], and writes or reads itself one member
//! at a time through a location handed to it by the [Archive].  There are a few pieces:
//!
//! - The archive, which is what callers use, and which tracks transaction nesting.
//! - The database, which owns the connection and lazily builds one registration (table plus prebuilt SQL) per type.
//! - Locations, which map member ids to columns for the duration of one row, and which can recurse back into the
//!   archive for nested values and vectors of values.
//!
//! Nested writes share the outermost call's transaction, so archiving an object graph either lands entirely or not
//! at all.
//!
//! The schema is derived from the defs and created with `CREATE TABLE IF NOT EXISTS`; there are no migrations.
mod archivable;
mod archive;
mod config;
mod database;
mod error;
mod location;
mod registration;
mod statement;
mod transaction;
mod vector;

pub use archivable::*;
pub use archive::*;
pub use config::*;
pub use database::*;
pub use error::*;
pub use location::*;
pub use registration::*;
pub use statement::*;
pub use transaction::*;
pub use vector::*;

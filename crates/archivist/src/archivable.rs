use crate::location::{ReadLocation, WriteLocation};
use crate::registration::ArchiveDef;
use crate::Result;

/// Identity of a row.  `None` asks sqlite to assign one.
pub type PrimaryKey = Option<i64>;

/// A type which can be written to and read from its own table.
///
/// `write` and `read` address fields by member id through the location they are handed, and may recurse into the
/// archive for nested values via [WriteLocation::write_archivable] and friends.  Returning an error from `write`
/// rolls back everything archived as part of the same top-level call.
pub trait Archivable {
    const ARCHIVE_DEF: ArchiveDef;

    fn primary_key(&self) -> PrimaryKey;

    fn write(&self, location: &mut WriteLocation<'_, '_>) -> Result<()>;

    fn read(&mut self, location: &ReadLocation<'_, '_>) -> Result<()>;
}

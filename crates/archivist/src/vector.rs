//! The row type backing vector members.
use itertools::Itertools;

use crate::archivable::{Archivable, PrimaryKey};
use crate::location::{ReadLocation, WriteLocation};
use crate::registration::{ArchiveDef, MemberId};
use crate::{Error, Result};

const KEYS_MEMBER: MemberId = 1;

/// An ordered list of primary keys, stored as one comma-separated text column, e.g. `"3,7,12"`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VectorHelper {
    keys: Vec<i64>,
}

impl VectorHelper {
    pub fn new(keys: Vec<i64>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }
}

fn encode_keys(keys: &[i64]) -> String {
    keys.iter().join(",")
}

fn decode_keys(payload: &str) -> Result<Vec<i64>> {
    if payload.is_empty() {
        return Ok(vec![]);
    }

    payload
        .split(',')
        .map(|k| {
            k.parse::<i64>()
                .map_err(|e| Error::VectorPayload(format!("{:?}: {}", k, e)))
        })
        .collect()
}

impl Archivable for VectorHelper {
    const ARCHIVE_DEF: ArchiveDef = ArchiveDef::new("archivist_vector", true, &[KEYS_MEMBER]);

    fn primary_key(&self) -> PrimaryKey {
        None
    }

    fn write(&self, location: &mut WriteLocation<'_, '_>) -> Result<()> {
        location.write(KEYS_MEMBER, &encode_keys(&self.keys))
    }

    fn read(&mut self, location: &ReadLocation<'_, '_>) -> Result<()> {
        let payload: String = location.read(KEYS_MEMBER)?;
        self.keys = decode_keys(&payload)?;
        Ok(())
    }
}

//! Connection-level configuration.
//!
//! The config decides where the database lives and which pragmas we run when opening it.  It can be built in code or
//! loaded from JSON, and every field has a default so that partial JSON documents are fine.
use std::path::{Path, PathBuf};

use crate::Result;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Path to the sqlite file.  `None` opens an in-memory database.
    pub path: Option<PathBuf>,

    /// How long sqlite waits on a locked database before giving up.
    pub busy_timeout_ms: u64,

    /// Page cache size in KiB.  The sqlite default is only a couple megabytes.
    pub cache_size_kib: i64,

    /// Use WAL journaling.  Ignored for in-memory databases.
    pub wal: bool,

    /// Enforce foreign keys.  The generated schema doesn't declare any, but tables created by hand in the same file
    /// might.
    pub foreign_keys: bool,

    /// Smallest capacity of the connection's prepared statement cache.
    ///
    /// Every registered type uses up to three cached statements, plus three for transaction control.  The database
    /// raises the capacity past this as types register, so that none of those statements are ever evicted.
    pub statement_cache_capacity: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 1000,
            cache_size_kib: 100000,
            wal: false,
            foreign_keys: true,
            statement_cache_capacity: 64,
        }
    }
}

/// Pragmas run when a connection is opened.
///
/// The cache size is negative because sqlite reads negative values as KiB rather than pages.
const INITIAL_SQL_TEMPLATE: &str = r#"
PRAGMA busy_timeout = {{ busy_timeout }};
PRAGMA cache_size = -{{ cache_size }};
PRAGMA foreign_keys = {% if foreign_keys %}1{% else %}0{% endif %};
{%- if wal %}
PRAGMA journal_mode = WAL;
PRAGMA wal_autocheckpoint = 10000;
{%- endif %}
"#;

impl ArchiveConfig {
    /// Config for an on-disk database at `path`, with WAL enabled.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            wal: true,
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        Default::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Render the pragmas for this config.
    pub(crate) fn initial_sql(&self) -> Result<String> {
        let mut context = tera::Context::new();
        context.insert("busy_timeout", &self.busy_timeout_ms);
        context.insert("cache_size", &self.cache_size_kib.unsigned_abs());
        context.insert("foreign_keys", &self.foreign_keys);
        context.insert("wal", &(self.wal && !self.is_in_memory()));
        Ok(tera::Tera::one_off(INITIAL_SQL_TEMPLATE, &context, false)?)
    }
}

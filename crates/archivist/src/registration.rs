//! Per-type table schemas.
//!
//! Every archivable type declares an [ArchiveDef]: a table name, an ordered list of members, and whether sqlite should
//! pick primary keys.  The first time a [crate::Database] sees a def, it builds a [ClassRegistration] from it, which
//! creates the table if needed and prebuilds the SQL for inserting and querying rows.
//!
//! Column 0 of every table is the primary key.  Member columns follow in declaration order and are named from the
//! member id, so reopening a database with the same def always lines up with the table already on disk.  There is no
//! migration: changing a def for a table that already exists is not detected.
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use log::*;

use crate::statement::Statement;
use crate::{Error, Result};

/// Identifies one persisted field of a type.  Unique within the type, otherwise arbitrary.
pub type MemberId = u32;

/// Static description of an archivable type's table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArchiveDef {
    pub table_name: &'static str,
    /// If true, sqlite picks keys with AUTOINCREMENT, so keys of deleted rows are never reused.
    pub auto_key: bool,
    pub members: &'static [MemberId],
}

impl ArchiveDef {
    pub const fn new(table_name: &'static str, auto_key: bool, members: &'static [MemberId]) -> Self {
        Self {
            table_name,
            auto_key,
            members,
        }
    }
}

pub const PRIMARY_KEY_COLUMN: &str = "primary_key";

lazy_static! {
    static ref TABLE_NAME_REGEX: regex::Regex =
        regex::Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("Table name regex should compile");
}

fn member_column_name(member: MemberId) -> String {
    format!("member_{}", member)
}

fn build_table_ident(table: &str) -> String {
    format!("`{}`", table)
}

const CREATE_TEMPLATE: &str = r#"
CREATE TABLE IF NOT EXISTS {{ table }} (
    {{ primary_key }} INTEGER PRIMARY KEY{% if auto_key %} AUTOINCREMENT{% endif %}
    {%- for c in columns -%},
    {{ c }}
    {%- endfor %}
)
"#;

const INSERT_TEMPLATE: &str = r#"
INSERT OR REPLACE INTO {{ table }}(
    {{ columns | join(sep=", ") }}
) VALUES (
    {%- for c in columns -%}
    ?{% if not loop.last %}, {% endif -%}
    {%- endfor -%}
)
"#;

const QUERY_TEMPLATE: &str = r#"
SELECT {{ columns | join(sep=", ") }}
FROM {{ table }}
{%- if single %}
WHERE {{ primary_key }} = ?
{%- else %}
ORDER BY {{ primary_key }} ASC
{%- endif %}
"#;

/// The realized schema of one [ArchiveDef] against one connection.
#[derive(Debug)]
pub struct ClassRegistration {
    table_name: String,
    auto_key: bool,
    members: Vec<MemberId>,

    /// Maps member ids to column indices.  Column 0 is the primary key, so these start at 1.
    column_indices: HashMap<MemberId, usize>,

    create_sql: String,
    insert_sql: String,
    query_single_sql: String,
    query_all_sql: String,

    valid: bool,

    /// Cleared when a rollback may have undone our `CREATE TABLE`.
    table_ready: Cell<bool>,
}

/// Check that a def can be turned into a table at all.
fn validate_def(def: &ArchiveDef) -> Result<(), String> {
    if def.table_name.is_empty() {
        return Err("table name is empty".into());
    }

    if !TABLE_NAME_REGEX.is_match(def.table_name) {
        return Err(format!("{:?} isn't a valid table name", def.table_name));
    }

    if def.members.is_empty() {
        return Err("no members".into());
    }

    let mut seen = HashSet::new();
    for m in def.members {
        if !seen.insert(*m) {
            return Err(format!("member {} is declared twice", m));
        }
    }

    Ok(())
}

impl ClassRegistration {
    /// Build the registration, creating the table if it doesn't exist yet.
    ///
    /// Never fails: if anything goes wrong, the returned registration is invalid and can't build statements.
    pub(crate) fn new(conn: &rusqlite::Connection, def: &ArchiveDef) -> ClassRegistration {
        let mut registration = ClassRegistration {
            table_name: def.table_name.to_string(),
            auto_key: def.auto_key,
            members: def.members.to_vec(),
            column_indices: Default::default(),
            create_sql: Default::default(),
            insert_sql: Default::default(),
            query_single_sql: Default::default(),
            query_all_sql: Default::default(),
            valid: false,
            table_ready: Cell::new(false),
        };

        if let Err(e) = validate_def(def) {
            error!("Unable to register table {:?}: {}", def.table_name, e);
            return registration;
        }

        match registration.build(conn) {
            Ok(()) => {
                registration.valid = true;
                registration.table_ready.set(true);
            }
            Err(e) => error!("Unable to register table {:?}: {}", def.table_name, e),
        }

        registration
    }

    fn build(&mut self, conn: &rusqlite::Connection) -> Result<()> {
        self.column_indices = self
            .members
            .iter()
            .enumerate()
            .map(|(i, m)| (*m, i + 1))
            .collect();

        let table = build_table_ident(&self.table_name);
        let member_columns = self
            .members
            .iter()
            .map(|m| member_column_name(*m))
            .collect::<Vec<_>>();
        let all_columns = std::iter::once(PRIMARY_KEY_COLUMN.to_string())
            .chain(member_columns.iter().cloned())
            .collect::<Vec<_>>();

        let mut context = tera::Context::new();
        context.insert("table", &table);
        context.insert("primary_key", PRIMARY_KEY_COLUMN);
        context.insert("auto_key", &self.auto_key);

        context.insert("columns", &member_columns);
        self.create_sql = tera::Tera::one_off(CREATE_TEMPLATE, &context, false)?;

        context.insert("columns", &all_columns);
        self.insert_sql = tera::Tera::one_off(INSERT_TEMPLATE, &context, false)?;
        context.insert("single", &true);
        self.query_single_sql = tera::Tera::one_off(QUERY_TEMPLATE, &context, false)?;
        context.insert("single", &false);
        self.query_all_sql = tera::Tera::one_off(QUERY_TEMPLATE, &context, false)?;

        debug!("Create statement for {}: {}", table, self.create_sql);
        debug!("Insert statement for {}: {}", table, self.insert_sql);
        debug!("Query statements for {}: {} / {}", table, self.query_single_sql, self.query_all_sql);

        conn.execute_batch(&self.create_sql)?;
        Ok(())
    }

    /// Sqlite rolls back `CREATE TABLE` like any other statement, so a table first created inside a transaction which
    /// is later rolled back is gone again.  The database calls this in that case.
    pub(crate) fn forget_table(&self) {
        self.table_ready.set(false);
    }

    fn ensure_table(&self, conn: &rusqlite::Connection) -> Result<()> {
        if !self.table_ready.get() {
            debug!("Recreating table {} after a rollback", self.table_name);
            conn.execute_batch(&self.create_sql)?;
            self.table_ready.set(true);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn is_auto_key(&self) -> bool {
        self.auto_key
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether this registration was built from `def`.
    pub fn matches(&self, def: &ArchiveDef) -> bool {
        self.table_name == def.table_name && self.auto_key == def.auto_key && self.members == def.members
    }

    pub fn find_column_index(&self, member: MemberId) -> Option<usize> {
        self.column_indices.get(&member).copied()
    }

    fn check_valid(&self) -> Result<()> {
        if !self.valid {
            return Err(Error::InvalidRegistration(self.table_name.clone()));
        }
        Ok(())
    }

    /// An `INSERT OR REPLACE` binding the primary key as parameter 0 and each member at its column index.
    pub fn create_insert_statement<'conn>(
        &self,
        conn: &'conn rusqlite::Connection,
    ) -> Result<Statement<'conn>> {
        self.check_valid()?;
        self.ensure_table(conn)?;
        Statement::prepare(conn, &self.insert_sql)
    }

    /// A `SELECT` of the primary key and all members.
    ///
    /// If `single`, the statement has one parameter, the primary key to look up.  Otherwise, it scans the whole table
    /// in key order.
    pub fn create_query_statement<'conn>(
        &self,
        conn: &'conn rusqlite::Connection,
        single: bool,
    ) -> Result<Statement<'conn>> {
        self.check_valid()?;
        self.ensure_table(conn)?;
        let sql = if single {
            &self.query_single_sql
        } else {
            &self.query_all_sql
        };
        Statement::prepare(conn, sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const GOOD: ArchiveDef = ArchiveDef::new("good", false, &[7, 3, 12]);

    fn table_columns(conn: &rusqlite::Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM pragma_table_info('{}')", table))
            .unwrap();
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        names
    }

    #[test]
    fn columns_follow_declaration_order() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let reg = ClassRegistration::new(&conn, &GOOD);
        assert!(reg.is_valid());
        assert_eq!(reg.find_column_index(7), Some(1));
        assert_eq!(reg.find_column_index(3), Some(2));
        assert_eq!(reg.find_column_index(12), Some(3));
        assert_eq!(reg.find_column_index(4), None);
        assert_eq!(
            table_columns(&conn, "good"),
            vec!["primary_key", "member_7", "member_3", "member_12"]
        );
    }

    #[test]
    fn statements_have_the_right_shape() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let reg = ClassRegistration::new(&conn, &GOOD);

        let insert = reg.create_insert_statement(&conn).unwrap();
        assert_eq!(insert.parameter_count(), 4);

        let single = reg.create_query_statement(&conn, true).unwrap();
        assert_eq!(single.parameter_count(), 1);
        assert_eq!(single.column_count(), 4);

        let all = reg.create_query_statement(&conn, false).unwrap();
        assert_eq!(all.parameter_count(), 0);
        assert_eq!(all.column_count(), 4);
    }

    #[test]
    fn creation_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let reg = ClassRegistration::new(&conn, &GOOD);
        assert!(reg.is_valid());
        conn.execute_batch("INSERT INTO good VALUES (1, 'a', 'b', 'c')")
            .unwrap();

        let again = ClassRegistration::new(&conn, &GOOD);
        assert!(again.is_valid());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM good", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn auto_key_uses_autoincrement() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        ClassRegistration::new(&conn, &ArchiveDef::new("auto", true, &[1]));
        let sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = 'auto'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(sql.contains("AUTOINCREMENT"), "{}", sql);
    }

    #[test]
    fn bad_defs_are_invalid() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for def in [
            ArchiveDef::new("", false, &[1]),
            ArchiveDef::new("no_members", false, &[]),
            ArchiveDef::new("dup", false, &[1, 2, 1]),
            ArchiveDef::new("bad name; DROP", false, &[1]),
        ] {
            let reg = ClassRegistration::new(&conn, &def);
            assert!(!reg.is_valid(), "{:?}", def);
            assert!(matches!(
                reg.create_insert_statement(&conn),
                Err(Error::InvalidRegistration(_))
            ));
            assert!(reg.create_query_statement(&conn, true).is_err());
        }

        let tables: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn forgotten_tables_are_recreated() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("BEGIN").unwrap();
        let reg = ClassRegistration::new(&conn, &GOOD);
        conn.execute_batch("ROLLBACK").unwrap();
        assert!(table_columns(&conn, "good").is_empty());

        reg.forget_table();
        reg.create_insert_statement(&conn).unwrap();
        assert_eq!(table_columns(&conn, "good").len(), 4);
    }

    /// A table name that collides with an existing index can't be created, even with `IF NOT EXISTS`.
    #[test]
    fn create_failure_is_invalid() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE other(x); CREATE INDEX taken ON other(x);")
            .unwrap();
        let reg = ClassRegistration::new(&conn, &ArchiveDef::new("taken", false, &[1]));
        assert!(!reg.is_valid());
    }
}

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

/// Value stored in `PRAGMA user_version` once [`SCHEMA`] has been applied.
pub const SCHEMA_VERSION: i32 = 1;

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metatags (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        metatag_id INTEGER NOT NULL,
        FOREIGN KEY(metatag_id) REFERENCES metatags(id)
    );
    CREATE INDEX IF NOT EXISTS tags_metatag_index ON tags (metatag_id);

    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        relpath TEXT NOT NULL,
        mime TEXT NOT NULL,
        UNIQUE(relpath, name)
    );
    CREATE INDEX IF NOT EXISTS files_name_index ON files (name);

    CREATE TABLE IF NOT EXISTS file_tags (
        file_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE,
        FOREIGN KEY(tag_id) REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY(file_id, tag_id)
    );
    CREATE INDEX IF NOT EXISTS file_tags_tag_index ON file_tags (tag_id, file_id);
";

/// Creates the schema on a fresh database, or checks that an existing one
/// was written by a compatible version.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    match version {
        0 => {
            info!("Creating catalog schema v{}", SCHEMA_VERSION);
            conn.execute_batch(SCHEMA)?;
            conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
            Ok(())
        }
        SCHEMA_VERSION => validate(conn),
        other => Err(Error::UnsupportedSchema(other)),
    }
}

fn validate(conn: &Connection) -> Result<()> {
    for (table, expected) in [
        ("metatags", &["id", "name"][..]),
        ("tags", &["id", "name", "metatag_id"][..]),
        ("files", &["id", "name", "relpath", "mime"][..]),
        ("file_tags", &["file_id", "tag_id"][..]),
    ] {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(1))?
            .collect::<std::result::Result<_, _>>()?;
        if columns != expected {
            return Err(Error::UnsupportedSchema(SCHEMA_VERSION));
        }
    }
    Ok(())
}

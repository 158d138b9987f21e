use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::database::entity::{self, Entity};
use crate::database::models::{File, FileUpdate, Tag};
use crate::error::{Error, Result};

pub fn insert(conn: &Connection, relpath: &str, name: &str, mime: &str) -> Result<File> {
    conn.execute(
        "INSERT INTO files (name, relpath, mime) VALUES (?1, ?2, ?3)",
        params![name, relpath, mime],
    )?;
    let id = conn.last_insert_rowid();
    info!("Inserted file {} ({}/{})", id, relpath, name);
    load(conn, id)
}

pub fn get_by_path(conn: &Connection, relpath: &str, name: &str) -> Result<Option<File>> {
    let lazy = conn
        .query_row(
            &format!("{} WHERE e.relpath = ?1 AND e.name = ?2", File::SELECT),
            params![relpath, name],
            <File as Entity>::lazy,
        )
        .optional()?;
    lazy.map(|lazy| File::full(conn, lazy)).transpose()
}

pub fn update(conn: &Connection, id: i64, update: &FileUpdate) -> Result<File> {
    let current = entity::get_lazy_by_id::<File>(conn, id)?;
    let mut changes = Vec::new();
    if let Some(name) = update.name.as_ref().filter(|n| **n != current.name) {
        changes.push(("name", Value::Text(name.clone())));
    }
    if let Some(relpath) = update.relpath.as_ref().filter(|r| **r != current.relpath) {
        changes.push(("relpath", Value::Text(relpath.clone())));
    }
    if let Some(mime) = update.mime.as_ref().filter(|m| **m != current.mime) {
        changes.push(("mime", Value::Text(mime.clone())));
    }
    entity::apply_changes::<File>(conn, id, changes)?;
    load(conn, id)
}

/// Tags a file. Tagging twice is harmless.
pub fn add_tag(conn: &Connection, file_id: i64, tag_id: i64) -> Result<File> {
    ensure_exists(conn, file_id, tag_id)?;
    let added = conn.execute(
        "INSERT OR IGNORE INTO file_tags (file_id, tag_id) VALUES (?1, ?2)",
        params![file_id, tag_id],
    )?;
    if added > 0 {
        debug!("Tagged file {} with {}", file_id, tag_id);
    }
    load(conn, file_id)
}

/// Untags a file. Removing a tag the file does not carry is harmless.
pub fn remove_tag(conn: &Connection, file_id: i64, tag_id: i64) -> Result<File> {
    ensure_exists(conn, file_id, tag_id)?;
    let removed = conn.execute(
        "DELETE FROM file_tags WHERE file_id = ?1 AND tag_id = ?2",
        params![file_id, tag_id],
    )?;
    if removed > 0 {
        debug!("Removed tag {} from file {}", tag_id, file_id);
    }
    load(conn, file_id)
}

pub fn has_tag(conn: &Connection, file_id: i64, tag_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM file_tags WHERE file_id = ?1 AND tag_id = ?2",
        params![file_id, tag_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn ensure_exists(conn: &Connection, file_id: i64, tag_id: i64) -> Result<()> {
    entity::get_lazy_by_id::<File>(conn, file_id)?;
    entity::get_lazy_by_id::<Tag>(conn, tag_id)?;
    Ok(())
}

fn load(conn: &Connection, id: i64) -> Result<File> {
    entity::get_by_id::<File>(conn, id)?.ok_or(Error::NotFound {
        kind: File::KIND,
        id,
    })
}

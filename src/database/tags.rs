//! Tag maintenance and the tag side of the query engine.

use std::collections::HashSet;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::database::entity::{self, Entity};
use crate::database::models::{FileLazy, MetatagLazy, Tag, TagLazy, TagUpdate};
use crate::database::query::{files_with_all_tags, name_pattern, tag_values, to_glob};
use crate::error::{Error, Result};

pub fn insert(conn: &Connection, name: &str, metatag_id: i64) -> Result<Tag> {
    conn.execute(
        "INSERT INTO tags (name, metatag_id) VALUES (?1, ?2)",
        params![name, metatag_id],
    )?;
    let id = conn.last_insert_rowid();
    info!("Inserted tag {} ({}) in metatag {}", id, name, metatag_id);
    load(conn, id)
}

pub fn update(conn: &Connection, id: i64, update: &TagUpdate) -> Result<Tag> {
    let current = entity::get_lazy_by_id::<Tag>(conn, id)?;
    let mut changes = Vec::new();
    if let Some(name) = update.name.as_ref().filter(|n| **n != current.name) {
        changes.push(("name", Value::Text(name.clone())));
    }
    if let Some(metatag_id) = update.metatag_id.filter(|m| *m != current.metatag.id) {
        changes.push(("metatag_id", Value::Integer(metatag_id)));
    }
    entity::apply_changes::<Tag>(conn, id, changes)?;
    load(conn, id)
}

/// Every tag carried by at least one file, by name.
pub fn with_files(conn: &Connection) -> Result<Vec<TagLazy>> {
    entity::query::<Tag>(
        conn,
        "WHERE EXISTS (SELECT 1 FROM file_tags ft WHERE ft.tag_id = e.id) ORDER BY e.name",
        [],
    )
}

/// Tags found on at least one file that carries every tag in `tag_ids`.
///
/// The input tags themselves are part of the result whenever some file
/// carries them all.
pub fn related(conn: &Connection, tag_ids: &[i64]) -> Result<Vec<TagLazy>> {
    let tag_ids = distinct(tag_ids);
    if tag_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "{} WHERE e.id IN (SELECT ft.tag_id FROM file_tags ft WHERE ft.file_id IN ({})) ORDER BY e.name",
        Tag::SELECT,
        files_with_all_tags(tag_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map(params_from_iter(tag_values(&tag_ids)), <Tag as Entity>::lazy)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    debug!("{} tags related to {:?}", tags.len(), tag_ids);
    Ok(tags)
}

/// Tags still worth offering as a filter after `used` produced `current`.
pub fn available(conn: &Connection, used: &[i64], current: &[FileLazy]) -> Result<Vec<TagLazy>> {
    if used.is_empty() || current.is_empty() {
        return with_files(conn);
    }
    let mut tags = related(conn, used)?;
    tags.retain(|tag| !used.contains(&tag.id));
    Ok(tags)
}

/// Owning metatags of `tags`, without duplicates, sorted by lowercase name.
pub fn available_metatags(tags: &[TagLazy]) -> Vec<MetatagLazy> {
    let mut seen = HashSet::new();
    let mut metatags: Vec<MetatagLazy> = tags
        .iter()
        .filter(|tag| seen.insert(tag.metatag.id))
        .map(|tag| tag.metatag.clone())
        .collect();
    metatags.sort_by_key(|m| m.name.to_lowercase());
    metatags
}

/// Tags whose name matches the same token pattern used for file names.
pub fn search_by_name(conn: &Connection, raw: &str) -> Result<Vec<TagLazy>> {
    match name_pattern(raw) {
        Some(pattern) => entity::query::<Tag>(
            conn,
            "WHERE e.name GLOB ?1 ORDER BY e.name",
            [to_glob(&pattern)],
        ),
        None => entity::get_all::<Tag>(conn),
    }
}

fn distinct(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn load(conn: &Connection, id: i64) -> Result<Tag> {
    entity::get_by_id::<Tag>(conn, id)?.ok_or(Error::NotFound {
        kind: Tag::KIND,
        id,
    })
}

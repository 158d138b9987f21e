//! Generic catalog access, parameterised by entity kind.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

use crate::database::models::{File, FileLazy, Metatag, MetatagLazy, Tag, TagLazy};
use crate::error::{EntityKind, Error, Result};

/// A catalog table together with its two read shapes.
///
/// `SELECT` must alias the entity table as `e` so callers can append
/// `WHERE`/`ORDER BY` clauses on its columns.
pub trait Entity {
    type Lazy;
    type Full;

    const KIND: EntityKind;
    const TABLE: &'static str;
    const SELECT: &'static str;

    fn lazy(row: &Row<'_>) -> rusqlite::Result<Self::Lazy>;

    /// Expands a lazy value with its first-level relations.
    fn full(conn: &Connection, lazy: Self::Lazy) -> Result<Self::Full>;
}

impl Entity for File {
    type Lazy = FileLazy;
    type Full = File;

    const KIND: EntityKind = EntityKind::File;
    const TABLE: &'static str = "files";
    const SELECT: &'static str = "SELECT e.id, e.name, e.relpath, e.mime FROM files e";

    fn lazy(row: &Row<'_>) -> rusqlite::Result<FileLazy> {
        Ok(FileLazy {
            id: row.get(0)?,
            name: row.get(1)?,
            relpath: row.get(2)?,
            mime: row.get(3)?,
        })
    }

    fn full(conn: &Connection, lazy: FileLazy) -> Result<File> {
        let tags = query::<Tag>(
            conn,
            "WHERE e.id IN (SELECT tag_id FROM file_tags WHERE file_id = ?1) ORDER BY e.name",
            [lazy.id],
        )?;
        Ok(File {
            id: lazy.id,
            name: lazy.name,
            relpath: lazy.relpath,
            mime: lazy.mime,
            tags,
        })
    }
}

impl Entity for Tag {
    type Lazy = TagLazy;
    type Full = Tag;

    const KIND: EntityKind = EntityKind::Tag;
    const TABLE: &'static str = "tags";
    const SELECT: &'static str =
        "SELECT e.id, e.name, m.id, m.name FROM tags e JOIN metatags m ON m.id = e.metatag_id";

    fn lazy(row: &Row<'_>) -> rusqlite::Result<TagLazy> {
        Ok(TagLazy {
            id: row.get(0)?,
            name: row.get(1)?,
            metatag: MetatagLazy {
                id: row.get(2)?,
                name: row.get(3)?,
            },
        })
    }

    fn full(conn: &Connection, lazy: TagLazy) -> Result<Tag> {
        let files = query::<File>(
            conn,
            "WHERE e.id IN (SELECT file_id FROM file_tags WHERE tag_id = ?1) ORDER BY e.name, e.id",
            [lazy.id],
        )?;
        Ok(Tag {
            id: lazy.id,
            name: lazy.name,
            metatag: lazy.metatag,
            files,
        })
    }
}

impl Entity for Metatag {
    type Lazy = MetatagLazy;
    type Full = Metatag;

    const KIND: EntityKind = EntityKind::Metatag;
    const TABLE: &'static str = "metatags";
    const SELECT: &'static str = "SELECT e.id, e.name FROM metatags e";

    fn lazy(row: &Row<'_>) -> rusqlite::Result<MetatagLazy> {
        Ok(MetatagLazy {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }

    fn full(conn: &Connection, lazy: MetatagLazy) -> Result<Metatag> {
        let tags = query::<Tag>(conn, "WHERE e.metatag_id = ?1 ORDER BY e.name", [lazy.id])?;
        Ok(Metatag {
            id: lazy.id,
            name: lazy.name,
            tags,
        })
    }
}

/// Runs `E::SELECT` followed by `clause` and maps every row to the lazy shape.
pub(crate) fn query<E: Entity>(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<E::Lazy>> {
    let mut stmt = conn.prepare(&format!("{} {}", E::SELECT, clause))?;
    let rows = stmt
        .query_map(params, E::lazy)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_by_id<E: Entity>(conn: &Connection, id: i64) -> Result<Option<E::Full>> {
    let lazy = conn
        .query_row(&format!("{} WHERE e.id = ?1", E::SELECT), [id], E::lazy)
        .optional()?;
    lazy.map(|lazy| E::full(conn, lazy)).transpose()
}

pub(crate) fn get_lazy_by_id<E: Entity>(conn: &Connection, id: i64) -> Result<E::Lazy> {
    conn.query_row(&format!("{} WHERE e.id = ?1", E::SELECT), [id], E::lazy)
        .optional()?
        .ok_or(Error::NotFound { kind: E::KIND, id })
}

/// First entity with exactly this name. Only metatags and tags have unique
/// names; for files the lowest id wins.
pub fn get_by_name<E: Entity>(conn: &Connection, name: &str) -> Result<Option<E::Full>> {
    let lazy = conn
        .query_row(
            &format!("{} WHERE e.name = ?1 ORDER BY e.id LIMIT 1", E::SELECT),
            [name],
            E::lazy,
        )
        .optional()?;
    lazy.map(|lazy| E::full(conn, lazy)).transpose()
}

pub fn get_all<E: Entity>(conn: &Connection) -> Result<Vec<E::Lazy>> {
    query::<E>(conn, "ORDER BY e.name, e.id", [])
}

/// Random sample of at most `limit` rows.
///
/// Relies on SQLite's `RANDOM()`; nothing here promises a uniform
/// distribution on any other engine.
pub fn get_random<E: Entity>(conn: &Connection, limit: usize) -> Result<Vec<E::Lazy>> {
    query::<E>(conn, "ORDER BY RANDOM() LIMIT ?1", [limit as i64])
}

/// Removes a row; association rows go with it through `ON DELETE CASCADE`.
pub fn delete<E: Entity>(conn: &Connection, id: i64) -> Result<()> {
    let removed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", E::TABLE), [id])?;
    if removed == 0 {
        return Err(Error::NotFound { kind: E::KIND, id });
    }
    Ok(())
}

/// Writes the changed columns of a row. An empty change set writes nothing.
pub(crate) fn apply_changes<E: Entity>(
    conn: &Connection,
    id: i64,
    changes: Vec<(&'static str, Value)>,
) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }
    let assignments: Vec<String> = changes
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        E::TABLE,
        assignments.join(", ")
    );
    let values = changes
        .into_iter()
        .map(|(_, value)| value)
        .chain(std::iter::once(Value::Integer(id)));
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

/// `?, ?, ?` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

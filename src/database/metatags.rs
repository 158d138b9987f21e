use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::info;

use crate::database::entity::{self, Entity};
use crate::database::models::{Metatag, MetatagUpdate};
use crate::error::{Error, Result};

pub fn insert(conn: &Connection, name: &str) -> Result<Metatag> {
    conn.execute("INSERT INTO metatags (name) VALUES (?1)", params![name])?;
    let id = conn.last_insert_rowid();
    info!("Inserted metatag {} ({})", id, name);
    load(conn, id)
}

pub fn update(conn: &Connection, id: i64, update: &MetatagUpdate) -> Result<Metatag> {
    let current = entity::get_lazy_by_id::<Metatag>(conn, id)?;
    let mut changes = Vec::new();
    if let Some(name) = update.name.as_ref().filter(|n| **n != current.name) {
        changes.push(("name", Value::Text(name.clone())));
    }
    entity::apply_changes::<Metatag>(conn, id, changes)?;
    load(conn, id)
}

fn load(conn: &Connection, id: i64) -> Result<Metatag> {
    entity::get_by_id::<Metatag>(conn, id)?.ok_or(Error::NotFound {
        kind: Metatag::KIND,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Catalog, Tag};

    #[test]
    fn names_are_unique() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_metatag("Genre").unwrap();
        assert!(catalog.insert_metatag("Genre").unwrap_err().is_integrity());
    }

    #[test]
    fn rename() {
        let catalog = Catalog::open_in_memory().unwrap();
        let genre = catalog.insert_metatag("Genre").unwrap();
        let renamed = catalog
            .update_metatag(
                genre.id,
                &MetatagUpdate {
                    name: Some("Genres".into()),
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Genres");
        assert!(catalog
            .update_metatag(99, &MetatagUpdate::default())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn deleting_a_metatag_with_tags_fails_and_keeps_everything() {
        let catalog = Catalog::open_in_memory().unwrap();
        let genre = catalog.insert_metatag("Genre").unwrap();
        let action = catalog.insert_tag("Action", genre.id).unwrap();

        let err = catalog.delete::<Metatag>(genre.id).unwrap_err();
        assert!(err.is_integrity(), "got {err:?}");

        let genre = catalog.get_by_id::<Metatag>(genre.id).unwrap().unwrap();
        assert_eq!(genre.tags, vec![action.lazy()]);
        assert!(catalog.get_by_id::<Tag>(action.id).unwrap().is_some());

        catalog
            .run(|conn| entity::delete::<Tag>(conn, action.id))
            .unwrap();
        catalog.delete::<Metatag>(genre.id).unwrap();
        assert!(catalog.get_all::<Metatag>().unwrap().is_empty());
    }

    #[test]
    fn renaming_to_the_same_name_writes_nothing() {
        let catalog = Catalog::open_in_memory().unwrap();
        let genre = catalog.insert_metatag("Genre").unwrap();
        let unit = catalog.begin().unwrap();
        unit.execute_batch(
            "CREATE TEMP TABLE writes (id INTEGER);
             CREATE TEMP TRIGGER count_metatag_writes AFTER UPDATE ON metatags
             BEGIN INSERT INTO writes VALUES (NEW.id); END;",
        )
        .unwrap();

        let same = MetatagUpdate {
            name: Some("Genre".into()),
        };
        assert_eq!(update(&unit, genre.id, &same).unwrap(), genre);

        let writes: i64 = unit
            .query_row("SELECT COUNT(*) FROM writes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(writes, 0);
    }
}

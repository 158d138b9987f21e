//! The SQLite-backed catalog: schema, units of work and the typed DAOs.

pub mod entity;
pub mod files;
pub mod metatags;
pub mod models;
pub mod query;
pub mod schema;
pub mod tags;

use std::ops::Deref;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Error, Result};
pub use entity::Entity;
pub use models::{
    File, FileLazy, FileUpdate, Metatag, MetatagLazy, MetatagUpdate, SystemFile, Tag, TagLazy,
    TagUpdate,
};
pub use query::FileSearch;

const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Handle on the catalog database of one profile.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Create database: {}", path.display());
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a unit of work. The caller owns it and decides whether to
    /// commit; anything it lends a `&Connection` to cannot.
    pub fn begin(&self) -> Result<UnitOfWork<'_>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute_batch("BEGIN")?;
        Ok(UnitOfWork {
            conn,
            finished: false,
        })
    }

    /// Runs `f` as one all-or-nothing transaction.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let unit = self.begin()?;
        match f(&*unit) {
            Ok(value) => {
                unit.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = unit.rollback() {
                    warn!("Rollback after failed operation also failed: {}", e);
                }
                Err(err)
            }
        }
    }

    pub fn get_by_id<E: Entity>(&self, id: i64) -> Result<Option<E::Full>> {
        self.run(|conn| entity::get_by_id::<E>(conn, id))
    }

    pub fn get_by_name<E: Entity>(&self, name: &str) -> Result<Option<E::Full>> {
        self.run(|conn| entity::get_by_name::<E>(conn, name))
    }

    pub fn get_all<E: Entity>(&self) -> Result<Vec<E::Lazy>> {
        self.run(|conn| entity::get_all::<E>(conn))
    }

    pub fn get_random<E: Entity>(&self, limit: usize) -> Result<Vec<E::Lazy>> {
        self.run(|conn| entity::get_random::<E>(conn, limit))
    }

    pub fn delete<E: Entity>(&self, id: i64) -> Result<()> {
        self.run(|conn| entity::delete::<E>(conn, id))?;
        info!("Deleted {} {}", E::KIND, id);
        Ok(())
    }

    pub fn insert_file(&self, relpath: &str, name: &str, mime: &str) -> Result<File> {
        self.run(|conn| files::insert(conn, relpath, name, mime))
    }

    pub fn update_file(&self, id: i64, update: &FileUpdate) -> Result<File> {
        self.run(|conn| files::update(conn, id, update))
    }

    pub fn get_file_by_path(&self, relpath: &str, name: &str) -> Result<Option<File>> {
        self.run(|conn| files::get_by_path(conn, relpath, name))
    }

    pub fn add_tag(&self, file_id: i64, tag_id: i64) -> Result<File> {
        self.run(|conn| files::add_tag(conn, file_id, tag_id))
    }

    pub fn remove_tag(&self, file_id: i64, tag_id: i64) -> Result<File> {
        self.run(|conn| files::remove_tag(conn, file_id, tag_id))
    }

    pub fn file_has_tag(&self, file_id: i64, tag_id: i64) -> Result<bool> {
        self.run(|conn| files::has_tag(conn, file_id, tag_id))
    }

    pub fn search_files(&self, search: &FileSearch) -> Result<Vec<FileLazy>> {
        self.run(|conn| query::search_files(conn, search))
    }

    pub fn insert_tag(&self, name: &str, metatag_id: i64) -> Result<Tag> {
        self.run(|conn| tags::insert(conn, name, metatag_id))
    }

    pub fn update_tag(&self, id: i64, update: &TagUpdate) -> Result<Tag> {
        self.run(|conn| tags::update(conn, id, update))
    }

    pub fn tags_with_files(&self) -> Result<Vec<TagLazy>> {
        self.run(tags::with_files)
    }

    pub fn related_tags(&self, tag_ids: &[i64]) -> Result<Vec<TagLazy>> {
        self.run(|conn| tags::related(conn, tag_ids))
    }

    pub fn available_tags(&self, used: &[i64], current: &[FileLazy]) -> Result<Vec<TagLazy>> {
        self.run(|conn| tags::available(conn, used, current))
    }

    pub fn search_tags(&self, raw: &str) -> Result<Vec<TagLazy>> {
        self.run(|conn| tags::search_by_name(conn, raw))
    }

    pub fn insert_metatag(&self, name: &str) -> Result<Metatag> {
        self.run(|conn| metatags::insert(conn, name))
    }

    pub fn update_metatag(&self, id: i64, update: &MetatagUpdate) -> Result<Metatag> {
        self.run(|conn| metatags::update(conn, id, update))
    }
}

/// An open transaction holding the catalog connection.
///
/// Dropping it without calling [`UnitOfWork::commit`] rolls back.
pub struct UnitOfWork<'c> {
    conn: MutexGuard<'c, Connection>,
    finished: bool,
}

impl UnitOfWork<'_> {
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!("Failed to roll back abandoned unit of work: {}", e);
        }
    }
}

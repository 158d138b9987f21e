//! Read-only views handed out by the catalog.
//!
//! Every entity has a *lazy* shape (identity plus scalar columns) and a
//! *full* shape (lazy plus one level of relations, each rendered lazily).
//! None of these values keep a handle on the database.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetatagLazy {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metatag {
    pub id: i64,
    pub name: String,
    /// Owned tags, sorted by name.
    pub tags: Vec<TagLazy>,
}

impl Metatag {
    pub fn lazy(&self) -> MetatagLazy {
        MetatagLazy {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLazy {
    pub id: i64,
    pub name: String,
    pub metatag: MetatagLazy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub metatag: MetatagLazy,
    /// Tagged files, sorted by name.
    pub files: Vec<FileLazy>,
}

impl Tag {
    pub fn lazy(&self) -> TagLazy {
        TagLazy {
            id: self.id,
            name: self.name.clone(),
            metatag: self.metatag.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLazy {
    pub id: i64,
    pub name: String,
    /// Folder holding the file, relative to the catalog root.
    pub relpath: String,
    pub mime: String,
}

impl FileLazy {
    /// Absolute location of the file below `root`.
    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(&self.relpath).join(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    pub name: String,
    pub relpath: String,
    pub mime: String,
    /// Tags carried by the file, sorted by name.
    pub tags: Vec<TagLazy>,
}

impl File {
    pub fn lazy(&self) -> FileLazy {
        FileLazy {
            id: self.id,
            name: self.name.clone(),
            relpath: self.relpath.clone(),
            mime: self.mime.clone(),
        }
    }

    pub fn has_tag(&self, tag_id: i64) -> bool {
        self.tags.iter().any(|t| t.id == tag_id)
    }
}

/// A plain filesystem entry inside a catalogued folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFile {
    pub name: String,
    /// Path relative to the catalog root.
    pub src: String,
}

/// Partial update of a file row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    pub name: Option<String>,
    pub relpath: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TagUpdate {
    pub name: Option<String>,
    pub metatag_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct MetatagUpdate {
    pub name: Option<String>,
}

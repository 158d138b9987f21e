//! The context object tying settings, catalog and thumbnails together.
//!
//! Front ends (the CLI, a future HTTP layer) only talk to [`Library`].

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::database::query::DEFAULT_RANDOM_SAMPLE;
use crate::database::{
    tags, Catalog, File, FileLazy, FileSearch, FileUpdate, Metatag, MetatagLazy, MetatagUpdate,
    SystemFile, Tag, TagLazy, TagUpdate,
};
use crate::error::{EntityKind, Error, Result};
use crate::ingest::scanner;
use crate::media::mimetype;
use crate::thumbnail::{Deriver, InlineDeriver, ThumbnailCache, ThumbnailState, DEFAULT_ICON_SIZE};
use crate::utils::config::Settings;
use crate::utils::profile::Profile;

pub struct Library {
    settings: Settings,
    catalog: Catalog,
    thumbnails: ThumbnailCache,
}

/// Outcome counts of a batch thumbnail run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub ready: usize,
    pub failed: usize,
    pub unsupported: usize,
    pub missing: usize,
}

impl Library {
    pub fn open(profile: &Profile) -> Result<Self> {
        profile.ensure()?;
        let settings = Settings::load_or_create(&profile.settings_path())?;
        let catalog = Catalog::open(profile.database_path())?;
        let thumbnails = ThumbnailCache::new(
            settings.root(),
            profile.thumbnails_dir(),
            profile.failed_thumbnails_dir(),
        );
        Ok(Self::with_parts(settings, catalog, thumbnails))
    }

    pub fn with_parts(settings: Settings, catalog: Catalog, thumbnails: ThumbnailCache) -> Self {
        Self {
            settings,
            catalog,
            thumbnails,
        }
    }

    /// Replaces how thumbnails are derived, e.g. inline for short-lived
    /// processes that must not exit before derivation finishes.
    pub fn with_deriver(mut self, deriver: Arc<dyn Deriver>) -> Self {
        self.thumbnails = self.thumbnails.with_deriver(deriver);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn thumbnails(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    pub fn root(&self) -> &Path {
        self.thumbnails.root()
    }

    // Files

    /// Catalogs a file and requests its default thumbnail.
    pub fn insert_file(&self, relpath: &str, name: &str, mime: &str) -> Result<File> {
        let file = self.catalog.insert_file(relpath, name, mime)?;
        self.request_thumbnail(&file.lazy());
        Ok(file)
    }

    pub fn get_file(&self, id: i64) -> Result<Option<File>> {
        self.catalog.get_by_id::<File>(id)
    }

    pub fn get_file_by_name(&self, relpath: &str, name: &str) -> Result<Option<File>> {
        self.catalog.get_file_by_path(relpath, name)
    }

    /// An empty search yields random files when the `randomize` setting is on.
    pub fn search_files(
        &self,
        name: &str,
        tag_ids: &[i64],
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<Vec<FileLazy>> {
        let mut search = FileSearch::new().name(name).tags(tag_ids.iter().copied());
        if let Some(offset) = offset {
            search = search.offset(offset);
        }
        if let Some(limit) = limit {
            search = search.limit(limit);
        }
        if self.settings.randomize() {
            search = search.random_sample(DEFAULT_RANDOM_SAMPLE);
        }
        self.catalog.search_files(&search)
    }

    pub fn add_tag(&self, file_id: i64, tag_id: i64) -> Result<File> {
        self.catalog.add_tag(file_id, tag_id)
    }

    pub fn remove_tag(&self, file_id: i64, tag_id: i64) -> Result<File> {
        self.catalog.remove_tag(file_id, tag_id)
    }

    /// Drops the thumbnails of the file, then its row.
    pub fn delete_file(&self, id: i64) -> Result<()> {
        self.thumbnails.remove(id)?;
        self.catalog.delete::<File>(id)
    }

    /// Catalogs the file at `path` unless it already is, returning its row.
    pub fn register_path(&self, path: &Path) -> Result<File> {
        let (relpath, name) = self.split_path(path)?;
        if let Some(file) = self.catalog.get_file_by_path(&relpath, &name)? {
            return Ok(file);
        }
        let mime = mimetype::detect_mimetype(path).unwrap_or_else(|e| {
            warn!("Mimetype detection failed for {:?}: {:#}", path, e);
            mimetype::UNKNOWN.to_string()
        });
        self.insert_file(&relpath, &name, &mime)
    }

    /// Looks up an already catalogued file by its location on disk.
    pub fn find_path(&self, path: &Path) -> Result<Option<File>> {
        let (relpath, name) = self.split_path(path)?;
        self.catalog.get_file_by_path(&relpath, &name)
    }

    /// Moves a file into `target_folder` (relative to the root) on disk and
    /// in the catalog. Thumbnails stay valid since they are keyed by id.
    pub fn move_file(&self, id: i64, target_folder: &str) -> Result<File> {
        let file = self.require_file(id)?;
        let target_folder = normalize_relpath(Path::new(target_folder))?;
        if target_folder == file.relpath {
            return Ok(file);
        }

        let root = self.root();
        let source = file.lazy().path_in(root);
        let target_dir = root.join(&target_folder);
        let target = target_dir.join(&file.name);
        if target.exists() {
            return Err(Error::Validation(format!(
                "{} already exists",
                target.display()
            )));
        }
        fs::create_dir_all(&target_dir)?;
        fs::rename(&source, &target)?;

        let update = FileUpdate {
            relpath: Some(target_folder),
            ..Default::default()
        };
        match self.catalog.update_file(id, &update) {
            Ok(file) => {
                info!("Moved {:?} to {:?}", source, target);
                Ok(file)
            }
            Err(e) => {
                if let Err(undo) = fs::rename(&target, &source) {
                    warn!("Could not move {:?} back after failed update: {}", target, undo);
                }
                Err(e)
            }
        }
    }

    /// Regular files directly inside a catalogued folder.
    pub fn list_folder(&self, file_id: i64) -> Result<Vec<SystemFile>> {
        let file = self.require_file(file_id)?.lazy();
        let folder = file.path_in(self.root());
        if !folder.is_dir() {
            return Err(Error::NotAFolder(file_id));
        }
        let base = join_relpath(&file.relpath, &file.name);
        let entries = scanner::immediate_files(&folder)?
            .into_iter()
            .map(|name| SystemFile {
                src: join_relpath(&base, &name),
                name,
            })
            .collect();
        Ok(entries)
    }

    // Tags and metatags

    pub fn insert_tag(&self, name: &str, metatag_id: i64) -> Result<Tag> {
        self.catalog.insert_tag(name, metatag_id)
    }

    pub fn update_tag(&self, id: i64, name: Option<&str>, metatag_id: Option<i64>) -> Result<Tag> {
        let update = TagUpdate {
            name: name.map(str::to_string),
            metatag_id,
        };
        self.catalog.update_tag(id, &update)
    }

    pub fn delete_tag(&self, id: i64) -> Result<()> {
        self.catalog.delete::<Tag>(id)
    }

    pub fn insert_metatag(&self, name: &str) -> Result<Metatag> {
        self.catalog.insert_metatag(name)
    }

    pub fn update_metatag(&self, id: i64, name: &str) -> Result<Metatag> {
        let update = MetatagUpdate {
            name: Some(name.to_string()),
        };
        self.catalog.update_metatag(id, &update)
    }

    pub fn delete_metatag(&self, id: i64) -> Result<()> {
        self.catalog.delete::<Metatag>(id)
    }

    pub fn available_tags(&self, used: &[i64], files: &[FileLazy]) -> Result<Vec<TagLazy>> {
        self.catalog.available_tags(used, files)
    }

    pub fn available_metatags(&self, tags: &[TagLazy]) -> Vec<MetatagLazy> {
        tags::available_metatags(tags)
    }

    // Thumbnails

    /// Path of the thumbnail once it exists. `None` while it is being
    /// derived, after a failed derivation, or when no preview is possible.
    pub fn thumbnail(&self, file_id: i64, size: u32) -> Result<Option<PathBuf>> {
        let state = self.thumbnail_state(file_id, size)?;
        Ok(state.path().map(Path::to_path_buf))
    }

    pub fn thumbnail_state(&self, file_id: i64, size: u32) -> Result<ThumbnailState> {
        let file = self.require_file(file_id)?;
        self.thumbnails.get(&file.lazy(), size)
    }

    pub fn recreate_thumbnail(
        &self,
        file_id: i64,
        source: Option<&Path>,
        size: u32,
    ) -> Result<ThumbnailState> {
        let file = self.require_file(file_id)?.lazy();
        match source {
            Some(source) => self.thumbnails.derive_from(&file, source, size),
            None => self.thumbnails.recreate(&file, size),
        }
    }

    pub fn remove_thumbnail(&self, file_id: i64) -> Result<()> {
        self.thumbnails.remove(file_id)
    }

    /// Derives every missing thumbnail of `size` on the rayon pool, waiting
    /// for each derivation.
    pub fn refresh_thumbnails(&self, size: u32, progress: &ProgressBar) -> Result<RefreshSummary> {
        let files = self.catalog.get_all::<File>()?;
        progress.set_length(files.len() as u64);
        let inline = self.thumbnails.clone().with_deriver(Arc::new(InlineDeriver));

        let ready = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let unsupported = AtomicUsize::new(0);
        let missing = AtomicUsize::new(0);

        files.par_iter().try_for_each(|file| -> Result<()> {
            let counter = match inline.get(file, size)? {
                ThumbnailState::Ready(_) => &ready,
                // inline derivation has finished by now, look again
                ThumbnailState::Pending(target) if target.exists() => &ready,
                ThumbnailState::Pending(_) | ThumbnailState::Failed => &failed,
                ThumbnailState::Unsupported => &unsupported,
                ThumbnailState::SourceMissing => &missing,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            progress.inc(1);
            Ok(())
        })?;
        progress.finish();

        Ok(RefreshSummary {
            ready: ready.into_inner(),
            failed: failed.into_inner(),
            unsupported: unsupported.into_inner(),
            missing: missing.into_inner(),
        })
    }

    fn request_thumbnail(&self, file: &FileLazy) {
        if let Err(e) = self.thumbnails.get(file, DEFAULT_ICON_SIZE) {
            warn!("Could not request thumbnail for {}: {}", file.id, e);
        }
    }

    fn require_file(&self, id: i64) -> Result<File> {
        self.catalog
            .get_by_id::<File>(id)?
            .ok_or(Error::NotFound {
                kind: EntityKind::File,
                id,
            })
    }

    /// Splits a path below the root into its catalog folder and name.
    fn split_path(&self, path: &Path) -> Result<(String, String)> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let absolute = fs::canonicalize(&absolute).unwrap_or(absolute);
        let root = fs::canonicalize(self.root()).unwrap_or_else(|_| self.root().to_path_buf());

        let relative = absolute.strip_prefix(&root).map_err(|_| {
            Error::Validation(format!(
                "{} is outside of the root {}",
                path.display(),
                root.display()
            ))
        })?;
        let name = relative
            .file_name()
            .ok_or_else(|| Error::Validation(format!("{} has no file name", path.display())))?;
        let name = utf8(name, path)?.to_string();
        let relpath = normalize_relpath(relative.parent().unwrap_or(Path::new("")))?;
        Ok((relpath, name))
    }
}

/// Renders a root-relative folder with `/` separators, rejecting anything
/// that would escape the root.
fn normalize_relpath(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(utf8(part, path)?),
            Component::CurDir => {}
            _ => {
                return Err(Error::Validation(format!(
                    "{} is not a folder inside the root",
                    path.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Catalogued names are stored as text, so they must be valid UTF-8.
fn utf8<'a>(part: &'a OsStr, path: &Path) -> Result<&'a str> {
    part.to_str().ok_or_else(|| {
        Error::Validation(format!("{} is not valid UTF-8", path.display()))
    })
}

fn join_relpath(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::utils::config::{Section, UI_RANDOMIZE};

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        library: Library,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let profile = Profile::at(&dir.path().join("profile"));
        profile.ensure().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();

        let mut settings = Settings::load_or_create(&profile.settings_path()).unwrap();
        settings.set_root(&root).unwrap();
        let thumbnails = ThumbnailCache::new(
            root.clone(),
            profile.thumbnails_dir(),
            profile.failed_thumbnails_dir(),
        )
        .with_deriver(Arc::new(InlineDeriver));
        let library = Library::with_parts(settings, Catalog::open_in_memory().unwrap(), thumbnails);
        Fixture {
            _dir: dir,
            root,
            library,
        }
    }

    fn write_png(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::new(32, 32)
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn inserting_a_file_derives_its_thumbnail() {
        let f = fixture();
        write_png(&f.root.join("pics/a.png"));

        let file = f.library.insert_file("pics", "a.png", "image/png").unwrap();
        let path = f.library.thumbnail(file.id, DEFAULT_ICON_SIZE).unwrap();
        assert_eq!(path, Some(f.library.thumbnails().thumbnail_path(file.id, DEFAULT_ICON_SIZE)));

        f.library.delete_file(file.id).unwrap();
        assert!(!f.library.thumbnails().thumbnail_path(file.id, DEFAULT_ICON_SIZE).exists());
        assert!(f.library.get_file(file.id).unwrap().is_none());
    }

    #[test]
    fn thumbnail_of_a_missing_source_is_none() {
        let f = fixture();
        let file = f.library.insert_file("", "gone.mkv", "video/x-matroska").unwrap();

        assert_eq!(f.library.thumbnail(file.id, DEFAULT_ICON_SIZE).unwrap(), None);
        assert!(!f
            .library
            .thumbnails()
            .failure_marker_path(file.id, DEFAULT_ICON_SIZE)
            .exists());
    }

    #[test]
    fn empty_search_follows_the_randomize_setting() {
        let mut f = fixture();
        for i in 0..12 {
            f.library.insert_file("", &format!("{i}.txt"), "text/plain").unwrap();
        }
        assert!(f.library.search_files("", &[], None, None).unwrap().is_empty());

        f.library
            .settings_mut()
            .set(Section::Ui, UI_RANDOMIZE, json!(true))
            .unwrap();
        let sample = f.library.search_files("  ", &[], None, None).unwrap();
        assert_eq!(sample.len(), DEFAULT_RANDOM_SAMPLE);
    }

    #[test]
    fn available_tags_never_repeat_the_filter() {
        let f = fixture();
        let genre = f.library.insert_metatag("Genre").unwrap();
        let action = f.library.insert_tag("Action", genre.id).unwrap();
        let comedy = f.library.insert_tag("Comedy", genre.id).unwrap();
        let a = f.library.insert_file("", "a", "video/mp4").unwrap();
        let b = f.library.insert_file("", "b", "video/mp4").unwrap();
        f.library.add_tag(a.id, action.id).unwrap();
        f.library.add_tag(a.id, comedy.id).unwrap();
        f.library.add_tag(b.id, comedy.id).unwrap();

        let used = [action.id];
        let files = f.library.search_files("", &used, None, None).unwrap();
        assert_eq!(files.len(), 1);
        let available = f.library.available_tags(&used, &files).unwrap();
        assert_eq!(available.iter().map(|t| t.id).collect::<Vec<_>>(), [comedy.id]);
        assert_eq!(f.library.available_metatags(&available), [genre.lazy()]);
    }

    #[test]
    fn register_path_is_idempotent_and_root_bound() {
        let f = fixture();
        let photo = f.root.join("albums/2020/photo.png");
        write_png(&photo);

        let file = f.library.register_path(&photo).unwrap();
        assert_eq!(file.relpath, "albums/2020");
        assert_eq!(file.name, "photo.png");
        assert_eq!(file.mime, "image/png");
        assert_eq!(f.library.register_path(&photo).unwrap().id, file.id);

        let outside = f._dir.path().join("elsewhere.png");
        write_png(&outside);
        assert!(matches!(
            f.library.register_path(&outside),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn move_file_updates_disk_and_catalog() {
        let f = fixture();
        write_png(&f.root.join("inbox/a.png"));
        let file = f.library.insert_file("inbox", "a.png", "image/png").unwrap();

        let moved = f.library.move_file(file.id, "sorted/cats").unwrap();
        assert_eq!(moved.relpath, "sorted/cats");
        assert!(f.root.join("sorted/cats/a.png").exists());
        assert!(!f.root.join("inbox/a.png").exists());

        assert!(matches!(
            f.library.move_file(file.id, "../escape"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn list_folder_requires_a_folder() {
        let f = fixture();
        fs::create_dir_all(f.root.join("album/nested")).unwrap();
        fs::write(f.root.join("album/2.jpg"), b"").unwrap();
        fs::write(f.root.join("album/1.jpg"), b"").unwrap();
        let album = f.library.insert_file("", "album", mimetype::DIRECTORY).unwrap();

        let entries = f.library.list_folder(album.id).unwrap();
        assert_eq!(
            entries,
            [
                SystemFile {
                    name: "1.jpg".into(),
                    src: "album/1.jpg".into()
                },
                SystemFile {
                    name: "2.jpg".into(),
                    src: "album/2.jpg".into()
                },
            ]
        );

        write_png(&f.root.join("single.png"));
        let single = f.library.insert_file("", "single.png", "image/png").unwrap();
        assert!(matches!(
            f.library.list_folder(single.id),
            Err(Error::NotAFolder(id)) if id == single.id
        ));
    }

    #[test]
    fn refresh_counts_outcomes() {
        let f = fixture();
        write_png(&f.root.join("a.png"));
        fs::write(f.root.join("notes.txt"), b"plain words").unwrap();
        f.library.catalog().insert_file("", "a.png", "image/png").unwrap();
        f.library.catalog().insert_file("", "notes.txt", "text/plain").unwrap();
        f.library.catalog().insert_file("", "gone.png", "image/png").unwrap();

        let summary = f.library.refresh_thumbnails(64, &ProgressBar::hidden()).unwrap();
        assert_eq!(
            summary,
            RefreshSummary {
                ready: 1,
                failed: 0,
                unsupported: 1,
                missing: 1
            }
        );
    }

    #[test]
    fn deleting_a_used_metatag_is_an_integrity_error() {
        let f = fixture();
        let genre = f.library.insert_metatag("Genre").unwrap();
        f.library.insert_tag("Action", genre.id).unwrap();

        assert!(f.library.delete_metatag(genre.id).unwrap_err().is_integrity());
        let genre = f.library.catalog().get_by_id::<Metatag>(genre.id).unwrap().unwrap();
        assert_eq!(genre.tags.len(), 1);
    }

    #[test]
    fn deleted_files_leave_no_thumbnail_at_any_size() {
        let f = fixture();
        write_png(&f.root.join("a.png"));
        let a = f.library.insert_file("", "a.png", "image/png").unwrap();
        assert_eq!(f.library.thumbnail(a.id, 128).unwrap(), None);
        let small = f.library.thumbnail(a.id, 128).unwrap().unwrap();
        assert!(small.exists());

        f.library.delete_file(a.id).unwrap();
        assert!(!small.exists());
        assert!(!f.library.thumbnails().thumbnail_path(a.id, DEFAULT_ICON_SIZE).exists());

        fs::write(f.root.join("b.txt"), b"plain words").unwrap();
        let b = f.library.insert_file("", "b.txt", "text/plain").unwrap();
        assert_ne!(b.id, a.id);
        assert_eq!(f.library.thumbnail(b.id, 128).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_rejected() {
        use std::os::unix::ffi::OsStrExt;

        let f = fixture();
        let odd = f.root.join(OsStr::from_bytes(b"caf\xe9.png"));
        write_png(&odd);

        assert!(matches!(f.library.register_path(&odd), Err(Error::Validation(_))));
        assert!(f.library.search_files("caf", &[], None, None).unwrap().is_empty());
    }
}

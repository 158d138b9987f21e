//! Per-file preview images, derived on demand and kept on disk.
//!
//! Artifacts live at `<thumbnails>/<size>/<file id>.png`. A derivation that
//! failed leaves an empty marker at the same relative spot under
//! `<thumbnails_fail>` and is never retried. Sources of a type we cannot
//! preview get no marker at all.

pub mod derive;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::database::FileLazy;
use crate::error::Result;
use crate::ingest::scanner;
use crate::media::mimetype;
pub use derive::{BackgroundDeriver, DerivationJob, Deriver, InlineDeriver, SourceKind};

pub const DEFAULT_ICON_SIZE: u32 = 256;
const THUMB_EXTENSION: &str = "png";

const DOCUMENT_MIMES: &[&str] = &["application/pdf", "image/vnd.djvu", "image/x-djvu"];

/// What the cache knows about one `(file, size)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailState {
    /// The source file is not on disk.
    SourceMissing,
    Ready(PathBuf),
    /// A derivation was submitted; the artifact will appear at this path.
    Pending(PathBuf),
    Failed,
    Unsupported,
}

impl ThumbnailState {
    /// The artifact path, only once it exists.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ThumbnailState::Ready(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ThumbnailState::Ready(_))
    }
}

/// Maps a MIME type to the way it can be previewed.
pub fn kind_for_mime(mime: &str) -> Option<SourceKind> {
    if mime.starts_with("video/") {
        Some(SourceKind::Video)
    } else if DOCUMENT_MIMES.contains(&mime) {
        Some(SourceKind::Document)
    } else if mime.starts_with("image/") {
        Some(SourceKind::Image)
    } else {
        None
    }
}

#[derive(Clone)]
pub struct ThumbnailCache {
    root: PathBuf,
    ready_dir: PathBuf,
    failed_dir: PathBuf,
    deriver: Arc<dyn Deriver>,
}

impl ThumbnailCache {
    /// `root` is the catalog root files are resolved against; the two
    /// artifact trees are created lazily.
    pub fn new(root: PathBuf, ready_dir: PathBuf, failed_dir: PathBuf) -> Self {
        Self {
            root,
            ready_dir,
            failed_dir,
            deriver: Arc::new(BackgroundDeriver),
        }
    }

    pub fn with_deriver(mut self, deriver: Arc<dyn Deriver>) -> Self {
        self.deriver = deriver;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn thumbnail_path(&self, file_id: i64, size: u32) -> PathBuf {
        artifact_path(&self.ready_dir, file_id, size)
    }

    pub fn failure_marker_path(&self, file_id: i64, size: u32) -> PathBuf {
        artifact_path(&self.failed_dir, file_id, size)
    }

    /// Returns the thumbnail of `file`, submitting a derivation when there
    /// is neither an artifact nor a failure marker yet.
    ///
    /// Nothing is re-derived once an artifact exists, even if the source
    /// changed. Calls made while a derivation is still running submit it
    /// again.
    pub fn get(&self, file: &FileLazy, size: u32) -> Result<ThumbnailState> {
        let source = file.path_in(&self.root);
        if !source.exists() {
            return Ok(ThumbnailState::SourceMissing);
        }
        let target = self.thumbnail_path(file.id, size);
        if target.exists() {
            return Ok(ThumbnailState::Ready(target));
        }
        let failure_marker = self.failure_marker_path(file.id, size);
        if failure_marker.exists() {
            return Ok(ThumbnailState::Failed);
        }
        self.derive(&source, target, failure_marker, size)
    }

    /// Drops both artifacts of `file` for `size` and derives again.
    pub fn recreate(&self, file: &FileLazy, size: u32) -> Result<ThumbnailState> {
        remove_if_exists(&self.thumbnail_path(file.id, size))?;
        remove_if_exists(&self.failure_marker_path(file.id, size))?;
        self.get(file, size)
    }

    /// Derives the thumbnail of `file` from another source, replacing any
    /// artifact or failure marker it had.
    pub fn derive_from(&self, file: &FileLazy, source: &Path, size: u32) -> Result<ThumbnailState> {
        let target = self.thumbnail_path(file.id, size);
        let failure_marker = self.failure_marker_path(file.id, size);
        remove_if_exists(&target)?;
        remove_if_exists(&failure_marker)?;
        if !source.exists() {
            return Ok(ThumbnailState::SourceMissing);
        }
        self.derive(source, target, failure_marker, size)
    }

    /// Deletes the artifact and the failure marker of `file_id` for every
    /// size found on disk. Missing files are fine.
    pub fn remove(&self, file_id: i64) -> Result<()> {
        for base in [&self.ready_dir, &self.failed_dir] {
            for size in size_dirs(base)? {
                remove_if_exists(&artifact_path(base, file_id, size))?;
            }
        }
        Ok(())
    }

    fn derive(
        &self,
        source: &Path,
        target: PathBuf,
        failure_marker: PathBuf,
        size: u32,
    ) -> Result<ThumbnailState> {
        let Some((source, kind)) = classify(source) else {
            debug!("No thumbnail possible for {:?}", source);
            return Ok(ThumbnailState::Unsupported);
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        self.deriver.submit(DerivationJob {
            source,
            kind,
            size,
            target: target.clone(),
            failure_marker,
        });
        Ok(ThumbnailState::Pending(target))
    }
}

/// Picks the file a preview is derived from: the path itself, or for a
/// folder its first previewable member in case-insensitive path order.
fn classify(path: &Path) -> Option<(PathBuf, SourceKind)> {
    if !path.is_dir() {
        return sniff(path).map(|kind| (path.to_path_buf(), kind));
    }
    scanner::nested_files(path)
        .into_iter()
        .find_map(|member| sniff(&member).map(|kind| (member, kind)))
}

fn sniff(path: &Path) -> Option<SourceKind> {
    match mimetype::detect_mimetype(path) {
        Ok(mime) => kind_for_mime(&mime),
        Err(e) => {
            debug!("Skipping {:?}: {:#}", path, e);
            None
        }
    }
}

fn artifact_path(base: &Path, file_id: i64, size: u32) -> PathBuf {
    base.join(size.to_string())
        .join(format!("{}.{}", file_id, THUMB_EXTENSION))
}

/// Icon sizes that have a folder below `base`.
fn size_dirs(base: &Path) -> io::Result<Vec<u32>> {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut sizes = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(size) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            sizes.push(size);
        }
    }
    Ok(sizes)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingDeriver {
        jobs: Mutex<Vec<DerivationJob>>,
    }

    impl RecordingDeriver {
        fn jobs(&self) -> Vec<DerivationJob> {
            self.jobs.lock().unwrap().clone()
        }
    }

    impl Deriver for RecordingDeriver {
        fn submit(&self, job: DerivationJob) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    struct Fixture {
        dir: TempDir,
        cache: ThumbnailCache,
        deriver: Arc<RecordingDeriver>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let deriver = Arc::new(RecordingDeriver::default());
        let cache = ThumbnailCache::new(
            root,
            dir.path().join("thumbnails"),
            dir.path().join("thumbnails_fail"),
        )
        .with_deriver(deriver.clone());
        Fixture {
            dir,
            cache,
            deriver,
        }
    }

    fn file(id: i64, relpath: &str, name: &str) -> FileLazy {
        FileLazy {
            id,
            name: name.into(),
            relpath: relpath.into(),
            mime: String::new(),
        }
    }

    fn write_png(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::new(4, 4)
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn missing_source_touches_nothing() {
        let f = fixture();
        let state = f.cache.get(&file(1, "", "gone.png"), DEFAULT_ICON_SIZE).unwrap();

        assert_eq!(state, ThumbnailState::SourceMissing);
        assert!(state.path().is_none());
        assert!(f.deriver.jobs().is_empty());
        assert!(!f.cache.failure_marker_path(1, DEFAULT_ICON_SIZE).exists());
    }

    #[test]
    fn pending_until_derivation_completes() {
        let f = fixture();
        write_png(&f.cache.root().join("pics/a.png"));
        let a = file(7, "pics", "a.png");

        let first = f.cache.get(&a, DEFAULT_ICON_SIZE).unwrap();
        let second = f.cache.get(&a, DEFAULT_ICON_SIZE).unwrap();
        assert!(first.path().is_none());
        assert!(second.path().is_none());
        assert_eq!(first, second);

        let jobs = f.deriver.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].kind, SourceKind::Image);
        assert_eq!(jobs[0].target, f.cache.thumbnail_path(7, DEFAULT_ICON_SIZE));

        derive::run(&jobs[0]).unwrap();
        let third = f.cache.get(&a, DEFAULT_ICON_SIZE).unwrap();
        assert_eq!(
            third.path(),
            Some(f.dir.path().join("thumbnails/256/7.png").as_path())
        );
        assert_eq!(f.deriver.jobs().len(), 2);
    }

    #[test]
    fn failure_marker_short_circuits() {
        let f = fixture();
        write_png(&f.cache.root().join("a.png"));
        let a = file(3, "", "a.png");
        let marker = f.cache.failure_marker_path(3, DEFAULT_ICON_SIZE);
        fs::create_dir_all(marker.parent().unwrap()).unwrap();
        fs::write(&marker, b"").unwrap();

        assert_eq!(f.cache.get(&a, DEFAULT_ICON_SIZE).unwrap(), ThumbnailState::Failed);
        assert!(f.deriver.jobs().is_empty());

        assert!(matches!(
            f.cache.recreate(&a, DEFAULT_ICON_SIZE).unwrap(),
            ThumbnailState::Pending(_)
        ));
        assert!(!marker.exists());
    }

    #[test]
    fn unsupported_types_leave_no_marker() {
        let f = fixture();
        let notes = f.cache.root().join("notes.txt");
        fs::write(&notes, b"plain words").unwrap();

        let state = f.cache.get(&file(4, "", "notes.txt"), DEFAULT_ICON_SIZE).unwrap();
        assert_eq!(state, ThumbnailState::Unsupported);
        assert!(!f.cache.failure_marker_path(4, DEFAULT_ICON_SIZE).exists());
        assert!(f.deriver.jobs().is_empty());
    }

    #[test]
    fn folders_use_their_first_previewable_member() {
        let f = fixture();
        let album = f.cache.root().join("album");
        fs::create_dir_all(album.join("b")).unwrap();
        fs::write(album.join("a.txt"), b"plain words").unwrap();
        write_png(&album.join("b/cover.png"));
        write_png(&album.join("c.png"));

        let state = f.cache.get(&file(5, "", "album"), 64).unwrap();
        assert_eq!(state, ThumbnailState::Pending(f.cache.thumbnail_path(5, 64)));
        assert_eq!(f.deriver.jobs()[0].source, album.join("b/cover.png"));
    }

    #[test]
    fn remove_clears_every_size_and_is_idempotent() {
        let f = fixture();
        for size in [DEFAULT_ICON_SIZE, 64, 1024] {
            write_png(&f.cache.thumbnail_path(9, size));
            let marker = f.cache.failure_marker_path(9, size);
            fs::create_dir_all(marker.parent().unwrap()).unwrap();
            fs::write(&marker, b"").unwrap();
        }

        write_png(&f.cache.thumbnail_path(10, 64));

        f.cache.remove(9).unwrap();
        for size in [DEFAULT_ICON_SIZE, 64, 1024] {
            assert!(!f.cache.thumbnail_path(9, size).exists());
            assert!(!f.cache.failure_marker_path(9, size).exists());
        }
        assert!(f.cache.thumbnail_path(10, 64).exists());
        f.cache.remove(9).unwrap();
    }

    #[test]
    fn remove_without_any_artifacts_is_fine() {
        let f = fixture();
        f.cache.remove(1).unwrap();
    }

    #[test]
    fn mime_families() {
        assert_eq!(kind_for_mime("video/x-matroska"), Some(SourceKind::Video));
        assert_eq!(kind_for_mime("image/jpeg"), Some(SourceKind::Image));
        assert_eq!(kind_for_mime("application/pdf"), Some(SourceKind::Document));
        assert_eq!(kind_for_mime("image/vnd.djvu"), Some(SourceKind::Document));
        assert_eq!(kind_for_mime("text/plain"), None);
    }
}

//! Producing thumbnail artifacts.
//!
//! The cache hands a [`DerivationJob`] to a [`Deriver`] and moves on. A job
//! either renames a finished PNG into place or leaves a failure marker
//! behind; nobody reports back to the cache.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::media::{ffmpeg, resize};

/// How a source file is turned into a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Frame extraction with ffmpeg.
    Video,
    /// In-process decode and resize.
    Image,
    /// First page rendered by ImageMagick.
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationJob {
    pub source: PathBuf,
    pub kind: SourceKind,
    pub size: u32,
    pub target: PathBuf,
    pub failure_marker: PathBuf,
}

pub trait Deriver: Send + Sync {
    /// Starts deriving `job`. May return before the artifact exists.
    fn submit(&self, job: DerivationJob);
}

/// Runs every job on its own detached thread. No timeout, no cancellation,
/// no completion tracking.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackgroundDeriver;

impl Deriver for BackgroundDeriver {
    fn submit(&self, job: DerivationJob) {
        debug!("Deriving {:?} from {:?}", job.target, job.source);
        let spawned = thread::Builder::new()
            .name("thumbnailer".into())
            .spawn(move || process(&job));
        if let Err(e) = spawned {
            warn!("Could not start thumbnail derivation: {}", e);
        }
    }
}

/// Runs jobs on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDeriver;

impl Deriver for InlineDeriver {
    fn submit(&self, job: DerivationJob) {
        process(&job);
    }
}

/// Derives the artifact, recording a permanent failure marker if that fails.
pub fn process(job: &DerivationJob) {
    if let Err(e) = run(job) {
        warn!("Thumbnail derivation failed for {:?}: {:#}", job.source, e);
        if let Err(e) = mark_failed(&job.failure_marker) {
            warn!("Could not write failure marker {:?}: {}", job.failure_marker, e);
        }
    }
}

/// Writes into a temporary file of its own next to the target and renames
/// it over the target, so a target that exists is always complete.
pub fn run(job: &DerivationJob) -> Result<()> {
    let dir = job
        .target
        .parent()
        .with_context(|| format!("Thumbnail target {:?} has no folder", job.target))?;
    let partial = tempfile::Builder::new()
        .prefix(".thumb-")
        .suffix(".part")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create a temporary thumbnail in {:?}", dir))?;

    match job.kind {
        SourceKind::Video => ffmpeg::extract_thumbnail(&job.source, partial.path(), job.size),
        SourceKind::Image => resize::image_thumbnail(&job.source, partial.path(), job.size),
        SourceKind::Document => resize::document_thumbnail(&job.source, partial.path(), job.size),
    }?;

    match partial.persist(&job.target) {
        Ok(_) => Ok(()),
        // a duplicate job published the same artifact first
        Err(_) if job.target.exists() => Ok(()),
        Err(e) => Err(anyhow::Error::new(e.error)
            .context(format!("Failed to move thumbnail into {:?}", job.target))),
    }
}

fn mark_failed(marker: &Path) -> std::io::Result<()> {
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(marker, b"")
}

use std::path::Path;
use anyhow::{Result, Context};

pub const DIRECTORY: &str = "inode/directory";
pub const UNKNOWN: &str = "application/octet-stream";

/// Sniffs the MIME type of `path` from its content. Folders report
/// [`DIRECTORY`], unrecognised content [`UNKNOWN`].
pub fn detect_mimetype(path: &Path) -> Result<String> {
    if path.is_dir() {
        return Ok(DIRECTORY.to_string());
    }

    let kind = infer::get_from_path(path)
        .with_context(|| format!("Failed to read file for mimetype detection: {:?}", path))?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok(UNKNOWN.to_string()),
    }
}

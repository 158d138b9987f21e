use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

pub const DEFAULT_PROFILE: &str = "default";
const APP_DIR: &str = "tag-manager";

/// A named profile directory holding one catalog and its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    name: String,
    dir: PathBuf,
}

impl Profile {
    /// `<user config dir>/tag-manager/<name>`.
    pub fn named(name: &str) -> Result<Self> {
        let base = directories::BaseDirs::new().ok_or(Error::NoConfigDir)?;
        let dir = base.config_dir().join(APP_DIR).join(name);
        Ok(Self {
            name: name.to_string(),
            dir,
        })
    }

    pub fn at(dir: &Path) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        Self {
            name,
            dir: dir.to_path_buf(),
        }
    }

    /// Creates the profile folder if needed.
    pub fn ensure(&self) -> Result<()> {
        if !self.dir.exists() {
            info!("Create profile {}: {}", self.name, self.dir.display());
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.join("data.db")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.dir.join("thumbnails")
    }

    pub fn failed_thumbnails_dir(&self) -> PathBuf {
        self.dir.join("thumbnails_fail")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }
}

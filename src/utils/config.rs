//! The JSON settings document of a profile.
//!
//! `config.json` holds a top-level `root` plus the `ui` and `server`
//! sections. Keys this crate does not know about are kept untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use crate::error::Result;

pub const ROOT: &str = "root";
pub const DEFAULT_PORT: u16 = 44659;

pub const UI_DEFAULT_METATAG: &str = "default-metatag";
pub const UI_RANDOMIZE: &str = "randomize";
pub const SERVER_PORT: &str = "port";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Ui,
    Server,
}

impl Section {
    pub fn key(self) -> &'static str {
        match self {
            Section::Ui => "ui",
            Section::Server => "server",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    values: Map<String, Value>,
}

impl Settings {
    /// Reads `path`, filling in and saving whatever defaults are missing.
    /// A missing file is created.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            match serde_json::from_str(&fs::read_to_string(path)?)? {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        } else {
            info!("Create settings: {}", path.display());
            Map::new()
        };

        let mut settings = Self {
            path: path.to_path_buf(),
            values,
        };
        if settings.fill_defaults() {
            settings.save()?;
        }
        Ok(settings)
    }

    fn fill_defaults(&mut self) -> bool {
        let mut edited = false;
        if !self.values.contains_key(ROOT) {
            let root = default_root().to_string_lossy().into_owned();
            self.values.insert(ROOT.into(), Value::String(root));
            edited = true;
        }
        for section in [Section::Ui, Section::Server] {
            if !matches!(self.values.get(section.key()), Some(Value::Object(_))) {
                self.values.insert(section.key().into(), Value::Object(Map::new()));
                edited = true;
            }
        }
        if self.get(Section::Server, SERVER_PORT).is_none() {
            self.insert_in(Section::Server, SERVER_PORT, Value::from(DEFAULT_PORT));
            edited = true;
        }
        edited
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, section: Section, key: &str) -> Option<&Value> {
        self.values
            .get(section.key())
            .and_then(Value::as_object)
            .and_then(|s| s.get(key))
    }

    /// Stores `value` under `section.key` and saves. Returns false, without
    /// writing, when the value is unchanged.
    pub fn set(&mut self, section: Section, key: &str, value: Value) -> Result<bool> {
        if self.get(section, key) == Some(&value) {
            return Ok(false);
        }
        self.insert_in(section, key, value);
        self.save()?;
        Ok(true)
    }

    fn insert_in(&mut self, section: Section, key: &str, value: Value) {
        let entry = self
            .values
            .entry(section.key())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key.into(), value);
        } else {
            let mut map = Map::new();
            map.insert(key.into(), value);
            *entry = Value::Object(map);
        }
    }

    /// Folder every catalogued path is relative to.
    pub fn root(&self) -> PathBuf {
        self.values
            .get(ROOT)
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(default_root)
    }

    pub fn set_root(&mut self, root: &Path) -> Result<bool> {
        let value = Value::String(root.to_string_lossy().into_owned());
        if self.values.get(ROOT) == Some(&value) {
            return Ok(false);
        }
        self.values.insert(ROOT.into(), value);
        self.save()?;
        Ok(true)
    }

    /// Whether an empty search shows random files.
    pub fn randomize(&self) -> bool {
        self.get(Section::Ui, UI_RANDOMIZE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn port(&self) -> u16 {
        self.get(Section::Server, SERVER_PORT)
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn default_metatag(&self) -> Option<&str> {
        self.get(Section::Ui, UI_DEFAULT_METATAG).and_then(Value::as_str)
    }
}

fn default_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_default()
        .join("TagManager")
}

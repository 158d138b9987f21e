//! A personal file-tagging catalog backed by SQLite, with on-demand
//! thumbnails.

pub mod database;
pub mod error;
pub mod ingest;
pub mod library;
pub mod media;
pub mod thumbnail;
pub mod utils;

pub use error::{Error, Result};
pub use library::Library;

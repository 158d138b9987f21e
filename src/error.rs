use std::fmt;

use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which catalog table a lookup or mutation targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    File,
    Tag,
    Metatag,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::File => f.write_str("file"),
            EntityKind::Tag => f.write_str("tag"),
            EntityKind::Metatag => f.write_str("metatag"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    /// A uniqueness, not-null or foreign key constraint was violated.
    /// The surrounding unit of work has already been rolled back.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("file {0} is not a folder")]
    NotAFolder(i64),

    #[error("unsupported catalog schema version {0}")]
    UnsupportedSchema(i32),

    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("catalog connection lock poisoned")]
    LockPoisoned,

    #[error("could not determine the user configuration directory")]
    NoConfigDir,
}

impl Error {
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                Error::Integrity(message.clone().unwrap_or_else(|| code.to_string()))
            }
            _ => Error::Database(err),
        }
    }
}

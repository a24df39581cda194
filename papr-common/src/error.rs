//! Bootstrap errors: loading configuration and opening the database

use std::path::Path;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Pool creation or schema setup failed
    #[error("Database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparsable or out-of-range configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Config error naming the file it came from
    pub fn config_file(path: &Path, reason: impl std::fmt::Display) -> Self {
        Error::Config(format!("{}: {}", path.display(), reason))
    }
}

//! Custom error types for the download worker.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] crate::archive::ArchiveError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

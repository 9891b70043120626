//! Streaming ZIP archives built from manifest items.
//!
//! - [`metadata`]: headers-only prepass over a manifest
//! - [`assembler`]: writes fetched bodies as ZIP entries on demand
//! - [`stream`]: the response body handed to the HTTP layer

pub mod assembler;
pub mod metadata;
pub mod stream;

pub use assembler::{assemble, ArchiveSummary};
pub use metadata::{collect_metadata, MetadataRecord};
pub use stream::ArchiveStream;

use crate::config::ArchiveConfig;
use thiserror::Error;

/// Smallest pipe between the ZIP writer and the response body.
const MIN_BUFFER_SIZE: usize = 4 * 1024;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("zip encoding failed: {0}")]
    Zip(#[from] async_zip::error::ZipError),

    #[error("archive output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("reading body of `{name}` failed: {source}")]
    Body {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unknown compression `{0}` (expected stored or deflate)")]
    UnknownCompression(String),
}

impl ArchiveError {
    /// True when the consumer of the archive went away
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ArchiveError::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            )
        )
    }
}

/// Compression applied to every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCompression {
    Stored,
    Deflate,
}

impl std::str::FromStr for EntryCompression {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stored" | "store" | "none" => Ok(EntryCompression::Stored),
            "deflate" | "deflated" => Ok(EntryCompression::Deflate),
            _ => Err(ArchiveError::UnknownCompression(s.to_string())),
        }
    }
}

impl From<EntryCompression> for async_zip::Compression {
    fn from(value: EntryCompression) -> Self {
        match value {
            EntryCompression::Stored => async_zip::Compression::Stored,
            EntryCompression::Deflate => async_zip::Compression::Deflate,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    pub compression: EntryCompression,
    pub buffer_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression: EntryCompression::Stored,
            buffer_size: 64 * 1024,
        }
    }
}

impl TryFrom<&ArchiveConfig> for ArchiveOptions {
    type Error = ArchiveError;

    fn try_from(config: &ArchiveConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            compression: config.compression.parse()?,
            buffer_size: config.buffer_size.max(MIN_BUFFER_SIZE),
        })
    }
}

//! Download Worker Library
//!
//! Intercepts driver download requests and answers them with a ZIP archive
//! streamed while the listed files are being fetched.

pub mod api;
pub mod archive;
pub mod config;
pub mod daemon;
pub mod fetch;
pub mod manifest;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use manifest::{DownloadItem, Manifest};
pub use utils::{Result, WorkerError};

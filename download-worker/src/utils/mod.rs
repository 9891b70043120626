//! Utility modules for the download worker.

pub mod errors;
pub mod logger;

pub use errors::{Result, WorkerError};

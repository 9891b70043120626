//! Process lifecycle: activation state and shutdown.

pub mod context;
pub mod shutdown;

pub use context::{DownloadGuard, WorkerContext};
pub use shutdown::ShutdownCoordinator;

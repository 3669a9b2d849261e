//! Log collection collaborators.
//!
//! A [`LogLoader`] produces the named blobs that make up one upload, the
//! policy snapshot appended to them, and optionally a single compressed
//! archive of the whole bundle.

pub mod archive;
mod files;

pub use files::{FileLogLoader, MAX_LOG_FILE_SIZE, TRUNCATION_MARKER};

use async_trait::async_trait;

/// One named log blob. The name is the file's path on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl LogFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Logs in discovery order.
pub type SystemLogs = Vec<LogFile>;

#[async_trait]
pub trait LogLoader: Send + Sync {
    /// Collect the system logs. Missing or unreadable files are skipped.
    async fn collect_logs(&self) -> SystemLogs;

    /// JSON snapshot of the effective policy; at least `{}`.
    fn policy_snapshot(&self) -> String;

    /// Pack the bundle into one archive. Returns an empty blob on any failure.
    async fn compress_bundle(&self, logs: SystemLogs) -> Vec<u8> {
        match tokio::task::spawn_blocking(move || archive::compress_bundle(&logs)).await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::error!(error = %e, "Log compression task failed");
                Vec::new()
            }
        }
    }
}

use super::{LogFile, LogLoader, SystemLogs};
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum number of bytes read from a single log file (50 MiB).
pub const MAX_LOG_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Line appended to a log that was cut at [`MAX_LOG_FILE_SIZE`].
pub const TRUNCATION_MARKER: &str = "<truncated due to file size>";

/// Collects a fixed list of log files from the local filesystem.
#[derive(Debug, Clone)]
pub struct FileLogLoader {
    log_files: Vec<PathBuf>,
    policy_dump_path: Option<PathBuf>,
    max_file_size: u64,
}

impl FileLogLoader {
    pub fn new(log_files: Vec<PathBuf>, policy_dump_path: Option<PathBuf>) -> Self {
        Self {
            log_files,
            policy_dump_path,
            max_file_size: MAX_LOG_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    fn read_all(&self) -> SystemLogs {
        let mut logs = Vec::with_capacity(self.log_files.len());

        for path in &self.log_files {
            match read_capped(path, self.max_file_size) {
                Ok(content) => logs.push(LogFile::new(path.to_string_lossy(), content)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Log file not present, skipping");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read log file, skipping");
                }
            }
        }

        info!(files = logs.len(), "Collected system logs");
        logs
    }
}

/// Read at most `cap` bytes. When the file is longer the trailing partial
/// line is dropped and [`TRUNCATION_MARKER`] appended.
fn read_capped(path: &Path, cap: u64) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut buffer = Vec::new();
    file.take(cap).read_to_end(&mut buffer)?;

    let truncated = file_len > cap || buffer.len() as u64 == cap && has_more(path, cap)?;
    if truncated {
        let keep = buffer
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        buffer.truncate(keep);
        buffer.extend_from_slice(TRUNCATION_MARKER.as_bytes());
        buffer.push(b'\n');
        warn!(path = %path.display(), cap, "Log file truncated");
    }

    // Logs are uploaded as text/plain
    Ok(String::from_utf8_lossy(&buffer).into_owned().into_bytes())
}

// Files such as /proc entries report a zero length; probe for data past the cap.
fn has_more(path: &Path, cap: u64) -> io::Result<bool> {
    let mut file = File::open(path)?;
    io::copy(&mut (&mut file).take(cap), &mut io::sink())?;
    let mut probe = [0u8; 1];
    Ok(file.read(&mut probe)? > 0)
}

fn policy_json(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return "{}".to_string();
    };

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(content),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Policy dump is not valid JSON, sending as-is");
                content
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Policy dump unavailable");
            "{}".to_string()
        }
    }
}

#[async_trait]
impl LogLoader for FileLogLoader {
    async fn collect_logs(&self) -> SystemLogs {
        let loader = self.clone();
        match tokio::task::spawn_blocking(move || loader.read_all()).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(error = %e, "Log collection task failed");
                Vec::new()
            }
        }
    }

    fn policy_snapshot(&self) -> String {
        policy_json(self.policy_dump_path.as_deref())
    }
}

use crate::config::ensure_private_dir;
use crate::error::Result;
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_FILE_NAME: &str = "app.log";
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_LOG_BACKUPS: usize = 5;

static LOGGER_INITIALIZED: std::sync::Once = std::sync::Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

/// Install console and file logging. Later calls are no-ops.
pub fn init_logging(logs_dir: &Path) -> Result<()> {
    ensure_private_dir(logs_dir)?;

    let log_file_path = logs_dir.join(LOG_FILE_NAME);
    if should_rotate_log(&log_file_path)? {
        rotate_log_file(&log_file_path)?;
    }

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Console logging - compact format
        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(env_filter.clone());

        let file_appender = tracing_appender::rolling::never(logs_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Store the guard to keep the writer alive
        if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
            *guard_mutex = Some(guard);
        }

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();
    });

    Ok(())
}

fn should_rotate_log(log_file_path: &Path) -> Result<bool> {
    if !log_file_path.exists() {
        return Ok(false);
    }

    let metadata = std::fs::metadata(log_file_path)?;
    Ok(metadata.len() > MAX_LOG_SIZE)
}

fn rotate_log_file(log_file_path: &Path) -> Result<()> {
    // Rotate existing backup files (4 -> 5, 3 -> 4, etc.)
    for i in (1..MAX_LOG_BACKUPS).rev() {
        let current_backup = log_file_path.with_extension(format!("log.{}", i));
        let next_backup = log_file_path.with_extension(format!("log.{}", i + 1));

        if current_backup.exists() {
            std::fs::rename(&current_backup, &next_backup)?;
        }
    }

    // Move current log to .1
    if log_file_path.exists() {
        let first_backup = log_file_path.with_extension("log.1");
        std::fs::rename(log_file_path, first_backup)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_log_rotation() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("app.log");

        // Create a file larger than rotation threshold
        {
            let mut file = File::create(&log_file).unwrap();
            let large_content = "x".repeat(11 * 1024 * 1024); // 11MB
            file.write_all(large_content.as_bytes()).unwrap();
        }

        assert!(should_rotate_log(&log_file).unwrap());

        rotate_log_file(&log_file).unwrap();

        let backup_file = log_file.with_extension("log.1");
        assert!(backup_file.exists());
        assert!(!log_file.exists());
    }

    #[test]
    fn test_rotation_shifts_existing_backups() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("app.log");
        std::fs::write(&log_file, "current").unwrap();
        std::fs::write(log_file.with_extension("log.1"), "older").unwrap();

        rotate_log_file(&log_file).unwrap();

        let first = std::fs::read_to_string(log_file.with_extension("log.1")).unwrap();
        let second = std::fs::read_to_string(log_file.with_extension("log.2")).unwrap();
        assert_eq!(first, "current");
        assert_eq!(second, "older");
    }

    #[test]
    fn test_small_log_not_rotated() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("app.log");
        std::fs::write(&log_file, "small").unwrap();
        assert!(!should_rotate_log(&log_file).unwrap());
        assert!(!should_rotate_log(&temp_dir.path().join("missing.log")).unwrap());
    }
}

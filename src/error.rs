use thiserror::Error;

/// System log uploader errors
#[derive(Debug, Error)]
pub enum UploaderError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local state (persisted attempt log) errors
    #[error("State error: {0}")]
    State(String),

    /// Device settings errors
    #[error("Settings error: {0}")]
    Settings(String),

    /// Upload/transport errors
    #[error("Upload error: {0}")]
    Upload(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// File watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Log bundle archive errors
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, UploaderError>;

impl<T> From<std::sync::PoisonError<T>> for UploaderError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        UploaderError::LockPoisoned(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E: Into<UploaderError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| {
            let err: UploaderError = e.into();
            match err {
                UploaderError::Other(s) => UploaderError::Other(format!("{}: {}", msg, s)),
                UploaderError::Config(s) => UploaderError::Config(format!("{}: {}", msg, s)),
                UploaderError::State(s) => UploaderError::State(format!("{}: {}", msg, s)),
                UploaderError::Settings(s) => UploaderError::Settings(format!("{}: {}", msg, s)),
                UploaderError::Upload(s) => UploaderError::Upload(format!("{}: {}", msg, s)),
                UploaderError::LockPoisoned(s) => {
                    UploaderError::LockPoisoned(format!("{}: {}", msg, s))
                }
                UploaderError::Io(e) => {
                    UploaderError::Io(std::io::Error::new(e.kind(), format!("{}: {}", msg, e)))
                }
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UploaderError::State("attempt log unreadable".to_string());
        assert_eq!(err.to_string(), "State error: attempt log unreadable");
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let result = result.context("Failed to read config file");

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("I/O error"));
        assert!(err_msg.contains("Failed to read config file"));
    }

    #[test]
    fn test_context_prefixes_string_variants() {
        let result: Result<()> = Err(UploaderError::Config("missing url".to_string()));
        let err = result.context("Loading config").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Loading config: missing url");
    }
}

//! Upload transport collaborators.
//!
//! An [`UploadJob`] is addressed at a URL and carries one or more data
//! segments; an [`Uploader`] performs it and reports exactly one outcome.

mod http;

pub use http::HttpUploader;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failure reported by an uploader.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UploadErrorCode {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server responded with status {0}")]
    HttpStatus(u16),
    #[error("upload canceled")]
    Canceled,
}

/// Coarse classification of an [`UploadErrorCode`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 4xx responses
    Client,
    /// 5xx responses
    Server,
    /// Connection issues, timeouts, cancellation
    Network,
}

impl UploadErrorCode {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadErrorCode::HttpStatus(status) if (400..500).contains(status) => ErrorKind::Client,
            UploadErrorCode::HttpStatus(_) => ErrorKind::Server,
            UploadErrorCode::Network(_) | UploadErrorCode::Timeout | UploadErrorCode::Canceled => {
                ErrorKind::Network
            }
        }
    }
}

/// One part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSegment {
    pub field_name: String,
    pub file_name: String,
    pub headers: Vec<(String, String)>,
    pub content: Vec<u8>,
}

impl UploadSegment {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A pending upload: destination plus segments, sent by [`Uploader::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    url: String,
    segments: Vec<UploadSegment>,
}

impl UploadJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            segments: Vec::new(),
        }
    }

    pub fn add_segment(
        &mut self,
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        headers: Vec<(String, String)>,
        content: Vec<u8>,
    ) {
        self.segments.push(UploadSegment {
            field_name: field_name.into(),
            file_name: file_name.into(),
            headers,
            content,
        });
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn segments(&self) -> &[UploadSegment] {
        &self.segments
    }

    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.content.len()).sum()
    }
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Perform the upload. Resolves exactly once with the outcome.
    async fn start(&self, job: UploadJob) -> Result<(), UploadErrorCode>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error_codes() {
        assert_eq!(UploadErrorCode::HttpStatus(400).kind(), ErrorKind::Client);
        assert_eq!(UploadErrorCode::HttpStatus(404).kind(), ErrorKind::Client);
        assert_eq!(UploadErrorCode::HttpStatus(500).kind(), ErrorKind::Server);
        assert_eq!(UploadErrorCode::HttpStatus(503).kind(), ErrorKind::Server);
        assert_eq!(UploadErrorCode::Timeout.kind(), ErrorKind::Network);
        assert_eq!(
            UploadErrorCode::Network("connection refused".into()).kind(),
            ErrorKind::Network
        );
    }

    #[test]
    fn test_job_segments_in_order() {
        let mut job = UploadJob::new("https://dm.example.com/upload");
        job.add_segment("file1", "/var/log/a", vec![("File-Type".into(), "log_file".into())], b"a".to_vec());
        job.add_segment("file2", "/var/log/b", Vec::new(), b"bb".to_vec());

        let names: Vec<&str> = job.segments().iter().map(|s| s.field_name.as_str()).collect();
        assert_eq!(names, vec!["file1", "file2"]);
        assert_eq!(job.total_bytes(), 3);
        assert_eq!(job.segments()[0].header("file-type"), Some("log_file"));
        assert_eq!(job.segments()[1].header("File-Type"), None);
    }
}

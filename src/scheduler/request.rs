//! Turns collected logs into an upload job.

use super::types::UploadRequest;
use crate::uploader::UploadJob;

pub const FILE_TYPE_HEADER: &str = "File-Type";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

pub const FILE_TYPE_LOG_FILE: &str = "log_file";
pub const FILE_TYPE_ZIPPED_LOG_FILE: &str = "zipped_log_file";

pub const CONTENT_TYPE_PLAIN_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

pub const ZIPPED_LOGS_FIELD_NAME: &str = "logs";
pub const ZIPPED_LOGS_FILE_NAME: &str = "logs.zip";

fn headers(file_type: &str, content_type: &str) -> Vec<(String, String)> {
    vec![
        (FILE_TYPE_HEADER.to_string(), file_type.to_string()),
        (CONTENT_TYPE_HEADER.to_string(), content_type.to_string()),
    ]
}

/// One plain-text segment per entry, named `file1`, `file2`, ...
pub fn build_plain_job(upload_url: &str, request: UploadRequest) -> UploadJob {
    let mut job = UploadJob::new(upload_url);
    for (index, log) in request.logs.into_iter().enumerate() {
        job.add_segment(
            format!("file{}", index + 1),
            log.name,
            headers(FILE_TYPE_LOG_FILE, CONTENT_TYPE_PLAIN_TEXT),
            log.content,
        );
    }
    job
}

/// A single segment carrying the compressed bundle.
pub fn build_zipped_job(upload_url: &str, archive: Vec<u8>) -> UploadJob {
    let mut job = UploadJob::new(upload_url);
    job.add_segment(
        ZIPPED_LOGS_FIELD_NAME,
        ZIPPED_LOGS_FILE_NAME,
        headers(FILE_TYPE_ZIPPED_LOG_FILE, CONTENT_TYPE_OCTET_STREAM),
        archive,
    );
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LogFile;
    use crate::scheduler::types::POLICY_DUMP_FILE_LOCATION;

    const URL: &str = "https://dm.example.com/upload";

    #[test]
    fn test_plain_job_numbers_segments() {
        let mut request = UploadRequest::new(vec![
            LogFile::new("/var/log/messages", b"a".to_vec()),
            LogFile::new("/var/log/net.log", b"b".to_vec()),
        ]);
        request.append_policy_dump("{}".to_string());

        let job = build_plain_job(URL, request);
        let segments = job.segments();

        assert_eq!(job.url(), URL);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].field_name, "file1");
        assert_eq!(segments[0].file_name, "/var/log/messages");
        assert_eq!(segments[2].field_name, "file3");
        assert_eq!(segments[2].file_name, POLICY_DUMP_FILE_LOCATION);
        for segment in segments {
            assert_eq!(segment.header(FILE_TYPE_HEADER), Some(FILE_TYPE_LOG_FILE));
            assert_eq!(segment.header(CONTENT_TYPE_HEADER), Some(CONTENT_TYPE_PLAIN_TEXT));
        }
    }

    #[test]
    fn test_zipped_job_single_segment() {
        let job = build_zipped_job(URL, vec![1, 2, 3]);
        let segments = job.segments();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].field_name, "logs");
        assert_eq!(segments[0].file_name, "logs.zip");
        assert_eq!(segments[0].header(FILE_TYPE_HEADER), Some("zipped_log_file"));
        assert_eq!(
            segments[0].header(CONTENT_TYPE_HEADER),
            Some("application/octet-stream")
        );
        assert_eq!(segments[0].content, vec![1, 2, 3]);
    }
}

//! Single-blob ZIP archive of a log bundle.
//!
//! One deflated entry per log, named after the log's path, in bundle order.

use super::{LogFile, SystemLogs};
use crate::error::Result;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Compress `logs` into one blob. Any failure yields an empty blob.
pub fn compress_bundle(logs: &SystemLogs) -> Vec<u8> {
    match try_compress_bundle(logs) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::error!(error = %e, files = logs.len(), "Failed to archive system logs");
            Vec::new()
        }
    }
}

fn try_compress_bundle(logs: &SystemLogs) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for log in logs {
        writer.start_file(log.name.as_str(), options)?;
        writer.write_all(&log.content)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Inverse of [`compress_bundle`].
pub fn extract_bundle(blob: &[u8]) -> Result<SystemLogs> {
    let mut archive = ZipArchive::new(Cursor::new(blob))?;
    let mut logs = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        logs.push(LogFile::new(entry.name(), content));
    }

    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_preserves_names_and_order() {
        let logs = vec![
            LogFile::new("/var/log/messages", b"kernel: boot\n".to_vec()),
            LogFile::new("/var/log/net.log", vec![0u8, 159, 146, 150]),
            LogFile::new("/var/log/policy_dump.json", b"{}".to_vec()),
        ];

        let blob = compress_bundle(&logs);
        assert!(!blob.is_empty());
        assert_eq!(extract_bundle(&blob).unwrap(), logs);
    }

    #[test]
    fn test_repetitive_logs_compress() {
        let content = "Oct 16 10:00:00 localhost shill: link up\n".repeat(2000);
        let logs = vec![LogFile::new("/var/log/net.log", content.clone().into_bytes())];

        let blob = compress_bundle(&logs);
        assert!(blob.len() < content.len());
    }

    #[test]
    fn test_archive_is_a_zip_file() {
        let blob = compress_bundle(&vec![LogFile::new("/var/log/messages", b"m".to_vec())]);
        // Local file header signature
        assert_eq!(&blob[..4], b"PK\x03\x04");
    }

    #[test]
    fn test_empty_bundle_still_produces_archive() {
        let blob = compress_bundle(&Vec::new());
        assert!(!blob.is_empty());
        assert!(extract_bundle(&blob).unwrap().is_empty());
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_bundle(b"definitely not a zip archive").is_err());
    }
}

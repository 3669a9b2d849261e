//! Multipart HTTP uploader.

use super::{UploadErrorCode, UploadJob, UploadSegment, Uploader};
use crate::error::{Result, UploaderError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, info};

/// Sends upload jobs as `multipart/form-data` POST requests.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl HttpUploader {
    pub fn new(auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploaderError::Upload(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, auth_token })
    }
}

fn build_part(segment: UploadSegment) -> std::result::Result<Part, UploadErrorCode> {
    let mut headers = HeaderMap::new();
    let mut content_type = None;

    for (name, value) in &segment.headers {
        if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
            content_type = Some(value.clone());
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| UploadErrorCode::Network(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| UploadErrorCode::Network(format!("invalid header value: {}", e)))?;
        headers.insert(name, value);
    }

    let mut part = Part::bytes(segment.content)
        .file_name(segment.file_name)
        .headers(headers);

    if let Some(content_type) = content_type {
        part = part
            .mime_str(&content_type)
            .map_err(|e| UploadErrorCode::Network(format!("invalid content type: {}", e)))?;
    }

    Ok(part)
}

fn map_transport_error(err: reqwest::Error) -> UploadErrorCode {
    if err.is_timeout() {
        UploadErrorCode::Timeout
    } else if let Some(status) = err.status() {
        UploadErrorCode::HttpStatus(status.as_u16())
    } else {
        UploadErrorCode::Network(err.to_string())
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn start(&self, job: UploadJob) -> std::result::Result<(), UploadErrorCode> {
        let url = job.url().to_string();
        let total_bytes = job.total_bytes();

        let mut form = Form::new();
        for segment in job.segments().iter().cloned() {
            let field_name = segment.field_name.clone();
            form = form.part(field_name, build_part(segment)?);
        }

        let mut request = self.client.post(&url).multipart(form);
        if let Some(ref token) = self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        debug!(url = %url, bytes = total_bytes, "Sending system log upload");

        let response = request.send().await.map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            info!(status = status.as_u16(), body = %error_text, "System log upload rejected");
            return Err(UploadErrorCode::HttpStatus(status.as_u16()));
        }

        info!(url = %url, bytes = total_bytes, "System log upload accepted");
        Ok(())
    }
}

//! Type definitions for the upload scheduler.
//!
//! Defines scheduling constants, the per-cycle UploadRequest, the in-memory
//! SchedulerState and the actions the state machine asks its driver to run.

use crate::events::SchedulerEvent;
use crate::loader::{LogFile, SystemLogs};
use crate::uploader::UploadJob;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::metrics::UploadMetrics;

/// Retries after the first failure of a cycle before giving up.
pub const MAX_NUM_RETRIES: u32 = 1;

/// Delay before retrying a failed upload (120 seconds).
pub const ERROR_RETRY_DELAY: Duration = Duration::seconds(120);

/// Maximum number of upload attempts inside one throttle window.
pub const LOG_THROTTLE_COUNT: usize = 100;

/// Length of the rolling throttle window (24 hours).
pub const LOG_THROTTLE_WINDOW: Duration = Duration::hours(24);

/// Pseudo-location reported for the policy dump segment.
pub const POLICY_DUMP_FILE_LOCATION: &str = "/var/log/policy_dump.json";

/// Logs gathered for one upload cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadRequest {
    pub logs: SystemLogs,
}

impl UploadRequest {
    pub fn new(logs: SystemLogs) -> Self {
        Self { logs }
    }

    /// Append the policy snapshot as the final entry.
    pub fn append_policy_dump(&mut self, policy_json: String) {
        self.logs
            .push(LogFile::new(POLICY_DUMP_FILE_LOCATION, policy_json.into_bytes()));
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchedulerState {
    pub retry_count: u32,
    /// `None` stands for the epoch: the first decision fires immediately.
    pub last_upload_attempt: Option<DateTime<Utc>>,
    pub upload_enabled: bool,
    pub log_upload_in_progress: bool,
}

/// Work the state machine hands to its driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerAction {
    /// Cancel any armed timer and arm a new one.
    ArmTimer { generation: u64, delay: Duration },
    CollectLogs { cycle_id: String },
    CompressLogs { cycle_id: String, request: UploadRequest },
    StartUpload { cycle_id: String, job: UploadJob },
    Publish(SchedulerEvent),
}

/// Point-in-time view of the scheduler, for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub upload_enabled: bool,
    pub log_upload_in_progress: bool,
    pub retry_count: u32,
    pub last_upload_attempt: Option<DateTime<Utc>>,
    pub upload_frequency_ms: i64,
    pub recorded_attempts: Vec<DateTime<Utc>>,
    pub metrics: UploadMetrics,
}

//! System log upload scheduling.
//!
//! [`UploadScheduler`] decides when to collect and upload; [`SystemLogUploader`]
//! drives it on tokio with real timers and collaborators.

mod attempt_log;
mod clock;
mod machine;
mod metrics;
mod request;
mod runtime;
mod types;

pub use attempt_log::{UploadAttemptLog, UPLOAD_ATTEMPTS_KEY};
pub use clock::{Clock, SystemClock};
pub use machine::UploadScheduler;
pub use metrics::{SystemLogUploadResult, UploadMetrics};
pub use request::{
    build_plain_job, build_zipped_job, CONTENT_TYPE_HEADER, CONTENT_TYPE_OCTET_STREAM,
    CONTENT_TYPE_PLAIN_TEXT, FILE_TYPE_HEADER, FILE_TYPE_LOG_FILE, FILE_TYPE_ZIPPED_LOG_FILE,
    ZIPPED_LOGS_FIELD_NAME, ZIPPED_LOGS_FILE_NAME,
};
pub use runtime::{SchedulerDeps, SystemLogUploader};
pub use types::{
    SchedulerAction, SchedulerState, SchedulerStatus, UploadRequest, ERROR_RETRY_DELAY,
    LOG_THROTTLE_COUNT, LOG_THROTTLE_WINDOW, MAX_NUM_RETRIES, POLICY_DUMP_FILE_LOCATION,
};

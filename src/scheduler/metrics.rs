//! Upload outcome metric.

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemLogUploadResult {
    NonZippedLogsUploadSuccess,
    NonZippedLogsUploadFailure,
    ZippedLogsUploadSuccess,
    ZippedLogsUploadFailure,
}

impl SystemLogUploadResult {
    pub fn from_outcome(zipped: bool, success: bool) -> Self {
        match (zipped, success) {
            (false, true) => Self::NonZippedLogsUploadSuccess,
            (false, false) => Self::NonZippedLogsUploadFailure,
            (true, true) => Self::ZippedLogsUploadSuccess,
            (true, false) => Self::ZippedLogsUploadFailure,
        }
    }
}

/// Counters of terminal upload outcomes since start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadMetrics {
    pub non_zipped_success: u64,
    pub non_zipped_failure: u64,
    pub zipped_success: u64,
    pub zipped_failure: u64,
}

impl UploadMetrics {
    pub fn record(&mut self, result: SystemLogUploadResult) {
        let counter = match result {
            SystemLogUploadResult::NonZippedLogsUploadSuccess => &mut self.non_zipped_success,
            SystemLogUploadResult::NonZippedLogsUploadFailure => &mut self.non_zipped_failure,
            SystemLogUploadResult::ZippedLogsUploadSuccess => &mut self.zipped_success,
            SystemLogUploadResult::ZippedLogsUploadFailure => &mut self.zipped_failure,
        };
        *counter += 1;

        info!(metric = "system_log_upload_result", ?result, count = *counter, "Recorded upload result");
    }

    pub fn total(&self) -> u64 {
        self.non_zipped_success + self.non_zipped_failure + self.zipped_success + self.zipped_failure
    }

    pub fn failures(&self) -> u64 {
        self.non_zipped_failure + self.zipped_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_outcome() {
        assert_eq!(
            SystemLogUploadResult::from_outcome(true, false),
            SystemLogUploadResult::ZippedLogsUploadFailure
        );
        assert_eq!(
            SystemLogUploadResult::from_outcome(false, true),
            SystemLogUploadResult::NonZippedLogsUploadSuccess
        );
    }

    #[test]
    fn test_record_counts() {
        let mut metrics = UploadMetrics::default();
        metrics.record(SystemLogUploadResult::NonZippedLogsUploadSuccess);
        metrics.record(SystemLogUploadResult::NonZippedLogsUploadFailure);
        metrics.record(SystemLogUploadResult::NonZippedLogsUploadFailure);

        assert_eq!(metrics.non_zipped_success, 1);
        assert_eq!(metrics.non_zipped_failure, 2);
        assert_eq!(metrics.total(), 3);
        assert_eq!(metrics.failures(), 2);
    }
}

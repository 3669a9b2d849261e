//! Persisted rolling log of upload attempts.
//!
//! Holds at most [`LOG_THROTTLE_COUNT`] timestamps, none older than
//! [`LOG_THROTTLE_WINDOW`] at the time of the last update, oldest first.
//! Timestamps are stored as seconds since the Unix epoch.

use super::types::{LOG_THROTTLE_COUNT, LOG_THROTTLE_WINDOW};
use crate::state_store::LocalStateStore;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{error, warn};

/// Local state key of the attempt list.
pub const UPLOAD_ATTEMPTS_KEY: &str = "system_log_uploader.upload_attempts";

pub struct UploadAttemptLog {
    store: Box<dyn LocalStateStore>,
    timestamps: VecDeque<DateTime<Utc>>,
}

impl std::fmt::Debug for UploadAttemptLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadAttemptLog")
            .field("store", &"<local state>")
            .field("timestamps", &self.timestamps)
            .finish()
    }
}

fn to_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

fn from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}

impl UploadAttemptLog {
    /// Load the persisted list, oldest first. An unreadable list starts empty.
    pub fn load(store: Box<dyn LocalStateStore>) -> Self {
        let mut timestamps: Vec<DateTime<Utc>> = match store.get_number_list(UPLOAD_ATTEMPTS_KEY) {
            Ok(values) => values.into_iter().filter_map(from_seconds).collect(),
            Err(e) => {
                warn!(error = %e, "Could not read upload attempt history, starting empty");
                Vec::new()
            }
        };
        timestamps.sort_unstable();

        Self {
            store,
            timestamps: timestamps.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.front().copied()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.back().copied()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.timestamps.iter().copied().collect()
    }

    /// Prune entries outside the window, append `last_attempt` when it is
    /// newer than the tail, enforce the count cap, then persist.
    pub fn record(&mut self, last_attempt: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        let window_start = now - LOG_THROTTLE_WINDOW;
        self.timestamps.retain(|t| *t >= window_start);

        if let Some(attempt) = last_attempt {
            if self.timestamps.back().is_none_or(|tail| attempt > *tail) {
                self.timestamps.push_back(attempt);
            }
        }

        // One append per call; the loop only matters for oversized persisted lists
        while self.timestamps.len() > LOG_THROTTLE_COUNT {
            self.timestamps.pop_front();
        }

        self.persist();
    }

    fn persist(&mut self) {
        let values: Vec<f64> = self.timestamps.iter().map(|t| to_seconds(*t)).collect();
        if let Err(e) = self.store.set_number_list(UPLOAD_ATTEMPTS_KEY, &values) {
            error!(error = %e, "Failed to persist upload attempt history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::MemoryStateStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn store_with(times: &[DateTime<Utc>]) -> MemoryStateStore {
        MemoryStateStore::with_list(
            UPLOAD_ATTEMPTS_KEY,
            times.iter().map(|t| to_seconds(*t)).collect(),
        )
    }

    #[test]
    fn test_seconds_conversion_keeps_milliseconds() {
        let time = now() + Duration::milliseconds(1234);
        assert_eq!(from_seconds(to_seconds(time)), Some(time));
        assert_eq!(from_seconds(f64::NAN), None);
    }

    #[test]
    fn test_null_attempt_is_not_appended() {
        let store = MemoryStateStore::new();
        let mut log = UploadAttemptLog::load(Box::new(store.clone()));

        log.record(None, now());

        assert!(log.is_empty());
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_append_only_when_newer_than_tail() {
        let mut log = UploadAttemptLog::load(Box::new(MemoryStateStore::new()));
        let first = now() - Duration::minutes(10);

        log.record(Some(first), now());
        log.record(Some(first), now());
        log.record(Some(first - Duration::minutes(1)), now());
        assert_eq!(log.len(), 1);

        log.record(Some(now()), now());
        assert_eq!(log.timestamps(), vec![first, now()]);
    }

    #[test]
    fn test_prunes_entries_older_than_window() {
        let old = now() - Duration::hours(25);
        let recent = now() - Duration::hours(2);
        let store = store_with(&[old, recent]);
        let mut log = UploadAttemptLog::load(Box::new(store.clone()));
        assert_eq!(log.len(), 2);

        log.record(None, now());

        assert_eq!(log.timestamps(), vec![recent]);
        assert_eq!(
            store.get_number_list(UPLOAD_ATTEMPTS_KEY).unwrap(),
            vec![to_seconds(recent)]
        );
    }

    #[test]
    fn test_entry_exactly_at_window_edge_is_kept() {
        let edge = now() - LOG_THROTTLE_WINDOW;
        let mut log = UploadAttemptLog::load(Box::new(store_with(&[edge])));
        log.record(None, now());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_beyond_cap() {
        let times: Vec<DateTime<Utc>> = (0..LOG_THROTTLE_COUNT as i64)
            .map(|i| now() - Duration::minutes(200 - i))
            .collect();
        let mut log = UploadAttemptLog::load(Box::new(store_with(&times)));
        assert_eq!(log.len(), LOG_THROTTLE_COUNT);

        log.record(Some(now()), now());

        assert_eq!(log.len(), LOG_THROTTLE_COUNT);
        assert_eq!(log.oldest(), Some(times[1]));
        assert_eq!(log.newest(), Some(now()));
    }

    #[test]
    fn test_oversized_persisted_list_is_trimmed() {
        let times: Vec<DateTime<Utc>> = (0..150)
            .map(|i| now() - Duration::minutes(300 - i))
            .collect();
        let mut log = UploadAttemptLog::load(Box::new(store_with(&times)));

        log.record(None, now());

        assert_eq!(log.len(), LOG_THROTTLE_COUNT);
        assert_eq!(log.oldest(), Some(times[50]));
    }

    #[test]
    fn test_unordered_history_is_sorted_on_load() {
        let newest = now() - Duration::minutes(5);
        let oldest = now() - Duration::hours(3);
        let middle = now() - Duration::hours(1);
        let mut log = UploadAttemptLog::load(Box::new(store_with(&[newest, oldest, middle])));

        assert_eq!(log.oldest(), Some(oldest));
        assert_eq!(log.newest(), Some(newest));

        // An attempt older than the true tail is not appended
        log.record(Some(middle + Duration::minutes(1)), now());
        assert_eq!(log.timestamps(), vec![oldest, middle, newest]);
    }

    #[test]
    fn test_history_survives_reload() {
        let store = MemoryStateStore::new();
        {
            let mut log = UploadAttemptLog::load(Box::new(store.clone()));
            log.record(Some(now() - Duration::hours(1)), now());
            log.record(Some(now()), now());
        }

        let reloaded = UploadAttemptLog::load(Box::new(store));
        assert_eq!(reloaded.timestamps(), vec![now() - Duration::hours(1), now()]);
    }
}

//! Upload scheduling state machine.
//!
//! The machine owns the scheduler state and the attempt log. Each input
//! (timer fire, collected logs, upload outcome, ...) is a method that takes
//! the current wall time and returns the actions the driver must run. The
//! only I/O performed here is the synchronous attempt-log write.
//!
//! Cycle: timer fires -> (disabled: skip and reschedule) | collect logs ->
//! [compress] -> upload -> outcome -> reschedule.

use super::attempt_log::UploadAttemptLog;
use super::metrics::{SystemLogUploadResult, UploadMetrics};
use super::request::{build_plain_job, build_zipped_job};
use super::types::{
    SchedulerAction, SchedulerState, SchedulerStatus, UploadRequest, ERROR_RETRY_DELAY,
    LOG_THROTTLE_COUNT, LOG_THROTTLE_WINDOW, MAX_NUM_RETRIES,
};
use crate::config::SchedulerConfig;
use crate::events::SchedulerEvent;
use crate::loader::SystemLogs;
use crate::settings::TrustedValue;
use crate::state_store::LocalStateStore;
use crate::uploader::UploadErrorCode;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct ActiveCycle {
    id: String,
    zipped: bool,
}

#[derive(Debug)]
pub struct UploadScheduler {
    config: SchedulerConfig,
    state: SchedulerState,
    attempt_log: UploadAttemptLog,
    metrics: UploadMetrics,
    timer_generation: u64,
    active_cycle: Option<ActiveCycle>,
}

impl UploadScheduler {
    pub fn new(config: SchedulerConfig, store: Box<dyn LocalStateStore>) -> Self {
        Self {
            config,
            state: SchedulerState::default(),
            attempt_log: UploadAttemptLog::load(store),
            metrics: UploadMetrics::default(),
            timer_generation: 0,
            active_cycle: None,
        }
    }

    /// Apply the initial settings read and schedule the first cycle, which
    /// is due immediately unless the throttle window is full.
    pub fn start(&mut self, settings: TrustedValue, now: DateTime<Utc>) -> Vec<SchedulerAction> {
        self.on_settings_changed(settings);
        info!(
            upload_enabled = self.state.upload_enabled,
            frequency_ms = self.config.upload_frequency.num_milliseconds(),
            zipped = self.config.zip_system_logs,
            "System log upload scheduler started"
        );
        self.schedule_next(self.config.upload_frequency, now)
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn attempt_log(&self) -> &UploadAttemptLog {
        &self.attempt_log
    }

    pub fn metrics(&self) -> &UploadMetrics {
        &self.metrics
    }

    pub fn upload_frequency(&self) -> Duration {
        self.config.upload_frequency
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            upload_enabled: self.state.upload_enabled,
            log_upload_in_progress: self.state.log_upload_in_progress,
            retry_count: self.state.retry_count,
            last_upload_attempt: self.state.last_upload_attempt,
            upload_frequency_ms: self.config.upload_frequency.num_milliseconds(),
            recorded_attempts: self.attempt_log.timestamps(),
            metrics: self.metrics.clone(),
        }
    }

    /// Update the enabled flag from a settings read.
    ///
    /// Returns `false` when the value is not trusted yet; the caller waits for
    /// the next notification. Scheduling is never triggered from here.
    pub fn on_settings_changed(&mut self, value: TrustedValue) -> bool {
        match value {
            TrustedValue::Trusted(enabled) => {
                let enabled = enabled.unwrap_or(false);
                if enabled != self.state.upload_enabled {
                    info!(upload_enabled = enabled, "System log upload setting changed");
                }
                self.state.upload_enabled = enabled;
                true
            }
            TrustedValue::NotYetTrusted => {
                debug!("Device settings not trusted yet, waiting for notification");
                false
            }
        }
    }

    /// Timer callback. Fires belonging to a replaced timer are ignored.
    pub fn on_timer_fired(&mut self, generation: u64, now: DateTime<Utc>) -> Vec<SchedulerAction> {
        if generation != self.timer_generation {
            debug!(generation, current = self.timer_generation, "Ignoring stale timer");
            return Vec::new();
        }
        if self.state.log_upload_in_progress {
            return Vec::new();
        }

        if !self.state.upload_enabled {
            info!("System log upload disabled, skipping cycle");
            self.state.retry_count = 0;
            self.state.last_upload_attempt = Some(now);

            let mut actions = vec![SchedulerAction::Publish(SchedulerEvent::UploadSkipped)];
            actions.extend(self.schedule_next(self.config.upload_frequency, now));
            return actions;
        }

        let cycle_id = uuid::Uuid::new_v4().to_string();
        info!(cycle_id = %cycle_id, retry_count = self.state.retry_count, "Starting system log collection");

        self.state.log_upload_in_progress = true;
        self.active_cycle = Some(ActiveCycle {
            id: cycle_id.clone(),
            zipped: self.config.zip_system_logs,
        });

        vec![
            SchedulerAction::Publish(SchedulerEvent::CollectionStarted {
                cycle_id: cycle_id.clone(),
            }),
            SchedulerAction::CollectLogs { cycle_id },
        ]
    }

    /// Append the policy dump and either compress or upload directly.
    pub fn on_logs_collected(
        &mut self,
        cycle_id: &str,
        logs: SystemLogs,
        policy_dump: String,
    ) -> Vec<SchedulerAction> {
        let Some(cycle) = self.current_cycle(cycle_id) else {
            return Vec::new();
        };

        let mut request = UploadRequest::new(logs);
        request.append_policy_dump(policy_dump);

        if cycle.zipped {
            debug!(cycle_id, files = request.len(), "Compressing system logs");
            return vec![SchedulerAction::CompressLogs {
                cycle_id: cycle.id,
                request,
            }];
        }

        let job = build_plain_job(&self.config.upload_url, request);
        self.start_upload(cycle, job)
    }

    /// Upload the archive, or end the cycle when compression produced nothing.
    pub fn on_logs_compressed(
        &mut self,
        cycle_id: &str,
        archive: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Vec<SchedulerAction> {
        let Some(cycle) = self.current_cycle(cycle_id) else {
            return Vec::new();
        };

        if archive.is_empty() {
            error!(cycle_id, "Compressed system logs are empty, aborting upload");
            return self.abort_cycle(cycle, "empty archive", now);
        }

        let job = build_zipped_job(&self.config.upload_url, archive);
        self.start_upload(cycle, job)
    }

    /// End the running cycle without an upload, for example when a worker
    /// died before reporting. Does not count towards the retry budget.
    pub fn on_cycle_failed(
        &mut self,
        cycle_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<SchedulerAction> {
        let Some(cycle) = self.current_cycle(cycle_id) else {
            return Vec::new();
        };
        error!(cycle_id, reason, "System log upload cycle failed");
        self.abort_cycle(cycle, reason, now)
    }

    fn abort_cycle(
        &mut self,
        cycle: ActiveCycle,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<SchedulerAction> {
        self.end_cycle(now);
        self.metrics
            .record(SystemLogUploadResult::from_outcome(cycle.zipped, false));

        let mut actions = vec![SchedulerAction::Publish(SchedulerEvent::CycleAborted {
            cycle_id: cycle.id,
            reason: reason.to_string(),
        })];
        actions.extend(self.schedule_next(self.config.upload_frequency, now));
        actions
    }

    fn start_upload(&mut self, cycle: ActiveCycle, job: crate::uploader::UploadJob) -> Vec<SchedulerAction> {
        let segments: Vec<String> = job
            .segments()
            .iter()
            .map(|s| s.field_name.clone())
            .collect();

        info!(
            cycle_id = %cycle.id,
            url = %job.url(),
            segments = segments.len(),
            bytes = job.total_bytes(),
            "Uploading system logs"
        );

        vec![
            SchedulerAction::Publish(SchedulerEvent::UploadStarted {
                cycle_id: cycle.id.clone(),
                zipped: cycle.zipped,
                segments,
            }),
            SchedulerAction::StartUpload {
                cycle_id: cycle.id,
                job,
            },
        ]
    }

    /// Terminal outcome reported by the uploader.
    pub fn on_upload_outcome(
        &mut self,
        cycle_id: &str,
        result: Result<(), UploadErrorCode>,
        now: DateTime<Utc>,
    ) -> Vec<SchedulerAction> {
        let Some(cycle) = self.current_cycle(cycle_id) else {
            return Vec::new();
        };

        self.end_cycle(now);
        self.metrics.record(SystemLogUploadResult::from_outcome(
            cycle.zipped,
            result.is_ok(),
        ));

        let (event, delay) = match result {
            Ok(()) => {
                info!(cycle_id = %cycle.id, "System logs uploaded");
                self.state.retry_count = 0;
                (
                    SchedulerEvent::UploadSucceeded { cycle_id: cycle.id },
                    self.config.upload_frequency,
                )
            }
            Err(code) => {
                let will_retry = self.state.retry_count < MAX_NUM_RETRIES;
                if will_retry {
                    self.state.retry_count += 1;
                    warn!(
                        cycle_id = %cycle.id,
                        error = %code,
                        kind = ?code.kind(),
                        retry_count = self.state.retry_count,
                        "System log upload failed, retrying"
                    );
                } else {
                    self.state.retry_count = 0;
                    error!(
                        cycle_id = %cycle.id,
                        error = %code,
                        kind = ?code.kind(),
                        "System log upload failed, giving up until next regular upload"
                    );
                }

                let delay = if will_retry {
                    ERROR_RETRY_DELAY
                } else {
                    self.config.upload_frequency
                };
                (
                    SchedulerEvent::UploadFailed {
                        cycle_id: cycle.id,
                        error: code.to_string(),
                        will_retry,
                    },
                    delay,
                )
            }
        };

        let mut actions = vec![SchedulerAction::Publish(event)];
        actions.extend(self.schedule_next(delay, now));
        actions
    }

    /// Externally triggered "upload now".
    pub fn request_immediate_upload(&mut self, now: DateTime<Utc>) -> Vec<SchedulerAction> {
        info!("Immediate system log upload requested");
        self.schedule_next(Duration::zero(), now)
    }

    /// Record the last attempt, compute the next delay and re-arm the timer.
    ///
    /// No-op while a cycle is running; that cycle reschedules on completion.
    pub fn schedule_next(&mut self, requested: Duration, now: DateTime<Utc>) -> Vec<SchedulerAction> {
        if self.state.log_upload_in_progress {
            debug!("Upload in progress, not rescheduling");
            return Vec::new();
        }

        self.attempt_log
            .record(self.state.last_upload_attempt, now);

        let base = self
            .state
            .last_upload_attempt
            .unwrap_or(DateTime::UNIX_EPOCH);
        let due = base
            .checked_add_signed(requested)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut delay = (due - now).max(Duration::zero());

        // Never let more than LOG_THROTTLE_COUNT attempts land in one window
        if self.attempt_log.len() >= LOG_THROTTLE_COUNT && !requested.is_zero() {
            if let Some(oldest) = self.attempt_log.oldest() {
                let window_opens = (oldest + LOG_THROTTLE_WINDOW) - now;
                if window_opens > delay {
                    info!(
                        attempts = self.attempt_log.len(),
                        delay_secs = window_opens.num_seconds(),
                        "Upload throttled until the oldest attempt leaves the window"
                    );
                    delay = window_opens;
                }
            }
        }

        self.timer_generation += 1;
        debug!(
            generation = self.timer_generation,
            delay_secs = delay.num_seconds(),
            "Next system log upload scheduled"
        );

        vec![
            SchedulerAction::Publish(SchedulerEvent::NextUploadScheduled {
                delay_ms: delay.num_milliseconds(),
            }),
            SchedulerAction::ArmTimer {
                generation: self.timer_generation,
                delay,
            },
        ]
    }

    fn end_cycle(&mut self, now: DateTime<Utc>) {
        self.active_cycle = None;
        self.state.last_upload_attempt = Some(now);
        self.state.log_upload_in_progress = false;
    }

    fn current_cycle(&self, cycle_id: &str) -> Option<ActiveCycle> {
        match &self.active_cycle {
            Some(cycle) if cycle.id == cycle_id => Some(cycle.clone()),
            _ => {
                warn!(cycle_id, "Result for an unknown upload cycle ignored");
                None
            }
        }
    }
}

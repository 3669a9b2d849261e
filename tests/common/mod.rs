#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use system_log_uploader::config::SchedulerConfig;
use system_log_uploader::events::{EventBus, EventReceiver, SchedulerEvent};
use system_log_uploader::loader::{archive, LogFile, LogLoader, SystemLogs};
use system_log_uploader::scheduler::{Clock, SchedulerDeps};
use system_log_uploader::settings::InMemorySettings;
use system_log_uploader::state_store::MemoryStateStore;
use system_log_uploader::uploader::{UploadErrorCode, UploadJob, Uploader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

pub const UPLOAD_URL: &str = "https://dm.example.com/device/upload";

pub fn scheduler_config(zipped: bool) -> SchedulerConfig {
    SchedulerConfig {
        upload_url: UPLOAD_URL.to_string(),
        upload_frequency: chrono::Duration::hours(12),
        zip_system_logs: zipped,
    }
}

/// Wall clock that follows tokio's (possibly paused) time.
pub struct TokioClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base: Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
            start: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }
}

pub struct FakeLoader {
    logs: SystemLogs,
    archive: Mutex<Option<Vec<u8>>>,
    panics_remaining: AtomicUsize,
    pub collect_calls: AtomicUsize,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self {
            logs: vec![
                LogFile::new("/var/log/messages", b"kernel: booted\n".to_vec()),
                LogFile::new("/var/log/net.log", b"wifi: connected\n".to_vec()),
                LogFile::new("/var/log/ui/ui.LATEST", b"ui: ready\n".to_vec()),
            ],
            archive: Mutex::new(None),
            panics_remaining: AtomicUsize::new(0),
            collect_calls: AtomicUsize::new(0),
        }
    }

    /// Make the first `count` collections panic.
    pub fn panicking(self, count: usize) -> Self {
        self.panics_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Make every compression return `blob` instead of a real archive.
    pub fn with_archive(self, blob: Vec<u8>) -> Self {
        *self.archive.lock().unwrap() = Some(blob);
        self
    }

    pub fn collect_calls(&self) -> usize {
        self.collect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogLoader for FakeLoader {
    async fn collect_logs(&self) -> SystemLogs {
        self.collect_calls.fetch_add(1, Ordering::SeqCst);
        let should_panic = self
            .panics_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("log collection blew up");
        }
        self.logs.clone()
    }

    fn policy_snapshot(&self) -> String {
        r#"{"SystemLogUploadEnabled":true}"#.to_string()
    }

    async fn compress_bundle(&self, logs: SystemLogs) -> Vec<u8> {
        match self.archive.lock().unwrap().clone() {
            Some(blob) => blob,
            None => archive::compress_bundle(&logs),
        }
    }
}

/// Records every job; answers from a script, then succeeds.
pub struct FakeUploader {
    script: Mutex<VecDeque<Result<(), UploadErrorCode>>>,
    jobs: Mutex<Vec<(Instant, UploadJob)>>,
    latency: Duration,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(results: Vec<Result<(), UploadErrorCode>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            jobs: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn jobs(&self) -> Vec<(Instant, UploadJob)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn start(&self, job: UploadJob) -> Result<(), UploadErrorCode> {
        self.jobs.lock().unwrap().push((Instant::now(), job));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub struct Harness {
    pub loader: Arc<FakeLoader>,
    pub uploader: Arc<FakeUploader>,
    pub settings: InMemorySettings,
    pub store: MemoryStateStore,
    pub events: EventBus,
    pub started: Instant,
}

impl Harness {
    pub fn new(uploader: FakeUploader, settings: InMemorySettings) -> Self {
        Self::with_parts(FakeLoader::new(), uploader, settings, MemoryStateStore::new())
    }

    pub fn with_parts(
        loader: FakeLoader,
        uploader: FakeUploader,
        settings: InMemorySettings,
        store: MemoryStateStore,
    ) -> Self {
        Self {
            loader: Arc::new(loader),
            uploader: Arc::new(uploader),
            settings,
            store,
            events: EventBus::new(1024),
            started: Instant::now(),
        }
    }

    pub fn deps(&self) -> SchedulerDeps {
        SchedulerDeps {
            log_loader: self.loader.clone(),
            uploader: self.uploader.clone(),
            settings: Arc::new(self.settings.clone()),
            clock: Arc::new(TokioClock::new()),
            state_store: Box::new(self.store.clone()),
            events: self.events.clone(),
        }
    }

    /// Offsets of each upload from harness creation.
    pub fn upload_offsets(&self) -> Vec<Duration> {
        self.uploader
            .jobs()
            .iter()
            .map(|(at, _)| at.duration_since(self.started))
            .collect()
    }
}

/// Wait (in virtual time) for the first event matching `predicate`.
pub async fn wait_for_event<F>(rx: &mut EventReceiver, mut predicate: F) -> SchedulerEvent
where
    F: FnMut(&SchedulerEvent) -> bool,
{
    let search = async {
        loop {
            match rx.recv().await {
                Ok(sequenced) if predicate(&sequenced.event) => return sequenced.event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(7 * 24 * 3600), search)
        .await
        .expect("expected event was not published")
}

pub fn assert_near(actual: Duration, expected: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff < Duration::from_secs(1),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

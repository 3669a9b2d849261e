//! Tokio driver for [`UploadScheduler`].
//!
//! A single actor task owns the state machine. Timers, log collection,
//! compression and uploads run as child tasks that report back through the
//! actor's mailbox, so every state change happens on one task. Dropping the
//! handle (or calling [`SystemLogUploader::stop`]) cancels the pending timer
//! and aborts in-flight work; late results from aborted work never arrive.

use super::clock::Clock;
use super::machine::UploadScheduler;
use super::types::{SchedulerAction, SchedulerStatus};
use crate::config::SchedulerConfig;
use crate::error::{Result, UploaderError};
use crate::events::{EventBus, EventReceiver};
use crate::loader::{LogLoader, SystemLogs};
use crate::settings::SettingsSource;
use crate::shutdown::ShutdownCoordinator;
use crate::state_store::LocalStateStore;
use crate::uploader::{UploadErrorCode, Uploader};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Collaborators injected into the scheduler.
pub struct SchedulerDeps {
    pub log_loader: Arc<dyn LogLoader>,
    pub uploader: Arc<dyn Uploader>,
    pub settings: Arc<dyn SettingsSource>,
    pub clock: Arc<dyn Clock>,
    pub state_store: Box<dyn LocalStateStore>,
    pub events: EventBus,
}

enum Message {
    TimerFired {
        generation: u64,
    },
    LogsCollected {
        cycle_id: String,
        logs: SystemLogs,
        policy_dump: String,
    },
    LogsCompressed {
        cycle_id: String,
        archive: Vec<u8>,
    },
    CollectionFailed {
        cycle_id: String,
    },
    UploadFinished {
        cycle_id: String,
        result: std::result::Result<(), UploadErrorCode>,
    },
    UploadNow,
    Status(oneshot::Sender<SchedulerStatus>),
}

/// Handle to a running scheduler.
pub struct SystemLogUploader {
    tx: mpsc::UnboundedSender<Message>,
    events: EventBus,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SystemLogUploader {
    /// Read settings, schedule the first cycle and spawn the actor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        deps: SchedulerDeps,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        let SchedulerDeps {
            log_loader,
            uploader,
            settings,
            clock,
            state_store,
            events,
        } = deps;

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        // Subscribe before the first read so no change slips in between
        let settings_rx = settings.subscribe();

        let mut actor = Actor {
            machine: UploadScheduler::new(config, state_store),
            log_loader,
            uploader,
            settings,
            clock,
            events: events.clone(),
            tx: tx.clone(),
            timer: None,
            tasks: JoinSet::new(),
        };

        let now = actor.clock.now();
        let initial = actor.settings.upload_enabled();
        let actions = actor.machine.start(initial, now);
        actor.execute(actions);

        let handle = tokio::spawn(actor.run(rx, settings_rx, stop.clone(), shutdown));

        Self {
            tx,
            events,
            stop,
            handle: Some(handle),
        }
    }

    /// Upload as soon as possible, bypassing the throttle. Ignored while a
    /// cycle is running.
    pub fn request_immediate_upload(&self) {
        if self.tx.send(Message::UploadNow).is_err() {
            warn!("Immediate upload requested after scheduler stopped");
        }
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Message::Status(reply))
            .map_err(|_| UploaderError::Other("Scheduler is not running".to_string()))?;
        response
            .await
            .map_err(|_| UploaderError::Other("Scheduler stopped before replying".to_string()))
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the actor and wait for it to tear down.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }
}

impl Drop for SystemLogUploader {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Delivers a worker's result to the actor.
///
/// A worker dropped before sending (it panicked) delivers `fallback`
/// instead, so the running cycle still ends. Workers are otherwise only
/// dropped by teardown, after which nothing reads the mailbox.
struct WorkerReport {
    tx: mpsc::UnboundedSender<Message>,
    fallback: Option<Message>,
}

impl WorkerReport {
    fn new(tx: mpsc::UnboundedSender<Message>, fallback: Message) -> Self {
        Self {
            tx,
            fallback: Some(fallback),
        }
    }

    fn send(mut self, message: Message) {
        self.fallback = None;
        let _ = self.tx.send(message);
    }
}

impl Drop for WorkerReport {
    fn drop(&mut self) {
        if let Some(message) = self.fallback.take() {
            warn!("Scheduler worker ended without a result, failing the running cycle");
            let _ = self.tx.send(message);
        }
    }
}

struct Actor {
    machine: UploadScheduler,
    log_loader: Arc<dyn LogLoader>,
    uploader: Arc<dyn Uploader>,
    settings: Arc<dyn SettingsSource>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    tx: mpsc::UnboundedSender<Message>,
    timer: Option<CancellationToken>,
    tasks: JoinSet<()>,
}

impl Actor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Message>,
        mut settings_rx: broadcast::Receiver<()>,
        stop: CancellationToken,
        shutdown: ShutdownCoordinator,
    ) {
        let mut settings_open = true;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = shutdown.wait() => {
                    info!("Shutdown requested, stopping system log uploader");
                    break;
                }
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                changed = settings_rx.recv(), if settings_open => match changed {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let value = self.settings.upload_enabled();
                        self.machine.on_settings_changed(value);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Settings source closed, keeping last value");
                        settings_open = false;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Scheduler worker task panicked");
                        }
                    }
                }
            }
        }

        self.teardown();
    }

    fn handle(&mut self, message: Message) {
        let now = self.clock.now();
        let actions = match message {
            Message::TimerFired { generation } => self.machine.on_timer_fired(generation, now),
            Message::LogsCollected {
                cycle_id,
                logs,
                policy_dump,
            } => self.machine.on_logs_collected(&cycle_id, logs, policy_dump),
            Message::LogsCompressed { cycle_id, archive } => {
                self.machine.on_logs_compressed(&cycle_id, archive, now)
            }
            Message::CollectionFailed { cycle_id } => {
                self.machine
                    .on_cycle_failed(&cycle_id, "log collection failed", now)
            }
            Message::UploadFinished { cycle_id, result } => {
                self.machine.on_upload_outcome(&cycle_id, result, now)
            }
            Message::UploadNow => self.machine.request_immediate_upload(now),
            Message::Status(reply) => {
                let _ = reply.send(self.machine.status());
                Vec::new()
            }
        };
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<SchedulerAction>) {
        for action in actions {
            match action {
                SchedulerAction::ArmTimer { generation, delay } => {
                    self.arm_timer(generation, delay.to_std().unwrap_or_default());
                }
                SchedulerAction::CollectLogs { cycle_id } => {
                    let loader = Arc::clone(&self.log_loader);
                    let report = WorkerReport::new(
                        self.tx.clone(),
                        Message::CollectionFailed {
                            cycle_id: cycle_id.clone(),
                        },
                    );
                    self.tasks.spawn(async move {
                        let logs = loader.collect_logs().await;
                        let policy_dump = loader.policy_snapshot();
                        report.send(Message::LogsCollected {
                            cycle_id,
                            logs,
                            policy_dump,
                        });
                    });
                }
                SchedulerAction::CompressLogs { cycle_id, request } => {
                    let loader = Arc::clone(&self.log_loader);
                    let report = WorkerReport::new(
                        self.tx.clone(),
                        Message::LogsCompressed {
                            cycle_id: cycle_id.clone(),
                            archive: Vec::new(),
                        },
                    );
                    self.tasks.spawn(async move {
                        let archive = loader.compress_bundle(request.logs).await;
                        report.send(Message::LogsCompressed { cycle_id, archive });
                    });
                }
                SchedulerAction::StartUpload { cycle_id, job } => {
                    let uploader = Arc::clone(&self.uploader);
                    let report = WorkerReport::new(
                        self.tx.clone(),
                        Message::UploadFinished {
                            cycle_id: cycle_id.clone(),
                            result: Err(UploadErrorCode::Canceled),
                        },
                    );
                    self.tasks.spawn(async move {
                        let result = uploader.start(job).await;
                        report.send(Message::UploadFinished { cycle_id, result });
                    });
                }
                SchedulerAction::Publish(event) => {
                    self.events.publish(event);
                }
            }
        }
    }

    /// Replace any pending timer with a new one.
    fn arm_timer(&mut self, generation: u64, delay: std::time::Duration) {
        if let Some(previous) = self.timer.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Message::TimerFired { generation });
                }
            }
        });
        self.timer = Some(token);
    }

    fn teardown(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        if !self.tasks.is_empty() {
            debug!(tasks = self.tasks.len(), "Aborting in-flight scheduler work");
        }
        self.tasks.abort_all();
        info!("System log uploader stopped");
    }
}

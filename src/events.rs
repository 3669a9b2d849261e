//! Broadcast bus for scheduler lifecycle events.
//!
//! Subscribers (the daemon's status logger, integration tests) observe every
//! state transition the scheduler makes without touching its state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Sequence number for ordering events
pub type EventSequence = u64;

pub type EventReceiver = broadcast::Receiver<SequencedEvent>;
pub type EventSender = broadcast::Sender<SequencedEvent>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// Uploads are disabled; the due cycle was skipped.
    UploadSkipped,

    /// Log collection requested from the loader.
    CollectionStarted { cycle_id: String },

    /// Upload job handed to the uploader.
    UploadStarted {
        cycle_id: String,
        zipped: bool,
        segments: Vec<String>,
    },

    UploadSucceeded { cycle_id: String },

    UploadFailed {
        cycle_id: String,
        error: String,
        will_retry: bool,
    },

    /// Cycle ended without an upload (for example an empty archive).
    CycleAborted { cycle_id: String, reason: String },

    NextUploadScheduled { delay_ms: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub event: SchedulerEvent,
}

impl SchedulerEvent {
    pub fn event_type(&self) -> &str {
        match self {
            SchedulerEvent::UploadSkipped => "upload_skipped",
            SchedulerEvent::CollectionStarted { .. } => "collection_started",
            SchedulerEvent::UploadStarted { .. } => "upload_started",
            SchedulerEvent::UploadSucceeded { .. } => "upload_succeeded",
            SchedulerEvent::UploadFailed { .. } => "upload_failed",
            SchedulerEvent::CycleAborted { .. } => "cycle_aborted",
            SchedulerEvent::NextUploadScheduled { .. } => "next_upload_scheduled",
        }
    }
}

/// Event bus for distributing scheduler events
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: EventSender,
    sequence: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event (returns sequence number).
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: SchedulerEvent) -> EventSequence {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let _ = self.sender.send(SequencedEvent {
            sequence,
            timestamp: Utc::now(),
            event,
        });
        sequence
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

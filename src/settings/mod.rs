//! Device settings consumed by the scheduler.
//!
//! Only one setting participates: whether system log upload is enabled. A
//! source may not be able to vouch for its value yet ("not trusted"); readers
//! wait for the next change notification and read again.

mod file_watcher;

pub use file_watcher::FileSettingsSource;

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Result of a trusted read of the upload-enabled flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustedValue {
    /// The value can be relied on. `None` means the setting is unset.
    Trusted(Option<bool>),
    /// The source is not ready; a change notification follows once it is.
    NotYetTrusted,
}

pub trait SettingsSource: Send + Sync {
    /// Read the "system log upload enabled" flag.
    fn upload_enabled(&self) -> TrustedValue;

    /// Receive a notification whenever the flag changes or becomes trusted.
    fn subscribe(&self) -> broadcast::Receiver<()>;
}

#[derive(Debug)]
struct MemoryState {
    trusted: bool,
    upload_enabled: Option<bool>,
}

/// Settings held in memory, changed programmatically.
#[derive(Debug, Clone)]
pub struct InMemorySettings {
    state: Arc<Mutex<MemoryState>>,
    changed: broadcast::Sender<()>,
}

impl InMemorySettings {
    /// A trusted source with the given value.
    pub fn new(upload_enabled: Option<bool>) -> Self {
        let (changed, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                trusted: true,
                upload_enabled,
            })),
            changed,
        }
    }

    /// A source that reports "not yet trusted" until `set_trusted(true)`.
    pub fn untrusted(upload_enabled: Option<bool>) -> Self {
        let settings = Self::new(upload_enabled);
        if let Ok(mut state) = settings.state.lock() {
            state.trusted = false;
        }
        settings
    }

    pub fn set_upload_enabled(&self, enabled: Option<bool>) {
        if let Ok(mut state) = self.state.lock() {
            state.upload_enabled = enabled;
        }
        let _ = self.changed.send(());
    }

    pub fn set_trusted(&self, trusted: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.trusted = trusted;
        }
        let _ = self.changed.send(());
    }
}

impl SettingsSource for InMemorySettings {
    fn upload_enabled(&self) -> TrustedValue {
        match self.state.lock() {
            Ok(state) if state.trusted => TrustedValue::Trusted(state.upload_enabled),
            _ => TrustedValue::NotYetTrusted,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }
}

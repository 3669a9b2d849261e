use super::{SettingsSource, TrustedValue};
use crate::error::{ErrorContext, Result, UploaderError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct DeviceSettingsFile {
    #[serde(rename = "systemLogUploadEnabled")]
    system_log_upload_enabled: Option<bool>,
}

#[derive(Debug)]
struct Snapshot {
    value: TrustedValue,
    last_reload: Option<Instant>,
}

/// Device settings read from a JSON file and re-read whenever it changes.
///
/// The value stays "not yet trusted" while the file exists but cannot be
/// parsed (for example mid-write). A missing file is trusted and unset.
pub struct FileSettingsSource {
    path: PathBuf,
    snapshot: Arc<Mutex<Snapshot>>,
    changed: broadcast::Sender<()>,
    // Held for its lifetime; Mutex keeps the source Sync on every backend
    _watcher: Mutex<RecommendedWatcher>,
}

impl FileSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (changed, _) = broadcast::channel(16);
        let snapshot = Arc::new(Mutex::new(Snapshot {
            value: read_settings_file(&path),
            last_reload: None,
        }));

        let watch_dir = path
            .parent()
            .ok_or_else(|| UploaderError::Settings("Could not determine settings directory".into()))?
            .to_path_buf();
        std::fs::create_dir_all(&watch_dir)
            .context(&format!("Failed to create settings directory {}", watch_dir.display()))?;

        let handler_path = path.clone();
        let handler_snapshot = Arc::clone(&snapshot);
        let handler_changed = changed.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if is_settings_file_event(&event, &handler_path) {
                        reload(&handler_path, &handler_snapshot, &handler_changed);
                    }
                }
                Err(error) => {
                    warn!(error = %error, "Device settings watcher error");
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        // Watch the directory so creation of the file is observed too
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), "Watching device settings");

        Ok(Self {
            path,
            snapshot,
            changed,
            _watcher: Mutex::new(watcher),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file immediately and notify subscribers.
    pub fn reload_now(&self) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            snapshot.value = read_settings_file(&self.path);
            snapshot.last_reload = Some(Instant::now());
        }
        let _ = self.changed.send(());
    }
}

fn reload(path: &Path, snapshot: &Arc<Mutex<Snapshot>>, changed: &broadcast::Sender<()>) {
    let Ok(mut guard) = snapshot.lock() else {
        return;
    };

    // Debounce rapid file changes; the last write inside the window is still
    // picked up because each event re-reads the whole file.
    let now = Instant::now();
    let value = read_settings_file(path);
    let debounced = guard
        .last_reload
        .map(|last| now.duration_since(last) < DEBOUNCE_DURATION)
        .unwrap_or(false);
    let unchanged = guard.value == value;

    guard.value = value;
    guard.last_reload = Some(now);
    drop(guard);

    if debounced && unchanged {
        return;
    }

    debug!(?value, "Device settings reloaded");
    let _ = changed.send(());
}

fn read_settings_file(path: &Path) -> TrustedValue {
    if !path.exists() {
        return TrustedValue::Trusted(None);
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<DeviceSettingsFile>(&content) {
            Ok(settings) => TrustedValue::Trusted(settings.system_log_upload_enabled),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Device settings not parseable yet");
                TrustedValue::NotYetTrusted
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Device settings not readable yet");
            TrustedValue::NotYetTrusted
        }
    }
}

fn is_settings_file_event(event: &Event, settings_path: &Path) -> bool {
    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event
            .paths
            .iter()
            .any(|path| path == settings_path || path.file_name() == settings_path.file_name()),
        _ => false,
    }
}

impl SettingsSource for FileSettingsSource {
    fn upload_enabled(&self) -> TrustedValue {
        self.snapshot
            .lock()
            .map(|s| s.value)
            .unwrap_or(TrustedValue::NotYetTrusted)
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }
}

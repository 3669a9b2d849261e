use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use system_log_uploader::config::{self, UploaderConfig};
use system_log_uploader::events::EventBus;
use system_log_uploader::loader::FileLogLoader;
use system_log_uploader::logging;
use system_log_uploader::scheduler::{SchedulerDeps, SystemClock, SystemLogUploader};
use system_log_uploader::settings::FileSettingsSource;
use system_log_uploader::shutdown::ShutdownCoordinator;
use system_log_uploader::state_store::JsonFileStateStore;
use system_log_uploader::uploader::HttpUploader;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::ensure_logs_dir().context("Failed to create logs directory")?;
    let logs_dir = config::get_logs_dir()?;
    if let Err(e) = logging::init_logging(&logs_dir) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let uploader_config = config::load_config().context("Failed to load configuration")?;
    let shutdown = ShutdownCoordinator::new();
    let scheduler = start_scheduler(&uploader_config, shutdown.clone())?;

    let mut events = scheduler.subscribe();
    tokio::spawn(async move {
        while let Ok(sequenced) = events.recv().await {
            debug!(
                sequence = sequenced.sequence,
                event = sequenced.event.event_type(),
                payload = %serde_json::to_string(&sequenced.event).unwrap_or_default(),
                "Scheduler event"
            );
        }
    });

    wait_for_signals(&scheduler, &shutdown).await;

    scheduler.stop().await;
    info!("System log uploader exited");
    Ok(())
}

fn start_scheduler(
    uploader_config: &UploaderConfig,
    shutdown: ShutdownCoordinator,
) -> anyhow::Result<SystemLogUploader> {
    let scheduler_config = uploader_config
        .scheduler_config()
        .context("Invalid scheduler configuration")?;

    let log_loader = FileLogLoader::new(
        uploader_config.expanded_log_files(),
        uploader_config.expanded_policy_dump_path(),
    );
    let uploader = HttpUploader::new(
        uploader_config.auth_token.clone(),
        Duration::from_secs(uploader_config.request_timeout_secs),
    )?;
    let settings = FileSettingsSource::new(config::get_device_settings_path()?)
        .context("Failed to watch device settings")?;
    let state_store = JsonFileStateStore::open(config::get_local_state_path()?)
        .context("Failed to open local state")?;

    info!(
        upload_url = %scheduler_config.upload_url,
        frequency_ms = scheduler_config.upload_frequency.num_milliseconds(),
        zipped = scheduler_config.zip_system_logs,
        "Starting system log uploader"
    );

    let deps = SchedulerDeps {
        log_loader: Arc::new(log_loader),
        uploader: Arc::new(uploader),
        settings: Arc::new(settings),
        clock: Arc::new(SystemClock),
        state_store: Box::new(state_store),
        events: EventBus::default(),
    };

    Ok(SystemLogUploader::start(scheduler_config, deps, shutdown))
}

#[cfg(unix)]
async fn wait_for_signals(scheduler: &SystemLogUploader, shutdown: &ShutdownCoordinator) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut upload_now = match signal(SignalKind::user_defined1()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!(error = %e, "Failed to install SIGUSR1 handler");
            None
        }
    };

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            Some(()) = async {
                match upload_now.as_mut() {
                    Some(stream) => stream.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!("SIGUSR1 received, requesting immediate upload");
                scheduler.request_immediate_upload();
            }
            _ = shutdown.wait() => return,
        }
    }

    shutdown.shutdown();
}

#[cfg(not(unix))]
async fn wait_for_signals(_scheduler: &SystemLogUploader, shutdown: &ShutdownCoordinator) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
        }
        _ = shutdown.wait() => return,
    }
    shutdown.shutdown();
}

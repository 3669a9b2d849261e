use crate::error::{ErrorContext, Result, UploaderError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the upload frequency, in milliseconds.
pub const UPLOAD_FREQUENCY_ENV: &str = "SYSTEM_LOG_UPLOAD_FREQUENCY_MS";

/// Default time between two regular upload cycles (12 hours).
pub const DEFAULT_UPLOAD_FREQUENCY_MS: u64 = 12 * 60 * 60 * 1000;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Log files collected when the configuration does not list any.
pub const DEFAULT_LOG_FILES: &[&str] = &[
    "/var/log/bios_info.txt",
    "/var/log/chrome/chrome",
    "/var/log/eventlog.txt",
    "/var/log/platform_info.txt",
    "/var/log/messages",
    "/var/log/messages.1",
    "/var/log/net.log",
    "/var/log/net.log.1",
    "/var/log/ui/ui.LATEST",
    "/var/log/update_engine.log",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderConfig {
    #[serde(rename = "deviceManagementUrl")]
    pub device_management_url: Option<String>,
    #[serde(rename = "authToken")]
    pub auth_token: Option<String>,
    #[serde(rename = "uploadFrequencyMs")]
    pub upload_frequency_ms: Option<u64>,
    #[serde(rename = "zipSystemLogs", default)]
    pub zip_system_logs: bool,
    #[serde(rename = "logFiles", default = "default_log_files")]
    pub log_files: Vec<String>,
    #[serde(rename = "policyDumpPath")]
    pub policy_dump_path: Option<String>,
    #[serde(rename = "requestTimeoutSecs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_log_files() -> Vec<String> {
    DEFAULT_LOG_FILES.iter().map(|s| s.to_string()).collect()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            device_management_url: None,
            auth_token: None,
            upload_frequency_ms: None,
            zip_system_logs: false,
            log_files: default_log_files(),
            policy_dump_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Settings the scheduler reads once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub upload_url: String,
    pub upload_frequency: chrono::Duration,
    pub zip_system_logs: bool,
}

impl UploaderConfig {
    /// Derive the scheduler settings, applying the frequency override from the environment.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let env_override = std::env::var(UPLOAD_FREQUENCY_ENV).ok();
        self.scheduler_config_with_override(env_override.as_deref())
    }

    fn scheduler_config_with_override(&self, env_override: Option<&str>) -> Result<SchedulerConfig> {
        let base_url = self
            .device_management_url
            .as_deref()
            .ok_or_else(|| UploaderError::Config("No device management URL configured".into()))?;

        url::Url::parse(base_url).map_err(|e| {
            UploaderError::Config(format!("Invalid device management URL '{}': {}", base_url, e))
        })?;

        let frequency_ms = match env_override {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                UploaderError::Config(format!(
                    "{} must be an integer number of milliseconds: {}",
                    UPLOAD_FREQUENCY_ENV, e
                ))
            })?,
            None => self
                .upload_frequency_ms
                .unwrap_or(DEFAULT_UPLOAD_FREQUENCY_MS),
        };

        let frequency_ms = i64::try_from(frequency_ms)
            .map_err(|_| UploaderError::Config(format!("Upload frequency too large: {}", frequency_ms)))?;

        Ok(SchedulerConfig {
            upload_url: upload_url(base_url),
            upload_frequency: chrono::Duration::milliseconds(frequency_ms),
            zip_system_logs: self.zip_system_logs,
        })
    }

    /// Configured log files with `~` expanded.
    pub fn expanded_log_files(&self) -> Vec<PathBuf> {
        self.log_files
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).to_string()))
            .collect()
    }

    pub fn expanded_policy_dump_path(&self) -> Option<PathBuf> {
        self.policy_dump_path
            .as_ref()
            .map(|path| PathBuf::from(shellexpand::tilde(path).to_string()))
    }
}

/// Upload endpoint for a device management base URL.
pub fn upload_url(device_management_url: &str) -> String {
    format!("{}/upload", device_management_url.trim_end_matches('/'))
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(home_dir) = dirs::home_dir() {
        Ok(home_dir.join(".system-log-uploader"))
    } else {
        Err(UploaderError::Config("Could not find home directory".into()))
    }
}

pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn get_local_state_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("local_state.json"))
}

pub fn get_device_settings_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("device_settings.json"))
}

pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("logs"))
}

/// Create `dir` (and parents) with owner-only permissions on Unix.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn ensure_config_dir() -> Result<()> {
    ensure_private_dir(&get_config_dir()?)
}

pub fn ensure_logs_dir() -> Result<()> {
    ensure_private_dir(&get_logs_dir()?)
}

pub fn load_config() -> Result<UploaderConfig> {
    ensure_config_dir()?;
    load_config_from(&get_config_file_path()?)
}

pub fn load_config_from(config_file: &Path) -> Result<UploaderConfig> {
    if config_file.exists() {
        let content = fs::read_to_string(config_file)
            .context(&format!("Failed to read {}", config_file.display()))?;
        let config: UploaderConfig = serde_json::from_str(&content)
            .map_err(|e| UploaderError::Config(format!("{}: {}", config_file.display(), e)))?;
        Ok(config)
    } else {
        Ok(UploaderConfig::default())
    }
}

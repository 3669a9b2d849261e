//! Periodic system log uploader.
//!
//! Collects device log files on a timer and uploads them as a multipart
//! request to the device management server, retrying once after a failure
//! and never uploading more than 100 times in 24 hours.

pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod logging;
pub mod scheduler;
pub mod settings;
pub mod shutdown;
pub mod state_store;
pub mod uploader;

pub use error::{Result, UploaderError};
pub use scheduler::{SchedulerDeps, SystemLogUploader, UploadScheduler};

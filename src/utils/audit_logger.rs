use crate::config::Config;
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::error;

const MAX_LOGGED_TEXT: usize = 1024;

/// Append-only record of every event and user action the tracker handled.
pub struct EventAuditLogger {
    log_file_path: PathBuf,
    max_size_bytes: u64,
}

impl EventAuditLogger {
    /// `None` when `EVENT_LOG_FILE` is not configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let path = config.event_log_file.clone()?;
        Some(Self::new(path, config.event_log_max_size_bytes))
    }

    pub fn new(log_file_path: PathBuf, max_size_bytes: u64) -> Self {
        // Ensure log directory exists
        if let Some(parent_dir) = log_file_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                if let Err(e) = std::fs::create_dir_all(parent_dir) {
                    error!(path = %parent_dir.display(), error = %e, "Failed to create event log directory");
                }
            }
        }
        Self {
            log_file_path,
            max_size_bytes,
        }
    }

    async fn rotate_log_if_needed(&self) -> Result<()> {
        if !self.log_file_path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(&self.log_file_path).await?;
        if metadata.len() >= self.max_size_bytes {
            let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S%.3f").to_string();
            let file_stem = self
                .log_file_path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy();
            let extension = self
                .log_file_path
                .extension()
                .unwrap_or_default()
                .to_string_lossy();

            let backup_file_name = format!("{}_{}.{}", file_stem, timestamp, extension);
            let backup_path = self.log_file_path.with_file_name(backup_file_name);

            fs::rename(&self.log_file_path, backup_path).await?;
        }
        Ok(())
    }

    pub async fn log_event(&self, kind: &str, payload: &Value) {
        if let Err(e) = self.try_log_event(kind, payload).await {
            error!(kind = %kind, error = %e, "Failed to write event log");
        }
    }

    async fn try_log_event(&self, kind: &str, payload: &Value) -> Result<()> {
        self.rotate_log_if_needed().await?;

        let timestamp = Utc::now().to_rfc3339();

        // Command output can be arbitrarily large; keep the log readable.
        let mut sanitized = payload.clone();
        if let Some(obj) = sanitized.as_object_mut() {
            for key in ["output", "input"] {
                if let Some(val) = obj.get_mut(key) {
                    if val.as_str().map(|s| s.len() > MAX_LOGGED_TEXT).unwrap_or(false) {
                        *val = Value::String(format!("<{} truncated for log>", key));
                    }
                }
            }
        }

        let payload_string = serde_json::to_string(&sanitized)?;
        let log_entry = format!("{} | {:<16} | {}\n", timestamp, kind, payload_string);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .await?;

        file.write_all(log_entry.as_bytes()).await?;
        // tokio finishes writes on a blocking thread; wait for it before the next append.
        file.flush().await?;
        Ok(())
    }
}

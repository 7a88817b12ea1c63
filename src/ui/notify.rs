use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Success => "success",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub level: NotificationLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Transient toasts. Nothing here blocks; every entry dismisses itself after the TTL.
#[derive(Debug)]
pub struct NotificationCenter {
    ttl: chrono::Duration,
    entries: Vec<Notification>,
}

impl NotificationCenter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(5)),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, level: NotificationLevel, message: impl Into<String>) -> &Notification {
        self.push_at(level, message, Utc::now())
    }

    pub fn push_at(&mut self, level: NotificationLevel, message: impl Into<String>, now: DateTime<Utc>) -> &Notification {
        let message = message.into();
        match level {
            NotificationLevel::Error => error!(notification = %message, "User notified"),
            NotificationLevel::Warning => warn!(notification = %message, "User notified"),
            _ => info!(notification = %message, level = %level, "User notified"),
        }
        self.entries.push(Notification {
            id: Uuid::new_v4(),
            level,
            message,
            created_at: now,
            expires_at: now + self.ttl,
        });
        let last = self.entries.len() - 1;
        &self.entries[last]
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(NotificationLevel::Info, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(NotificationLevel::Success, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(NotificationLevel::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(NotificationLevel::Error, message);
    }

    /// Drops expired entries and returns what is still on screen.
    pub fn active(&mut self, now: DateTime<Utc>) -> &[Notification] {
        self.entries.retain(|n| !n.is_expired(now));
        &self.entries
    }

    /// Everything pushed and not yet pruned, expired or not.
    pub fn all(&self) -> &[Notification] {
        &self.entries
    }
}

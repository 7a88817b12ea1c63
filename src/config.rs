use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: Url,
    pub events_url: Url,
    pub transport_mode: TransportMode,
    pub reconcile_interval: Duration,
    pub request_timeout: Duration,
    pub notification_ttl: Duration,
    pub reconnect_max_backoff: Duration,
    pub log_level: String,
    pub event_log_file: Option<PathBuf>,
    pub event_log_max_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportMode {
    /// Live push events over the socket plus periodic reconciliation.
    Socket,
    /// Periodic reconciliation only.
    Poll,
}

impl FromStr for TransportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "socket" | "ws" | "websocket" => Ok(TransportMode::Socket),
            "poll" | "polling" => Ok(TransportMode::Poll),
            _ => Err(anyhow::anyhow!("Invalid event transport: {}", s)),
        }
    }
}

fn expand_tilde(path_str: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path_str).into_owned())
}

/// Socket.IO endpoint of the backend, reached over the websocket transport directly.
pub fn derive_events_url(backend_url: &Url) -> Result<Url> {
    let mut events_url = backend_url.clone();
    let scheme = match backend_url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    events_url
        .set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("Cannot derive websocket URL from {}", backend_url))?;
    events_url.set_path("/socket.io/");
    events_url.set_query(Some("EIO=4&transport=websocket"));
    Ok(events_url)
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    let secs = lookup(key)
        .unwrap_or_else(|| default.to_string())
        .parse::<u64>()
        .context(format!("Invalid {}", key))?;
    if secs == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Builds the configuration from any key lookup, `std::env` in production.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend_url_str = lookup("BACKEND_URL").unwrap_or_else(|| "http://127.0.0.1:5000".to_string());
        let backend_url = Url::parse(&backend_url_str)
            .context(format!("Invalid BACKEND_URL: {}", backend_url_str))?;
        if !matches!(backend_url.scheme(), "http" | "https") {
            anyhow::bail!("BACKEND_URL must be http or https: {}", backend_url);
        }

        let events_url = match lookup("EVENTS_URL") {
            Some(raw) => Url::parse(&raw).context(format!("Invalid EVENTS_URL: {}", raw))?,
            None => derive_events_url(&backend_url)?,
        };

        let transport_mode_str = lookup("EVENT_TRANSPORT").unwrap_or_else(|| "socket".to_string());
        let transport_mode = TransportMode::from_str(&transport_mode_str)?;

        let reconcile_interval = parse_secs(&lookup, "RECONCILE_INTERVAL_SECS", 5)?;
        let request_timeout = parse_secs(&lookup, "REQUEST_TIMEOUT_SECS", 30)?;
        let notification_ttl = parse_secs(&lookup, "NOTIFICATION_TTL_SECS", 5)?;
        let reconnect_max_backoff = parse_secs(&lookup, "RECONNECT_MAX_BACKOFF_SECS", 30)?;

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let event_log_file = lookup("EVENT_LOG_FILE")
            .map(|raw| expand_tilde(&raw));
        let event_log_max_size_bytes = lookup("EVENT_LOG_MAX_SIZE_MB")
            .unwrap_or_else(|| "10".to_string()) // Default 10 MB
            .parse::<u64>()
            .map(|mb| mb * 1024 * 1024) // Convert MB to Bytes
            .unwrap_or(10 * 1024 * 1024);

        Ok(Config {
            backend_url,
            events_url,
            transport_mode,
            reconcile_interval,
            request_timeout,
            notification_ttl,
            reconnect_max_backoff,
            log_level,
            event_log_file,
            event_log_max_size_bytes,
        })
    }

    /// Replaces the backend URL and re-derives the events URL from it.
    pub fn with_backend_url(mut self, backend_url: Url) -> Result<Self> {
        self.events_url = derive_events_url(&backend_url)?;
        self.backend_url = backend_url;
        Ok(self)
    }
}

use crate::periods::OverlapPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
    pub save_debounce: Duration,
    /// Wait before retrying a failed background save.
    pub save_retry: Duration,
    pub sync_enabled: bool,
    /// Directory of the sync copy; the data directory unless overridden.
    pub sync_dir: PathBuf,
    pub context: String,
    pub overlap_policy: OverlapPolicy,
    pub resident_cleanup_interval: Duration,
    /// `None` disables polling the sync copy.
    pub sync_poll_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("APP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let sync_dir = lookup("APP_SYNC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.clone());

        let overlap_policy = match lookup("APP_PERIOD_OVERLAP") {
            Some(value) => value.parse().unwrap_or_else(|err| {
                warn!("{err}, falling back to warn");
                OverlapPolicy::Warn
            }),
            None => OverlapPolicy::Warn,
        };

        let sync_poll_secs = parsed(&lookup, "APP_SYNC_POLL_SECS", 5u64);

        Self {
            data_dir,
            port: parsed(&lookup, "PORT", 8080),
            save_debounce: Duration::from_millis(parsed(&lookup, "APP_SAVE_DEBOUNCE_MS", 300)),
            save_retry: Duration::from_millis(parsed(&lookup, "APP_SAVE_RETRY_MS", 5000u64).max(1)),
            sync_enabled: lookup("APP_SYNC_ENABLED")
                .map(|value| !matches!(value.trim().to_lowercase().as_str(), "0" | "false" | "off" | "no"))
                .unwrap_or(true),
            sync_dir,
            context: lookup("APP_CONTEXT").unwrap_or_else(|| "server".to_string()),
            overlap_policy,
            resident_cleanup_interval: Duration::from_secs(
                parsed(&lookup, "APP_RESIDENT_CLEANUP_SECS", 3600u64).max(1),
            ),
            sync_poll_interval: (sync_poll_secs > 0).then(|| Duration::from_secs(sync_poll_secs)),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

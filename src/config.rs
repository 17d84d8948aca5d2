use std::path::PathBuf;
use std::time::Duration;

/// Startup settings, read from `LOCKWARDEN_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub interval: Duration,
    pub data_dir: PathBuf,
    pub fixture: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            data_dir: PathBuf::from("./data"),
            fixture: None,
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            interval: lookup("LOCKWARDEN_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            data_dir: lookup("LOCKWARDEN_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            fixture: lookup("LOCKWARDEN_FIXTURE").filter(|v| !v.is_empty()).map(PathBuf::from),
            metrics_port: lookup("LOCKWARDEN_METRICS_PORT").and_then(|v| v.parse().ok()),
            compact_threshold: lookup("LOCKWARDEN_COMPACT_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("lockwarden.journal")
    }
}

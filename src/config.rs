//! Process configuration, assembled entirely from environment variables.

use std::path::PathBuf;

const DEFAULT_SLA_THRESHOLD_MS: f64 = 100.0;
const DEFAULT_RING_BUFFER_SIZE: usize = 1000;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
const DEFAULT_GRACE_PERIOD_MS: u64 = 5000;
const DEFAULT_BIND_PORT: u16 = 7700;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory the filesystem watcher observes, recursively.
    pub watch_root: PathBuf,
    /// Latency threshold, in milliseconds, above which a sample counts as
    /// an SLA violation.
    pub sla_threshold_ms: f64,
    /// Capacity of each performance-monitor ring buffer.
    pub ring_buffer_size: usize,
    /// Maximum number of write attempts before a persistence error is fatal.
    pub retry_max_attempts: u32,
    /// Base delay for the writer's exponential backoff.
    pub retry_base_delay_ms: u64,
    /// How long the orchestrator waits for in-flight work to settle during
    /// shutdown before giving up.
    pub grace_period_ms: u64,
    /// SQLite database path the persistence writer opens.
    pub database_path: PathBuf,
    /// Port the WebSocket server binds to.
    pub bind_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            watch_root: std::env::var("SCRIPTWATCH_WATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_watch_root()),
            sla_threshold_ms: parse_env("SCRIPTWATCH_SLA_THRESHOLD_MS", DEFAULT_SLA_THRESHOLD_MS),
            ring_buffer_size: parse_env("SCRIPTWATCH_RING_BUFFER_SIZE", DEFAULT_RING_BUFFER_SIZE),
            retry_max_attempts: parse_env(
                "SCRIPTWATCH_RETRY_MAX_ATTEMPTS",
                DEFAULT_RETRY_MAX_ATTEMPTS,
            ),
            retry_base_delay_ms: parse_env(
                "SCRIPTWATCH_RETRY_BASE_DELAY_MS",
                DEFAULT_RETRY_BASE_DELAY_MS,
            ),
            grace_period_ms: parse_env("SCRIPTWATCH_GRACE_PERIOD_MS", DEFAULT_GRACE_PERIOD_MS),
            database_path: std::env::var("SCRIPTWATCH_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_database_path()),
            bind_port: parse_env("SCRIPTWATCH_BIND_PORT", DEFAULT_BIND_PORT),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn default_watch_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scriptwatch")
        .join("transcripts.sqlite3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_absent() {
        std::env::remove_var("SCRIPTWATCH_SLA_THRESHOLD_MS");
        let cfg = Config::from_env();
        assert_eq!(cfg.sla_threshold_ms, DEFAULT_SLA_THRESHOLD_MS);
        assert_eq!(cfg.ring_buffer_size, DEFAULT_RING_BUFFER_SIZE);
        assert_eq!(cfg.retry_max_attempts, DEFAULT_RETRY_MAX_ATTEMPTS);
    }

    #[test]
    fn env_overrides_defaults() {
        std::env::set_var("SCRIPTWATCH_SLA_THRESHOLD_MS", "250.5");
        let cfg = Config::from_env();
        assert_eq!(cfg.sla_threshold_ms, 250.5);
        std::env::remove_var("SCRIPTWATCH_SLA_THRESHOLD_MS");
    }
}

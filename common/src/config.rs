use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio;
use toml;
use tracing::{Level, debug, instrument};

fn default_scan_threads() -> usize {
    4
}

fn default_scan_queue_depth() -> usize {
    4096
}

fn default_scan_retry_budget() -> u32 {
    5
}

fn default_hash_min_size() -> u64 {
    1024 * 1024
}

fn default_hash_max_size() -> u64 {
    100 * 1024 * 1024
}

fn default_watch_threads() -> usize {
    4
}

fn default_watch_debounce_ms() -> u64 {
    2_000
}

fn default_watch_queue_depth() -> usize {
    10_000
}

fn default_move_window_ms() -> u64 {
    10_000
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

fn default_cache_ttl_ms() -> u64 {
    30_000
}

fn default_cache_stale_window_ms() -> u64 {
    600_000
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_analysis_threshold() -> f64 {
    0.1
}

fn default_promote_threshold() -> f64 {
    0.6
}

fn default_provider_timeout_ms() -> u64 {
    5_000
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CSConfig {
    // user, password, host, port, and database
    pub mariadb_url: String,

    // maximum number of tokio tasks used per scan run, which should be less
    // than the number of OS threads since hashing is compute-bound
    #[serde(default = "default_scan_threads")]
    pub scan_threads: usize,

    // bound on the BFS directory queue
    #[serde(default = "default_scan_queue_depth")]
    pub scan_queue_depth: usize,

    // how many circuit-open backoff rounds a scan survives before failing
    #[serde(default = "default_scan_retry_budget")]
    pub scan_retry_budget: u32,

    // quick-hash window: files outside [min, max) are not hashed unless
    // hash_large_files is set
    #[serde(default = "default_hash_min_size")]
    pub hash_min_size: u64,

    #[serde(default = "default_hash_max_size")]
    pub hash_max_size: u64,

    #[serde(default)]
    pub hash_large_files: bool,

    // watcher worker pool and event plumbing
    #[serde(default = "default_watch_threads")]
    pub watch_threads: usize,

    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    #[serde(default = "default_watch_queue_depth")]
    pub watch_queue_depth: usize,

    // how long a delete waits for its matching create before it becomes real
    #[serde(default = "default_move_window_ms")]
    pub move_window_ms: u64,

    // smb resilience tuning
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,

    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    #[serde(default = "default_cache_stale_window_ms")]
    pub cache_stale_window_ms: u64,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    // detection engine acceptance thresholds
    #[serde(default = "default_analysis_threshold")]
    pub detect_analysis_threshold: f64,

    #[serde(default = "default_promote_threshold")]
    pub detect_promote_threshold: f64,

    // metadata provider credentials; a missing key disables that provider
    pub tmdb_api_key: Option<String>,
    pub omdb_api_key: Option<String>,

    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
}

// in order to extract the config table from a larger document, we need to
// specify it as a subtable of the root node, i.e. a substruct
#[derive(Debug, Serialize, Deserialize)]
struct TomlConfigFile {
    config: CSConfig,
}

#[instrument(level=Level::DEBUG)]
pub async fn read_config(filename: PathBuf) -> Arc<CSConfig> {
    debug!("reading config file");

    let doc = tokio::fs::read_to_string(filename)
        .await
        .expect("failed to read config file");

    let data: TomlConfigFile = toml::from_str(&doc).expect("failed to parse config file");

    debug!("successfully parsed config file");
    Arc::new(data.config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let doc = r#"
            [config]
            mariadb_url = "mysql://catalogizer:pw@localhost:3306/catalogizer"
        "#;

        let data: TomlConfigFile = toml::from_str(doc).expect("minimal config should parse");

        assert_eq!(data.config.scan_threads, 4);
        assert_eq!(data.config.hash_min_size, 1024 * 1024);
        assert_eq!(data.config.watch_debounce_ms, 2_000);
        assert_eq!(data.config.move_window_ms, 10_000);
        assert!(data.config.tmdb_api_key.is_none());
    }

    #[test]
    fn parse_overrides() {
        let doc = r#"
            [config]
            mariadb_url = "mysql://localhost/catalogizer"
            scan_threads = 8
            hash_large_files = true
            breaker_cooldown_ms = 5000
        "#;

        let data: TomlConfigFile = toml::from_str(doc).expect("config should parse");

        assert_eq!(data.config.scan_threads, 8);
        assert!(data.config.hash_large_files);
        assert_eq!(data.config.breaker_cooldown_ms, 5000);
    }
}

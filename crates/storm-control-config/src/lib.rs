//! Configuration loading: YAML file with defaults, overridden by
//! environment variables.

use serde::Deserialize;
use std::path::Path;
use storm_control_core::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct StormControlConfig {
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Seconds an unblock task waits after spawning before its first
    /// evaluation (D).
    #[serde(default)]
    pub block_delay: u64,
    /// Whether to spawn block loops at all.
    #[serde(default)]
    pub block_enabled: bool,
    /// Packets/sec delta above which a class transitions to Blocked (T).
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u64,
    /// Static whitelist of interface names. Overrides `device_regex`
    /// when non-empty.
    #[serde(default)]
    pub device_list: Vec<String>,
    /// Regex used to match interface names when `device_list` is empty.
    #[serde(default = "default_device_regex")]
    pub device_regex: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            block_delay: 0,
            block_enabled: false,
            block_threshold: default_block_threshold(),
            device_list: Vec::new(),
            device_regex: default_device_regex(),
        }
    }
}

fn default_block_threshold() -> u64 {
    10
}

fn default_device_regex() -> String {
    r"^tap.{8}-.{2}$".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file: String::new() }
    }
}

fn default_log_level() -> String {
    "debug".to_string()
}

/// Load configuration: from `file` if given, or from defaults plus
/// environment variable overrides otherwise. A supplied file is used
/// as-is, with no environment overlay — matching the original's
/// `ReadConfig`, which only calls `ReadEnv` on the no-file path.
pub fn read_config(file: Option<&Path>) -> Result<StormControlConfig> {
    match file {
        Some(path) => load_from_file(path),
        None => {
            let mut config = load_from_bytes(b"")?;
            apply_env_overrides(&mut config);
            Ok(config)
        }
    }
}

fn load_from_file(path: &Path) -> Result<StormControlConfig> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Config(format!("unable to read config {}: {e}", path.display())))?;
    load_from_bytes(&bytes)
}

fn load_from_bytes(data: &[u8]) -> Result<StormControlConfig> {
    // An empty document still needs to deserialize through the `Default`
    // impls above, the way the original supplies a bare `watcher:` stanza
    // to its YAML unmarshaller so its `defaults` package still runs.
    let data: &[u8] = if data.is_empty() { b"watcher:\n" } else { data };
    serde_yaml::from_slice(data)
        .map_err(|e| Error::Config(format!("unable to parse config: {e}")))
}

fn apply_env_overrides(config: &mut StormControlConfig) {
    if let Ok(v) = std::env::var("BLOCK_DELAY") {
        if let Ok(v) = v.parse() {
            config.watcher.block_delay = v;
        }
    }
    if let Ok(v) = std::env::var("BLOCK_ENABLED") {
        if let Ok(v) = v.parse() {
            config.watcher.block_enabled = v;
        }
    }
    if let Ok(v) = std::env::var("BLOCK_THRESHOLD") {
        if let Ok(v) = v.parse() {
            config.watcher.block_threshold = v;
        }
    }
    if let Ok(v) = std::env::var("STATIC_DEV_LIST") {
        config.watcher.device_list =
            v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
    }
    if let Ok(v) = std::env::var("DEV_REGEX") {
        config.watcher.device_regex = v;
    }
    if let Ok(v) = std::env::var("LOG_LEVEL") {
        config.logger.level = v;
    }
    if let Ok(v) = std::env::var("LOG_FILE") {
        config.logger.file = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_with_no_file() {
        let cfg = load_from_bytes(b"").unwrap();
        assert_eq!(cfg.watcher.block_threshold, 10);
        assert_eq!(cfg.watcher.device_regex, r"^tap.{8}-.{2}$");
        assert!(!cfg.watcher.block_enabled);
        assert_eq!(cfg.logger.level, "debug");
    }

    #[test]
    fn file_overrides_defaults() {
        let yaml = b"watcher:\n  block_threshold: 100\n  block_enabled: true\n";
        let cfg = load_from_bytes(yaml).unwrap();
        assert_eq!(cfg.watcher.block_threshold, 100);
        assert!(cfg.watcher.block_enabled);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.watcher.device_regex, r"^tap.{8}-.{2}$");
    }

    #[test]
    fn read_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "watcher:\n  device_list: [\"tap1\", \"tap5\"]").unwrap();
        let cfg = read_config(Some(file.path())).unwrap();
        assert_eq!(cfg.watcher.device_list, vec!["tap1", "tap5"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = read_config(Some(Path::new("/nonexistent/storm-control.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_apply_only_when_no_file_is_given() {
        std::env::set_var("BLOCK_THRESHOLD", "77");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "watcher:\n  block_threshold: 5").unwrap();
        let from_file = read_config(Some(file.path())).unwrap();
        assert_eq!(from_file.watcher.block_threshold, 5, "a supplied file must not be overlaid with env vars");

        let from_env = read_config(None).unwrap();
        assert_eq!(from_env.watcher.block_threshold, 77);

        std::env::remove_var("BLOCK_THRESHOLD");
    }
}

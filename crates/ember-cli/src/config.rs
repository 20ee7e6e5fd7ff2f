//! Runtime configuration – reads `~/.ember/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use ember_types::KernelError;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(KernelError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Daemon configuration.  Every field has a default, so an empty or partial
/// file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Boot GUI-only services and run the GUI init pass.
    #[serde(default)]
    pub gui_mode: bool,

    /// Default timeout for shared bus acquisition.
    #[serde(default = "default_bus_timeout_ms")]
    pub bus_timeout_ms: u64,

    /// Capacity of the GPIO edge queue.
    #[serde(default = "default_gpio_queue_capacity")]
    pub gpio_queue_capacity: usize,

    /// Period of the service health sweep.
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Simulated board profile (`"simulator"` or `"headless"`).
    #[serde(default = "default_board")]
    pub board: String,
}

fn default_bus_timeout_ms() -> u64 {
    1000
}
fn default_gpio_queue_capacity() -> usize {
    20
}
fn default_health_interval_ms() -> u64 {
    5000
}
fn default_board() -> String {
    "simulator".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gui_mode: false,
            bus_timeout_ms: default_bus_timeout_ms(),
            gpio_queue_capacity: default_gpio_queue_capacity(),
            health_interval_ms: default_health_interval_ms(),
            log_format: LogFormat::default(),
            board: default_board(),
        }
    }
}

/// Resolve the config path: `--config <path>`, then `EMBER_CONFIG`, then
/// `~/.ember/config.toml`.
pub fn config_path(cli_override: Option<&str>) -> PathBuf {
    if let Some(p) = cli_override {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("EMBER_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ember").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, KernelError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| KernelError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| KernelError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `EMBER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `EMBER_GUI_MODE` | `gui_mode` (`1`/`true`/`0`/`false`) |
/// | `EMBER_BUS_TIMEOUT_MS` | `bus_timeout_ms` |
/// | `EMBER_LOG_FORMAT` | `log_format` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("EMBER_GUI_MODE") {
        match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => cfg.gui_mode = true,
            "0" | "false" | "no" => cfg.gui_mode = false,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("EMBER_BUS_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.bus_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("EMBER_LOG_FORMAT")
        && let Ok(format) = v.parse::<LogFormat>()
    {
        cfg.log_format = format;
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    File(PathBuf),
    /// No file at the path; defaults apply.
    Defaults(PathBuf),
    /// The file could not be read or parsed; defaults apply.
    Invalid(PathBuf, String),
}

/// Load the effective configuration: file (or defaults) plus environment.
pub fn resolve(path: &Path) -> (Config, Source) {
    let (mut cfg, source) = match load_from(path) {
        Ok(Some(cfg)) => (cfg, Source::File(path.to_path_buf())),
        Ok(None) => (Config::default(), Source::Defaults(path.to_path_buf())),
        Err(e) => (
            Config::default(),
            Source::Invalid(path.to_path_buf(), e.to_string()),
        ),
    };
    apply_env_overrides(&mut cfg);
    (cfg, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert!(!cfg.gui_mode);
        assert_eq!(cfg.bus_timeout_ms, 1000);
        assert_eq!(cfg.gpio_queue_capacity, 20);
        assert_eq!(cfg.health_interval_ms, 5000);
        assert_eq!(cfg.log_format, LogFormat::Compact);
        assert_eq!(cfg.board, "simulator");
    }

    #[test]
    fn config_path_points_to_ember_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".ember"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn cli_override_wins() {
        assert_eq!(
            config_path(Some("/etc/ember.toml")),
            PathBuf::from("/etc/ember.toml")
        );
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "gui_mode = true\nboard = \"headless\"\nlog_format = \"json\"\n")
            .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert!(cfg.gui_mode);
        assert_eq!(cfg.board, "headless");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.bus_timeout_ms, 1000);
        assert_eq!(cfg.gpio_queue_capacity, 20);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "bus_timeout_ms = \"soon\"").expect("write");

        assert!(matches!(load_from(&path), Err(KernelError::Config(_))));
        let (cfg, source) = resolve(&path);
        assert_eq!(cfg.gpio_queue_capacity, 20);
        assert!(matches!(source, Source::Invalid(..)));
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("pretty".parse::<LogFormat>().is_err());
    }

    // All environment mutations live in one test so parallel tests never
    // observe each other's variables.
    #[test]
    fn apply_env_overrides_reads_ember_vars() {
        // SAFETY: the only test in this crate touching these variables.
        unsafe {
            std::env::set_var("EMBER_GUI_MODE", "true");
            std::env::set_var("EMBER_BUS_TIMEOUT_MS", "250");
            std::env::set_var("EMBER_LOG_FORMAT", "json");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.gui_mode);
        assert_eq!(cfg.bus_timeout_ms, 250);
        assert_eq!(cfg.log_format, LogFormat::Json);

        unsafe { std::env::set_var("EMBER_BUS_TIMEOUT_MS", "not-a-number") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bus_timeout_ms, 1000);

        unsafe {
            std::env::remove_var("EMBER_GUI_MODE");
            std::env::remove_var("EMBER_BUS_TIMEOUT_MS");
            std::env::remove_var("EMBER_LOG_FORMAT");
        }
    }
}

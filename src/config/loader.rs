//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, DeliveryPolicy, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_LISTENER";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-listener.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_LISTENER_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_LISTENER_CONFIG` environment variable (explicit path)
    /// 2. `./serial-listener.toml` (current directory)
    /// 3. the platform config directory (`~/.config/serial-listener/` on Linux)
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Environment overrides that fail to parse are ignored here.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if let Err(e) = apply_env_overrides(&mut config) {
            debug!(error = %e, "ignoring environment override");
        }

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to the file it was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self.config_path.as_ref().ok_or(ConfigError::NoPath)?;
        save_to_file(&self.config, path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        debug!(path = %path.display(), "{} points at a missing file", CONFIG_PATH_ENV);
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Platform config directory for this tool.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-listener").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Apply `SERIAL_LISTENER_<SECTION>_<KEY>` overrides from the process environment.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply overrides from any key lookup.
pub(crate) fn apply_overrides_from<F>(config: &mut Config, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |suffix: &str| {
        let var = format!("{}_{}", ENV_PREFIX, suffix);
        lookup(&var).map(|value| (var, value))
    };

    let listener = &mut config.listener;
    parse_into(get("LISTENER_READ_CHUNK_SIZE"), &mut listener.read_chunk_size)?;
    parse_into(
        get("LISTENER_PARTIAL_BUFFER_CAPACITY"),
        &mut listener.partial_buffer_capacity,
    )?;
    parse_into(get("LISTENER_ERROR_THRESHOLD"), &mut listener.error_threshold)?;
    parse_into(get("LISTENER_ERROR_BACKOFF_MS"), &mut listener.error_backoff_ms)?;
    parse_into(get("LISTENER_JOIN_TIMEOUT_MS"), &mut listener.join_timeout_ms)?;
    parse_into(get("LISTENER_WAKE_RETRY_MS"), &mut listener.wake_retry_ms)?;

    parse_into(get("EVENTS_DELIVERY"), &mut config.events.delivery)?;
    parse_into(get("EVENTS_POLL_INTERVAL_MS"), &mut config.events.poll_interval_ms)?;

    let monitor = &mut config.monitor;
    if let Some((_, value)) = get("MONITOR_SUBSYSTEM") {
        monitor.subsystem = value;
    }
    if let Some((_, value)) = get("MONITOR_DEVICE_TYPE") {
        monitor.device_type = value;
    }
    parse_into(get("MONITOR_SETTLE_DELAY_MS"), &mut monitor.settle_delay_ms)?;
    parse_into(
        get("MONITOR_ENUMERATION_INTERVAL_MS"),
        &mut monitor.enumeration_interval_ms,
    )?;

    if let Some((_, value)) = get("LOGGING_LEVEL") {
        config.logging.level = value;
    }
    parse_into(get("LOGGING_FORMAT"), &mut config.logging.format)?;

    Ok(())
}

fn parse_into<T>(entry: Option<(String, String)>, target: &mut T) -> ConfigResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some((var, value)) = entry {
        *target = value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::env_parse(var, e.to_string()))?;
    }
    Ok(())
}

impl FromStr for DeliveryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "platform" => Ok(Self::Platform),
            "always" => Ok(Self::Always),
            "on_change" | "on-change" | "onchange" => Ok(Self::OnChange),
            other => Err(format!(
                "unknown delivery '{}', expected platform, always or on_change",
                other
            )),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!(
                "unknown log format '{}', expected json, pretty or compact",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        apply_overrides_from(
            &mut config,
            lookup(&[
                ("SERIAL_LISTENER_LISTENER_ERROR_THRESHOLD", "5"),
                ("SERIAL_LISTENER_EVENTS_DELIVERY", "always"),
                ("SERIAL_LISTENER_MONITOR_SUBSYSTEM", "tty"),
                ("SERIAL_LISTENER_LOGGING_FORMAT", "json"),
            ]),
        )
        .unwrap();

        assert_eq!(config.listener.error_threshold, 5);
        assert_eq!(config.events.delivery, DeliveryPolicy::Always);
        assert_eq!(config.monitor.subsystem, "tty");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.listener.read_chunk_size, 1024);
    }

    #[test]
    fn test_bad_override_names_variable() {
        let mut config = Config::default();
        let err = apply_overrides_from(
            &mut config,
            lookup(&[("SERIAL_LISTENER_EVENTS_POLL_INTERVAL_MS", "soon")]),
        )
        .unwrap_err();

        assert!(err.to_string().contains("SERIAL_LISTENER_EVENTS_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut loader = ConfigLoader::with_defaults();
        loader.config.listener.join_timeout_ms = 750;
        loader.save_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Config = toml::from_str(&contents).unwrap();
        assert_eq!(parsed.listener.join_timeout_ms, 750);
    }

    #[test]
    fn test_save_without_path_fails() {
        let loader = ConfigLoader::with_defaults();
        assert!(matches!(loader.save(), Err(ConfigError::NoPath)));
    }
}

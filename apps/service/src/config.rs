use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::scheduler::SchedulerSettings;
use crate::registry::RegistrationPolicy;
use crate::validation::{IntervalLimits, MAX_INTERVAL_SECONDS};

/// Environment variable overriding `database.path`
pub const DATABASE_ENV: &str = "PORTWATCH_DATABASE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub probe: ProbeConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_seconds: u64,
    pub max_concurrency: usize,
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub min_interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub default_interval_seconds: u64,
    /// Zero means unlimited
    pub max_services_per_tenant: u64,
    pub default_user_type: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "portwatch.db".into(), max_connections: 8 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_seconds: 1, max_concurrency: 32, shutdown_grace_seconds: 10 }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_ms: 1_000 }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_interval_seconds: 5,
            max_interval_seconds: 86_400,
            default_interval_seconds: 5,
            max_services_per_tenant: 0,
            default_user_type: "free".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            probe: ProbeConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/portwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("portwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick (s)", &self.scheduler.tick_seconds)?;
        write_1(f, "Max Concurrency", &self.scheduler.max_concurrency)?;
        write_1(f, "Shutdown Grace (s)", &self.scheduler.shutdown_grace_seconds)?;
        write_title_1(f, "Probe")?;
        write_1(f, "Timeout (ms)", &self.probe.timeout_ms)?;
        write_title_1(f, "Registry")?;
        write_1(f, "Min Interval (s)", &self.registry.min_interval_seconds)?;
        write_1(f, "Max Interval (s)", &self.registry.max_interval_seconds)?;
        write_1(f, "Default Interval (s)", &self.registry.default_interval_seconds)?;
        write_1(f, "Max Services / Tenant", &self.registry.max_services_per_tenant)?;
        write_1(f, "Default User Type", &self.registry.default_user_type)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/portwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,no_run
    /// use portwatch_service::config::Config;
    ///
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), portwatch_service::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Self::from_toml(&raw_string)?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = env::var(DATABASE_ENV) {
            if !path.trim().is_empty() {
                self.database.path = path;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let registry = &self.registry;
        if registry.min_interval_seconds == 0 {
            return Err(ConfigError::Invalid("registry.min_interval_seconds must be > 0".into()));
        }
        if registry.min_interval_seconds > registry.max_interval_seconds {
            return Err(ConfigError::Invalid(
                "registry.min_interval_seconds exceeds registry.max_interval_seconds".into(),
            ));
        }
        if registry.max_interval_seconds > MAX_INTERVAL_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "registry.max_interval_seconds must be at most {MAX_INTERVAL_SECONDS}"
            )));
        }
        if !(registry.min_interval_seconds..=registry.max_interval_seconds)
            .contains(&registry.default_interval_seconds)
        {
            return Err(ConfigError::Invalid(
                "registry.default_interval_seconds is outside the allowed interval range".into(),
            ));
        }
        if self.scheduler.tick_seconds == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_seconds must be > 0".into()));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::Invalid("scheduler.max_concurrency must be > 0".into()));
        }
        if self.probe.timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe.timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_secs(self.scheduler.tick_seconds),
            max_concurrency: self.scheduler.max_concurrency,
            shutdown_grace: Duration::from_secs(self.scheduler.shutdown_grace_seconds),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.timeout_ms)
    }

    pub fn registration_policy(&self) -> RegistrationPolicy {
        RegistrationPolicy {
            intervals: IntervalLimits {
                min_seconds: self.registry.min_interval_seconds,
                max_seconds: self.registry.max_interval_seconds,
            },
            max_services_per_tenant: self.registry.max_services_per_tenant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/portwatch");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("nested/portwatch.toml").exists());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [scheduler]
            max_concurrency = 4

            [registry]
            min_interval_seconds = 10
            default_interval_seconds = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_concurrency, 4);
        assert_eq!(config.scheduler.tick_seconds, 1);
        assert_eq!(config.registration_policy().intervals.min_seconds, 10);
        assert_eq!(config.probe_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inconsistent_intervals() {
        let mut config = Config::default();
        config.registry.default_interval_seconds = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.registry.min_interval_seconds = 100;
        config.registry.max_interval_seconds = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_caps_max_interval() {
        let mut config = Config::default();
        config.registry.max_interval_seconds = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.registry.max_interval_seconds = MAX_INTERVAL_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_display_lists_sections() {
        let rendered = Config::default().to_string();
        assert!(rendered.contains("Database"));
        assert!(rendered.contains("Timeout (ms): 1000"));
    }
}

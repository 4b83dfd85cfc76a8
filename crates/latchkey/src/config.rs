use std::fmt;
use std::time::Duration;

use latchkey_store::{BackendDescriptor, Lifespans, mask_password};
use serde::{Deserialize, Serialize};

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub lifespans: Lifespans,
    pub sweep: SweepConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Checks values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<(), String> {
        self.database.descriptor().map_err(|e| format!("database.url: {e}"))?;
        if self.database.pool_size == 0 {
            return Err("database.pool_size must be > 0".into());
        }
        if self.sweep.interval.is_zero() {
            return Err("sweep.interval must be > 0".into());
        }
        self.lifespans.validate()?;
        Ok(())
    }

    /// Copy safe to print: the database password is masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.database.url = mask_password(&copy.database.url);
        copy
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory`, `postgres://…` or `mysql://…`
    pub url: String,
    pub pool_size: u32,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: Option<u64>,
    /// Apply embedded migrations when connecting.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "memory".into(),
            pool_size: 10,
            connect_timeout_ms: 5000,
            idle_timeout_ms: Some(300_000),
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    /// Parses `url` into a backend descriptor.
    pub fn descriptor(&self) -> Result<BackendDescriptor, latchkey_store::DescriptorError> {
        BackendDescriptor::parse(&self.url)
    }
}

/// Background purge of expired sessions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

pub mod loader {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::AppConfig;

    /// Default config file, read when present.
    pub const DEFAULT_PATH: &str = "latchkey.toml";

    /// Flat variables honoured for compatibility with common deployments,
    /// applied after the `LATCHKEY__` overrides.
    const FLAT_OVERRIDES: &[(&str, &str)] = &[
        ("DATABASE_URL", "database.url"),
        ("LOG_LEVEL", "logging.level"),
        ("LOG_FORMAT", "logging.format"),
    ];

    /// Loads configuration from `path` (or `latchkey.toml`) and the process
    /// environment.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        load_config_with_env(path, std::env::vars().collect())
    }

    /// Same as [`load_config`] with an explicit environment.
    pub fn load_config_with_env(
        path: Option<&str>,
        env: HashMap<String, String>,
    ) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_PATH));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", file.display()));
        }

        // Environment variable overrides, e.g. LATCHKEY__DATABASE__POOL_SIZE=20
        builder = builder.add_source(
            Environment::with_prefix("LATCHKEY")
                .try_parsing(true)
                .separator("__")
                .source(Some(env.clone())),
        );

        for (var, key) in FLAT_OVERRIDES {
            let value = env.get(*var).filter(|v| !v.is_empty()).cloned();
            builder = builder
                .set_override_option(*key, value)
                .map_err(|e| format!("config override error: {e}"))?;
        }

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

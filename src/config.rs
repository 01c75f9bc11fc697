//! Configuration
//!
//! Layered configuration: CLI overrides env overrides config file overrides
//! defaults. The log-store section additionally
//! resolves `env.`-prefixed string fields against the process environment
//! before a networked connection is attempted.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::StoreError;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub log_store: LogStoreDocument,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,gateway_logstore=debug".to_string(), file: None }
    }
}

/// Top-level log-store configuration document.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LogStoreDocument {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: Option<StoreKind>,
    pub config: Option<BackendConfig>,
    /// Retention window in days for the retention cleaner; `None` or < 1
    /// resolves to 365.
    pub retention_days: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Sqlite,
    Postgres,
    Mysql,
}

/// The two connection *variants*: `embedded` carries a file path,
/// `networked` carries host/credential fields. Any
/// networked string field beginning with `env.` is resolved against the
/// process environment before use.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum BackendConfig {
    Embedded { path: String },
    Networked {
        host: String,
        port: u16,
        user: String,
        password: String,
        db_name: String,
        ssl_mode: String,
    },
}

const ENV_PREFIX: &str = "env.";

fn resolve_env(value: &str) -> Result<String, StoreError> {
    match value.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var).map_err(|_| {
            StoreError::ConfigError(format!("environment variable '{var}' is not set"))
        }),
        None => Ok(value.to_string()),
    }
}

impl BackendConfig {
    /// Resolve every `env.`-prefixed field, failing configuration if a
    /// referenced variable is missing.
    pub fn resolved(&self) -> Result<BackendConfig, StoreError> {
        match self {
            BackendConfig::Embedded { path } => {
                Ok(BackendConfig::Embedded { path: resolve_env(path)? })
            },
            BackendConfig::Networked { host, port, user, password, db_name, ssl_mode } => {
                Ok(BackendConfig::Networked {
                    host: resolve_env(host)?,
                    port: *port,
                    user: resolve_env(user)?,
                    password: resolve_env(password)?,
                    db_name: resolve_env(db_name)?,
                    ssl_mode: resolve_env(ssl_mode)?,
                })
            },
        }
    }
}

/// Command line arguments for configuration overrides.
#[derive(Parser, Debug, Clone)]
#[command(name = "gateway-logstore")]
#[command(version, about = "LLM gateway log-store core")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (overrides config file, e.g., "info,gateway_logstore=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(path) = config_path {
            Self::from_toml(&path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    fn find_config_file() -> Option<String> {
        let possible_paths = ["conf/config.toml", "config.toml", "./conf/config.toml"];
        possible_paths.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefixed_field_resolves_from_environment() {
        unsafe {
            std::env::set_var("LOGSTORE_TEST_HOST", "db.internal");
        }
        let cfg = BackendConfig::Networked {
            host: "env.LOGSTORE_TEST_HOST".to_string(),
            port: 5432,
            user: "gateway".to_string(),
            password: "secret".to_string(),
            db_name: "logs".to_string(),
            ssl_mode: "disable".to_string(),
        };
        let resolved = cfg.resolved().unwrap();
        match resolved {
            BackendConfig::Networked { host, .. } => assert_eq!(host, "db.internal"),
            _ => panic!("expected networked variant"),
        }
    }

    #[test]
    fn missing_env_variable_is_config_error() {
        let cfg = BackendConfig::Embedded { path: "env.LOGSTORE_DOES_NOT_EXIST".to_string() };
        assert!(matches!(cfg.resolved(), Err(StoreError::ConfigError(_))));
    }
}

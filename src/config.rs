//! Layered configuration: built-in defaults, `config/default.toml`,
//! `config/{RUN_MODE}.toml`, then `LIBRARY__SECTION__KEY` environment
//! variables. `DATABASE_URL` overrides `database.url`.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;

const DEFAULTS: &str = include_str!("../config/default.toml");

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Installed as the caller of unauthenticated requests when set.
    #[serde(default)]
    pub anonymous_permissions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    /// Days between checkout (or renewal) and the due date.
    #[serde(default = "default_loan_days")]
    pub loan_days: i64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            loan_days: default_loan_days(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub library: LibraryConfig,
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_loan_days() -> i64 {
    21
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let builder = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("LIBRARY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.anonymous_permissions")
                    .try_parsing(true),
            )
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?;
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validated()
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        if self.library.loan_days <= 0 {
            return Err(ConfigError::Message(format!(
                "library.loan_days must be positive, got {}",
                self.library.loan_days
            )));
        }
        let prefix = self.server.api_prefix.trim().trim_end_matches('/');
        self.server.api_prefix = if prefix.is_empty() || prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{prefix}")
        };
        Ok(self)
    }
}

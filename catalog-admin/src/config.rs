use anyhow::Result;
use catalog_admin_api::observability::LogConfig;
use catalog_admin_api::security::JwtConfig;
use catalog_admin_api::SecurityConfig;
use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Seconds background tasks get to stop once the server has drained
    pub shutdown_timeout_secs: u64,
    pub log: LogConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
}

impl Config {
    /// `config/default`, then `config/local`, then `CATALOG_ADMIN__*`
    /// environment variables (`CATALOG_ADMIN__SECURITY__RATE_LIMIT__MAX_REQUESTS=50`)
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("CATALOG_ADMIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown_timeout_secs: 10,
            log: LogConfig::default(),
            jwt: JwtConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

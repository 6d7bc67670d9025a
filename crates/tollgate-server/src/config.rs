use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tollgate_auth::AuthConfig;
use tollgate_gateway::GatewayConfig;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "tollgate.toml";

/// Prefix for environment overrides, e.g. `TOLLGATE__SERVER__PORT=9090`.
pub const ENV_PREFIX: &str = "TOLLGATE";

const VALID_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        if !VALID_LEVELS.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {VALID_LEVELS:?}"));
        }
        self.auth.validate().map_err(|e| format!("auth: {e}"))?;
        self.gateway.validate().map_err(|e| format!("gateway: {e}"))?;
        for user in &self.bootstrap.users {
            if user.username.trim().is_empty() || user.password.is_empty() {
                return Err("bootstrap.users entries need a username and password".into());
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Body limit for the authority endpoints.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            body_limit_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Accounts created at startup when missing.
    pub users: Vec<BootstrapUser>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Loads configuration from an optional TOML file plus environment
/// overrides, then validates it. A missing file is not an error.
pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
    let mut builder = Config::builder();
    let path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );
    let cfg = builder
        .build()
        .map_err(|e| format!("config build error: {e}"))?;
    let merged: AppConfig = cfg
        .try_deserialize()
        .map_err(|e| format!("config deserialize error: {e}"))?;
    merged.validate()?;
    Ok(merged)
}

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

/// One day, the cooldown used when `faucet.cooldown_ms` is omitted.
pub const DEFAULT_FAUCET_COOLDOWN_MS: u64 = 86_400_000;

/// Thirty days; longer cooldowns are rejected at load time.
pub const MAX_FAUCET_COOLDOWN_MS: u64 = 30 * DEFAULT_FAUCET_COOLDOWN_MS;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub faucet: FaucetConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("CODEX_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("CODEX_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        assert!(
            self.database.max_connections >= self.database.min_connections.unwrap_or(1),
            "Max connections must be >= min connections"
        );
        self.faucet.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

/// Process-wide faucet switch and cooldown, read-only after load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FaucetConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "FaucetConfig::default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl FaucetConfig {
    pub fn new(enabled: bool, cooldown: chrono::Duration) -> Self {
        assert!(
            cooldown >= chrono::Duration::zero(),
            "Faucet cooldown must not be negative"
        );
        Self {
            enabled,
            cooldown_ms: cooldown.num_milliseconds() as u64,
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        assert!(
            self.cooldown_ms <= MAX_FAUCET_COOLDOWN_MS,
            "Faucet cooldown invariant broken"
        );
        chrono::Duration::milliseconds(self.cooldown_ms as i64)
    }

    fn ensure_bounds(&self) -> Result<()> {
        if self.cooldown_ms > MAX_FAUCET_COOLDOWN_MS {
            anyhow::bail!(
                "Faucet cooldown of {}ms exceeds the {}ms limit",
                self.cooldown_ms,
                MAX_FAUCET_COOLDOWN_MS
            );
        }
        Ok(())
    }

    const fn default_cooldown_ms() -> u64 {
        DEFAULT_FAUCET_COOLDOWN_MS
    }
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown_ms: DEFAULT_FAUCET_COOLDOWN_MS,
        }
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

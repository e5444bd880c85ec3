use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

/// Configuration for an endpoint process (the radio-attached client).
///
/// Loaded from `$XDG_CONFIG_HOME/broadcaster/endpoint.toml`, created with
/// defaults on first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

/// Coordinator address and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `host:port` or a `ws(s)://` URL kept for continuity with older
    /// deployments — a `ws(s)://` value is downgraded to `host:port` at
    /// dial time (the `wss`/`ws` scheme only ever toggled the original's
    /// websocket library's TLS behaviour, which this wire format has no
    /// equivalent knob for; plain TCP is used either way).
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub token: String,
}

/// GPIO pin assignment for PTT/COS. `-1` means "not wired" and selects the
/// no-op driver for that signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    #[serde(default = "default_gpio_device")]
    pub gpio_device: String,
    #[serde(default = "default_unset_pin")]
    pub ptt_pin: i32,
    #[serde(default = "default_unset_pin")]
    pub cos_pin: i32,
}

/// Where the endpoint keeps its local mirror of the coordinator's audio
/// files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Empty string means "create a fresh temp directory on startup",
    /// matching `RadioConfig.ApplyDefaults()`.
    #[serde(default)]
    pub cache_path: PathBuf,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            token: String::new(),
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            gpio_device: default_gpio_device(),
            ptt_pin: default_unset_pin(),
            cos_pin: default_unset_pin(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::new(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            gpio: GpioConfig::default(),
            cache: CacheConfig::default(),
            time_zone: default_time_zone(),
        }
    }
}

fn default_gpio_device() -> String {
    "gpiochip0".to_string()
}

fn default_unset_pin() -> i32 {
    -1
}

fn default_time_zone() -> String {
    "Local".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ServerUrl must be provided in the configuration")]
    MissingServerUrl,
    #[error("Token must be provided in the configuration")]
    MissingToken,
    #[error("DatabasePath must be provided in the configuration")]
    MissingDatabasePath,
    #[error("AudioFilesPath must be provided in the configuration")]
    MissingAudioFilesPath,
}

impl EndpointConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.validate()?;
        config.apply_defaults()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("endpoint.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.server_url.is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        if self.connection.token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(())
    }

    /// Mirrors `RadioConfig.ApplyDefaults()`: when no cache path is
    /// configured, create a fresh temp directory for this run.
    pub fn apply_defaults(&mut self) -> anyhow::Result<()> {
        if self.cache.cache_path.as_os_str().is_empty() {
            self.cache.cache_path = tempfile_dir_for_cache()?;
        }
        Ok(())
    }

    /// Resolve `connection.server_url` to a `host:port` pair for dialing,
    /// stripping any `ws://`/`wss://` scheme kept for config continuity.
    pub fn dial_address(&self) -> String {
        self.connection
            .server_url
            .trim_start_matches("wss://")
            .trim_start_matches("ws://")
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string()
    }

    /// Resolve `connection.server_url` to an `http(s)://` base URL for the
    /// coordinator's file-download endpoint, swapping a `ws(s)://` scheme
    /// for its `http(s)://` counterpart and defaulting to plain `http://`
    /// when no scheme is present at all.
    pub fn http_base_url(&self) -> String {
        let url = &self.connection.server_url;
        if let Some(rest) = url.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = url.strip_prefix("ws://") {
            format!("http://{rest}")
        } else if url.starts_with("https://") || url.starts_with("http://") {
            url.clone()
        } else {
            format!("http://{url}")
        }
    }
}

fn tempfile_dir_for_cache() -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("broadcaster-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Configuration for the coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_endpoint_port")]
    pub endpoint_port: u16,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default)]
    pub database_path: PathBuf,
    #[serde(default)]
    pub audio_files_path: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            endpoint_port: default_endpoint_port(),
            http_bind: default_http_bind(),
            database_path: PathBuf::new(),
            audio_files_path: PathBuf::new(),
        }
    }
}

fn default_bind_address() -> String {
    platform::COORDINATOR_TCP_HOST.to_string()
}

fn default_endpoint_port() -> u16 {
    platform::COORDINATOR_TCP_PORT
}

fn default_http_bind() -> String {
    platform::COORDINATOR_HTTP_BIND.to_string()
}

impl CoordinatorConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("coordinator.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingDatabasePath);
        }
        if self.audio_files_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingAudioFilesPath);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_default_validates_missing_fields() {
        let config = EndpointConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingServerUrl)
        ));
    }

    #[test]
    fn endpoint_dial_address_strips_scheme() {
        let mut config = EndpointConfig::default();
        config.connection.server_url = "wss://radio.example.com:9876".to_string();
        assert_eq!(config.dial_address(), "radio.example.com:9876");
    }

    #[test]
    fn endpoint_apply_defaults_fills_cache_path() {
        let mut config = EndpointConfig::default();
        assert!(config.cache.cache_path.as_os_str().is_empty());
        config.apply_defaults().unwrap();
        assert!(!config.cache.cache_path.as_os_str().is_empty());
        assert!(config.cache.cache_path.exists());
        std::fs::remove_dir_all(&config.cache.cache_path).ok();
    }

    #[test]
    fn coordinator_default_validates_missing_fields() {
        let config = CoordinatorConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDatabasePath)
        ));
    }

    #[test]
    fn coordinator_defaults_bind_and_port() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.endpoint_port, 9876);
    }
}

use crate::traits::{MaxWireError, TransportKind};
use crate::transport::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_WEBSOCKET_URI: &str = "wss://ws-api.oneme.ru/websocket";
pub const DEFAULT_ORIGIN: &str = "https://web.max.ru";
pub const DEFAULT_HOST: &str = "api.oneme.ru";
pub const DEFAULT_PORT: u16 = 443;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for MaxWireError {
    fn from(e: ConfigError) -> Self {
        MaxWireError::Configuration(e.to_string())
    }
}

/// Outgoing queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingConfig {
    /// Consecutive failures tolerated before the breaker opens
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: f64,
    /// Retries for envelopes enqueued without an explicit limit
    pub max_retries: u32,
}

impl Default for OutgoingConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: 10,
            breaker_cooldown_secs: 60.0,
            max_retries: 3,
        }
    }
}

/// Device identity sent in the `SESSION_INIT` handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserAgent {
    pub device_type: String,
    pub locale: String,
    pub device_locale: String,
    pub os_version: String,
    pub device_name: String,
    pub header_user_agent: String,
    pub app_version: String,
    pub screen: String,
    pub timezone: String,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            device_type: "WEB".to_string(),
            locale: "ru".to_string(),
            device_locale: "ru".to_string(),
            os_version: "Linux".to_string(),
            device_name: "Chrome".to_string(),
            header_user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36"
                .to_string(),
            app_version: "25.10.13".to_string(),
            screen: "1080x1920 1.0x".to_string(),
            timezone: "Europe/Moscow".to_string(),
        }
    }
}

/// Client configuration
///
/// Every field has a default, so a YAML file only needs to name what it
/// changes. Call [`ClientConfig::validate`] (done by [`ClientConfig::load`]
/// and by the builder) before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TransportKind,
    pub uri: String,
    pub origin: String,
    pub host: String,
    pub port: u16,
    /// `socks5://…` URL or `auto`
    pub proxy: Option<String>,
    pub verify_tls: bool,

    pub reconnect: bool,
    pub reconnect_delay_secs: f64,
    pub max_reconnect_delay_secs: f64,
    /// `None` = retry forever
    pub max_reconnect_attempts: Option<usize>,

    pub request_timeout_secs: f64,
    pub connect_timeout_secs: f64,
    pub ping_interval_secs: f64,

    /// Directory holding `session.json`
    pub work_dir: PathBuf,

    pub phone: Option<String>,
    pub token: Option<String>,
    pub registration: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language: String,
    pub chats_count: u32,

    pub incoming_queue_capacity: usize,
    /// Header `ver`; defaults per transport
    pub protocol_version: Option<u8>,

    pub outgoing: OutgoingConfig,
    pub user_agent: UserAgent,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Websocket,
            uri: DEFAULT_WEBSOCKET_URI.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            proxy: None,
            verify_tls: true,
            reconnect: true,
            reconnect_delay_secs: 1.0,
            max_reconnect_delay_secs: 60.0,
            max_reconnect_attempts: None,
            request_timeout_secs: 10.0,
            connect_timeout_secs: 15.0,
            ping_interval_secs: 30.0,
            work_dir: PathBuf::from("."),
            phone: None,
            token: None,
            registration: false,
            first_name: None,
            last_name: None,
            language: "ru".to_string(),
            chats_count: 40,
            incoming_queue_capacity: 1024,
            protocol_version: None,
            outgoing: OutgoingConfig::default(),
            user_agent: UserAgent::default(),
            log_level: "info".to_string(),
        }
    }
}

/// `^\+?\d{10,15}$`
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (10..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

impl ClientConfig {
    /// Load configuration from a YAML file
    ///
    /// `MAX_PHONE`, `MAX_TOKEN` and `MAX_PROXY` override the file when set.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config: ClientConfig = serde_yaml::from_str(&yaml_content)?;

        if let Ok(phone) = std::env::var("MAX_PHONE") {
            info!("Overriding phone from environment variable");
            config.phone = Some(phone);
        }
        if let Ok(token) = std::env::var("MAX_TOKEN") {
            info!("Overriding token from environment variable");
            config.token = Some(token);
        }
        if let Ok(proxy) = std::env::var("MAX_PROXY") {
            info!("Overriding proxy from environment variable");
            config.proxy = Some(proxy);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("reconnect_delay_secs", self.reconnect_delay_secs),
            ("max_reconnect_delay_secs", self.max_reconnect_delay_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("ping_interval_secs", self.ping_interval_secs),
            ("outgoing.breaker_cooldown_secs", self.outgoing.breaker_cooldown_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.reconnect_delay_secs > self.max_reconnect_delay_secs {
            return Err(ConfigError::ValidationError(
                "reconnect_delay_secs must not exceed max_reconnect_delay_secs".to_string(),
            ));
        }

        if self.incoming_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "incoming_queue_capacity must be greater than 0".to_string(),
            ));
        }

        match (&self.phone, &self.token) {
            (Some(phone), _) if !is_valid_phone(phone) => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid phone number format: {}",
                    phone
                )));
            }
            (None, None) => {
                return Err(ConfigError::ValidationError(
                    "phone is required when no token is given".to_string(),
                ));
            }
            _ => {}
        }

        if self.registration && self.first_name.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::ValidationError(
                "first_name is required for registration".to_string(),
            ));
        }

        ProxyConfig::resolve(self.proxy.as_deref())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.transport == TransportKind::Websocket {
            url::Url::parse(&self.uri).map_err(|e| {
                ConfigError::ValidationError(format!("Invalid uri '{}': {}", self.uri, e))
            })?;
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Header `ver` for the selected transport
    pub fn version(&self) -> u8 {
        self.protocol_version
            .unwrap_or_else(|| self.transport.default_version())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay_secs)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_reconnect_delay_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.outgoing.breaker_cooldown_secs)
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  Transport: {}", self.transport);
        match self.transport {
            TransportKind::Websocket => info!("  Endpoint: {}", self.uri),
            TransportKind::Socket => info!("  Endpoint: {}:{}", self.host, self.port),
        }
        info!("  Proxy: {}", if self.proxy.is_some() { "yes" } else { "no" });
        info!("  Reconnect: {} (max attempts: {:?})", self.reconnect, self.max_reconnect_attempts);
        info!("  Request timeout: {}s", self.request_timeout_secs);
        info!("  Work dir: {}", self.work_dir.display());
    }
}

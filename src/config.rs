//! Messaging configuration for the expense event publisher
//!
//! Configuration comes from an optional TOML file, then environment overrides.
//! Every field has a default so the publisher runs standalone against a local
//! broker.

use crate::connection::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_BROKER_URL: &str = "RABBITMQ_URL";
pub const ENV_BROKER_VHOST: &str = "RABBITMQ_VHOST";
pub const ENV_BROKER_EXCHANGE: &str = "RABBITMQ_EXCHANGE";

/// Main messaging configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MessagingConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub shutdown: ShutdownSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// AMQP broker URL (`amqp://` or `amqps://`), credentials allowed
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Virtual host, `/` is the broker default
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Topic exchange events are published to
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Connection name reported to the broker management UI
    #[serde(default = "default_connection_name")]
    pub connection_name: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            vhost: default_vhost(),
            exchange: default_exchange(),
            connection_name: default_connection_name(),
        }
    }
}

fn default_broker_url() -> String {
    "amqp://localhost".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_exchange() -> String {
    "expenses_exchange".to_string()
}

fn default_connection_name() -> String {
    "expense-backend".to_string()
}

/// Startup retry section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Deadline for one connect and declare attempt
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}

/// Shutdown section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShutdownSection {
    /// Deadline for closing the broker connection
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

fn default_close_timeout_ms() -> u64 {
    5000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MessagingConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: MessagingConfig = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = MessagingConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `RABBITMQ_*` overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BROKER_URL) {
            self.broker.url = url;
        }
        if let Some(vhost) = lookup(ENV_BROKER_VHOST) {
            self.broker.vhost = vhost;
        }
        if let Some(exchange) = lookup(ENV_BROKER_EXCHANGE) {
            self.broker.exchange = exchange;
        }
    }

    /// Validate value ranges and the broker URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker.url)?;

        if self.broker.exchange.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.exchange must not be empty".to_string(),
            ));
        }
        if self.broker.vhost.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.vhost must not be empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.retry.attempt_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.attempt_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.shutdown.close_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "shutdown.close_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Immutable endpoint resolved from the broker section
    pub fn endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint {
            url: self.broker.url.clone(),
            vhost: self.broker.vhost.clone(),
            exchange: self.broker.exchange.clone(),
            connection_name: self.broker.connection_name.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            attempt_timeout: Duration::from_millis(self.retry.attempt_timeout_ms),
        }
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.close_timeout_ms)
    }
}

fn parse_broker_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBrokerUrl {
        url: redact(raw),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "amqp" | "amqps") {
        return Err(invalid("scheme must be amqp or amqps"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

fn redact(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Broker endpoint resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    url: String,
    vhost: String,
    exchange: String,
    connection_name: String,
}

impl BrokerEndpoint {
    pub fn new<S: Into<String>>(url: S, vhost: S, exchange: S) -> Self {
        Self {
            url: url.into(),
            vhost: vhost.into(),
            exchange: exchange.into(),
            connection_name: default_connection_name(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// AMQP URI with the vhost as percent-encoded path (`/` becomes `%2F`)
    pub fn amqp_uri(&self) -> Result<String, ConfigError> {
        let mut url = parse_broker_url(&self.url)?;
        let vhost: String = url::form_urlencoded::byte_serialize(self.vhost.as_bytes()).collect();
        url.set_path(&format!("/{vhost}"));
        Ok(url.to_string())
    }

    /// URI safe for logs: password replaced
    pub fn redacted_uri(&self) -> String {
        match self.amqp_uri() {
            Ok(uri) => redact(&uri),
            Err(_) => redact(&self.url),
        }
    }
}

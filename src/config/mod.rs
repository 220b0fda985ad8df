//! Configuration Module
//!
//! Provides TOML-based configuration for natsd with support for:
//! - Listener settings (host, client port, optional monitoring port)
//! - Shared-credential authorization
//! - Protocol limits
//! - Per-connection protocol defaults (pedantic, verbose, ping interval)
//! - Environment variable overrides (NATSD__* prefix)

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::protocol::{
    AUTH_TIMEOUT_SECS, DEFAULT_PORT, MAX_CONTROL_LINE_SIZE, MAX_OUTBOUND_SIZE, MAX_PAYLOAD_SIZE,
    PING_INTERVAL_SECS,
};


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Listener configuration
    pub server: ServerConfig,
    /// Authorization configuration
    pub auth: AuthConfig,
    /// Protocol limits
    pub limits: LimitsConfig,
    /// Per-connection protocol defaults
    pub protocol: ProtocolConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on
    pub host: String,
    /// Client port
    pub port: u16,
    /// Monitoring port; the HTTP endpoint is only started when set
    pub http_port: Option<u16>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            http_port: None,
        }
    }
}

/// Authorization configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether clients must send valid credentials in CONNECT
    pub required: bool,
    /// Shared username
    pub user: Option<String>,
    /// Password (plaintext) - use password_hash for production
    pub password: Option<String>,
    /// Password hash (argon2 PHC format: $argon2id$v=19$...)
    pub password_hash: Option<String>,
    /// Time a client has to authorize after connecting
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: false,
            user: None,
            password: None,
            password_hash: None,
            timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
        }
    }
}

/// Protocol limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum control line length in bytes
    pub max_control_line: usize,
    /// Maximum PUB payload in bytes
    pub max_payload: usize,
    /// Maximum unflushed outbound bytes per connection
    pub max_outbound: usize,
    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_control_line: MAX_CONTROL_LINE_SIZE,
            max_payload: MAX_PAYLOAD_SIZE,
            max_outbound: MAX_OUTBOUND_SIZE,
            max_connections: 0,
        }
    }
}

/// Per-connection protocol defaults, overridable by CONNECT
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Strict subject validation
    pub pedantic: bool,
    /// Acknowledge commands with +OK
    pub verbose: bool,
    /// Interval between server PINGs (0 disables)
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            pedantic: true,
            verbose: true,
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `NATSD__` prefix with double underscores for nesting:
    ///    - `NATSD__SERVER__PORT=4223` overrides `server.port`
    ///    - `NATSD__LIMITS__MAX_PAYLOAD=65536` overrides `limits.max_payload`
    ///    - `NATSD__AUTH__REQUIRED=true` overrides `auth.required`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", DEFAULT_PORT as i64)?
            .set_default("auth.required", false)?
            .set_default("auth.timeout", format!("{}s", AUTH_TIMEOUT_SECS))?
            .set_default("limits.max_control_line", MAX_CONTROL_LINE_SIZE as i64)?
            .set_default("limits.max_payload", MAX_PAYLOAD_SIZE as i64)?
            .set_default("limits.max_outbound", MAX_OUTBOUND_SIZE as i64)?
            .set_default("limits.max_connections", 0)?
            .set_default("protocol.pedantic", true)?
            .set_default("protocol.verbose", true)?
            .set_default("protocol.ping_interval", format!("{}s", PING_INTERVAL_SECS))?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("NATSD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_control_line == 0 {
            return Err(ConfigError::Validation(
                "limits.max_control_line must be greater than 0".to_string(),
            ));
        }
        if self.limits.max_payload == 0 {
            return Err(ConfigError::Validation(
                "limits.max_payload must be greater than 0".to_string(),
            ));
        }
        if self.limits.max_outbound == 0 {
            return Err(ConfigError::Validation(
                "limits.max_outbound must be greater than 0".to_string(),
            ));
        }

        if self.auth.required {
            match self.auth.user.as_deref() {
                None | Some("") => {
                    return Err(ConfigError::Validation(
                        "auth.user is required when auth.required is set".to_string(),
                    ));
                }
                Some(_) => {}
            }
            match (&self.auth.password, &self.auth.password_hash) {
                (None, None) => {
                    return Err(ConfigError::Validation(
                        "auth must have either 'password' or 'password_hash'".to_string(),
                    ));
                }
                (Some(_), Some(_)) => {
                    return Err(ConfigError::Validation(
                        "auth cannot have both 'password' and 'password_hash'".to_string(),
                    ));
                }
                (Some(pwd), None) if pwd.is_empty() => {
                    return Err(ConfigError::Validation("auth has empty password".to_string()));
                }
                (None, Some(hash)) if !hash.starts_with("$argon2") => {
                    return Err(ConfigError::Validation(
                        "auth has invalid password_hash format (must be argon2 PHC format)"
                            .to_string(),
                    ));
                }
                _ => {}
            }
        }

        if self.server.http_port.is_some() && self.server.http_port == Some(self.server.port) {
            return Err(ConfigError::Validation(
                "server.http_port must differ from server.port".to_string(),
            ));
        }

        Ok(())
    }

    /// Client listener address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.server.host, self.server.port)
    }

    /// Monitoring listener address, if enabled
    pub fn http_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.server
            .http_port
            .map(|port| resolve(&self.server.host, port))
            .transpose()
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ConfigError::Validation(format!("could not resolve host '{}'", host)))
}

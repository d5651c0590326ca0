//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::server::ServerTransport;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Server settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Server path '{}' must start with '/'",
                    self.server.path
                ),
            });
        }
        if self.server.transports.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "At least one transport must be enabled".to_string(),
            });
        }
        Ok(())
    }
}

/// Server settings: listener and transport selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// TCP port for the HTTP listener.
    #[serde(default = "default_port")]
    pub port: u16,

    /// URL path serving the protocol.
    #[serde(default = "default_path")]
    pub path: String,

    /// Transports to bind: "stdio", "websocket", "http".
    #[serde(default = "default_transports")]
    pub transports: Vec<ServerTransport>,

    /// Whether the built-in demonstration tools are registered.
    #[serde(default = "default_true")]
    pub include_default_tools: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            path: default_path(),
            transports: default_transports(),
            include_default_tools: default_true(),
        }
    }
}

const fn default_port() -> u16 {
    3030
}

fn default_path() -> String {
    "/mcp".to_string()
}

fn default_transports() -> Vec<ServerTransport> {
    vec![ServerTransport::Websocket]
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

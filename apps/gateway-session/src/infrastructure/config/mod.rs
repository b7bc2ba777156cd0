//! Gateway Configuration Settings
//!
//! Configuration for the session driver, loaded from environment
//! variables with typed parsing and defaults.

use crate::application::ports::Endpoint;

/// Default gateway host.
const DEFAULT_HOST: &str = "localhost";

/// Default gateway port.
const DEFAULT_PORT: u16 = 8194;

/// Default service to open once the session starts.
const DEFAULT_SERVICE: &str = "//gateway/order-api";

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// `GATEWAY_PORT` was present but not a valid port number.
    #[error("invalid GATEWAY_PORT value: {0}")]
    InvalidPort(String),
}

/// Session driver configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway endpoint.
    pub endpoint: Endpoint,
    /// Service to open once the session starts.
    pub service: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            service: DEFAULT_SERVICE.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// - `GATEWAY_HOST`: gateway host (default: `localhost`)
    /// - `GATEWAY_PORT`: gateway port (default: `8194`)
    /// - `GATEWAY_SERVICE`: service name (default: `//gateway/order-api`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a present variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a present variable fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("GATEWAY_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match lookup("GATEWAY_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let service = lookup("GATEWAY_SERVICE").unwrap_or_else(|| DEFAULT_SERVICE.to_string());

        Ok(Self {
            endpoint: Endpoint::new(&host, port),
            service,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = GatewayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.endpoint, Endpoint::new("localhost", 8194));
        assert_eq!(config.service, "//gateway/order-api");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let vars = HashMap::from([
            ("GATEWAY_HOST".to_string(), "gw.example.com".to_string()),
            ("GATEWAY_PORT".to_string(), "9000".to_string()),
            ("GATEWAY_SERVICE".to_string(), "//gateway/beta".to_string()),
        ]);

        let config = GatewayConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
        assert_eq!(config.endpoint, Endpoint::new("gw.example.com", 9000));
        assert_eq!(config.service, "//gateway/beta");
    }

    #[test]
    fn malformed_port_is_rejected() {
        let result = GatewayConfig::from_lookup(|name| {
            (name == "GATEWAY_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
    }
}

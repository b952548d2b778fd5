//! HTTP listener settings.

use crate::{env_parse_or, ConfigError, FromEnv};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Where the HTTP API listens and how long shutdown cleanup may run.
///
/// Loaded from environment variables:
/// - `HOST` (default `0.0.0.0`); must be an IP address, not a hostname
/// - `PORT` (default 6060)
/// - `SHUTDOWN_TIMEOUT_SECS` (default 30): budget for closing the broker
///   once in-flight requests have drained
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Loopback with an OS-assigned port.
    pub fn ephemeral() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..Default::default()
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl FromEnv for ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env_parse_or("HOST", defaults.host)?,
            port: env_parse_or("PORT", defaults.port)?,
            shutdown_timeout: Duration::from_secs(env_parse_or(
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )?),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 6060,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_listen_on_all_interfaces() {
        temp_env::with_vars(
            [
                ("HOST", None::<&str>),
                ("PORT", None),
                ("SHUTDOWN_TIMEOUT_SECS", None),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config, ServerConfig::default());
                assert_eq!(config.socket_addr().to_string(), "0.0.0.0:6060");
            },
        );
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("HOST", Some("::1")),
                ("PORT", Some("8081")),
                ("SHUTDOWN_TIMEOUT_SECS", Some("5")),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config.socket_addr().to_string(), "[::1]:8081");
                assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
            },
        );
    }

    #[test]
    fn test_rejects_hostname_and_bad_port() {
        temp_env::with_vars([("HOST", Some("localhost")), ("PORT", None)], || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("HOST"));
        });
        temp_env::with_vars([("HOST", None), ("PORT", Some("70000"))], || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("PORT"));
        });
    }

    #[test]
    fn test_ephemeral_binds_loopback() {
        let config = ServerConfig::ephemeral();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:0");
    }
}

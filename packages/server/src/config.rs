//! Server configuration.

use std::time::Duration;

/// Configuration for a [`crate::SignalingServer`] instance.
///
/// All timers are injectable so tests can shrink them; the defaults match
/// the production values.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to bind to. Port 0 asks the OS for a free port.
    pub port: u16,
    /// Interval between liveness pings on every open connection.
    pub ping_interval: Duration,
    /// Grace window an empty room is retained before deferred deletion.
    pub empty_room_grace: Duration,
    /// Interval of the background sweep over stale empty rooms.
    pub sweep_interval: Duration,
    /// Age past which the sweep garbage-collects an empty room.
    pub max_empty_age: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            ping_interval: Duration::from_secs(30),
            empty_room_grace: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            max_empty_age: Duration::from_secs(60 * 60),
        }
    }
}

impl ServerConfig {
    /// Address string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_production_values() {
        let config = ServerConfig::default();

        assert_eq!(config.port, 3001);
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.empty_room_grace, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.max_empty_age, Duration::from_secs(3600));
    }

    #[test]
    fn test_bind_addr_joins_host_and_port() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8443,
            ..ServerConfig::default()
        };

        assert_eq!(config.bind_addr(), "0.0.0.0:8443");
    }
}

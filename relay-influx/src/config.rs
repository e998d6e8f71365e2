// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Connection settings for an InfluxDB 1.x server

use std::time::Duration;

/// InfluxDB endpoint and credentials
#[derive(Debug, Clone, PartialEq)]
pub struct InfluxConfig {
    /// Server host name or address
    pub host: String,

    /// HTTP API port
    pub port: u16,

    /// User name, empty for none
    pub username: String,

    /// Password, empty for none
    pub password: String,

    /// Target database
    pub database: String,

    /// Timeout for the handshake and for each write
    pub connection_timeout: Duration,

    /// Timeout for the TCP reachability probe
    pub probe_timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            username: String::new(),
            password: String::new(),
            database: "sensors".to_string(),
            connection_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl InfluxConfig {
    /// Settings for `host:port` with everything else defaulted
    pub fn with_endpoint(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the target database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Base URL of the HTTP API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `host:port`, for logs
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether credentials should be sent
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

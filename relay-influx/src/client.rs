// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP connector and connection for InfluxDB 1.x

use crate::config::InfluxConfig;
use crate::line::encode_batch;
use enviro_relay::{probe_reachable, Batch, Connector, Database, TransportError};
use log::{debug, info};
use std::error::Error as _;
use std::io;
use std::time::Duration;

/// Opens connections to an InfluxDB server
#[derive(Debug, Clone)]
pub struct InfluxConnector {
    config: InfluxConfig,
}

impl InfluxConnector {
    /// Create a connector; nothing touches the network yet
    pub fn new(config: InfluxConfig) -> Self {
        Self { config }
    }

    /// Connection settings
    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }
}

impl Connector for InfluxConnector {
    type Connection = InfluxConnection;

    fn is_reachable(&mut self) -> bool {
        probe_reachable(&self.config.host, self.config.port, self.config.probe_timeout)
    }

    fn connect(&mut self) -> Result<InfluxConnection, TransportError> {
        let timeout = self.config.connection_timeout;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();

        let url = format!("{}/ping", self.config.base_url());
        let response = agent
            .get(&url)
            .call()
            .map_err(|e| classify(e, timeout))?;
        if response.status() != 204 && response.status() != 200 {
            return Err(TransportError::Connection {
                reason: format!("unexpected ping status {}", response.status()),
            });
        }

        let version = response.header("X-Influxdb-Version").unwrap_or("unknown").to_string();
        info!(
            "Connected to InfluxDB {} at {} (database {})",
            version,
            self.config.endpoint(),
            self.config.database
        );

        Ok(InfluxConnection {
            agent,
            write_url: format!("{}/write", self.config.base_url()),
            config: self.config.clone(),
            server_version: version,
        })
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }
}

/// A handshaken client bound to one database
pub struct InfluxConnection {
    agent: ureq::Agent,
    write_url: String,
    config: InfluxConfig,
    server_version: String,
}

impl InfluxConnection {
    /// Version reported by the server during the handshake
    pub fn server_version(&self) -> &str {
        &self.server_version
    }
}

impl Database for InfluxConnection {
    fn write(&mut self, batch: &Batch) -> Result<(), TransportError> {
        let body = encode_batch(batch);
        if body.is_empty() {
            return Ok(());
        }

        let mut request = self
            .agent
            .post(&self.write_url)
            .query("db", &self.config.database)
            .query("precision", "ns");
        if self.config.has_credentials() {
            request = request
                .query("u", &self.config.username)
                .query("p", &self.config.password);
        }

        let response = request
            .send_string(&body)
            .map_err(|e| classify(e, self.config.connection_timeout))?;
        debug!(
            "Wrote {} points, status {}",
            batch.len(),
            response.status()
        );
        Ok(())
    }
}

/// Map a client error onto the transport taxonomy
fn classify(error: ureq::Error, timeout: Duration) -> TransportError {
    match error {
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .map(|body| body.trim().to_string())
                .unwrap_or_default();
            TransportError::Rejected { status, message }
        }
        ureq::Error::Transport(transport) => {
            let timed_out = transport
                .source()
                .and_then(|s| s.downcast_ref::<io::Error>())
                .map(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
                .unwrap_or(false);
            if timed_out {
                TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                TransportError::Connection {
                    reason: transport.to_string(),
                }
            }
        }
    }
}

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Relay Influx
//!
//! InfluxDB 1.x adapter for the enviro-relay delivery engine.
//!
//! - [`InfluxConnector`] probes the server with a short TCP connect and
//!   handshakes with `GET /ping`
//! - [`InfluxConnection`] posts batches to `/write` as line protocol
//! - HTTP and socket failures are mapped onto
//!   [`TransportError`](enviro_relay::TransportError), so 4xx rejections
//!   keep the handle while timeouts and resets drop it
//!
//! ## Example
//!
//! ```rust,no_run
//! use enviro_relay::{Connector, RetryPolicy, DeliveryEngine};
//! use relay_influx::{InfluxConfig, InfluxConnector};
//!
//! let config = InfluxConfig::with_endpoint("influx.local", 8086).with_database("sensors");
//! let engine = DeliveryEngine::new(InfluxConnector::new(config), RetryPolicy::default());
//! assert_eq!(engine.connector().endpoint(), "influx.local:8086");
//! ```

pub mod client;
pub mod config;
pub mod line;

pub use client::{InfluxConnection, InfluxConnector};
pub use config::InfluxConfig;
pub use line::encode_batch;

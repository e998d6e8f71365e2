// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Enviro Relay - Resilient environmental telemetry collector
//!
//! Samples a fixed set of environmental sensors at a fixed interval, cleans
//! the readings, and forwards them to a time-series database over a link
//! that may drop at any time.
//!
//! ## Key Features
//!
//! - **Median stabilization**: single-sample glitches never reach the database
//! - **Self-heating compensation**: temperature corrected against a CPU trend
//! - **Range/step gating**: per-metric hysteresis rejects spikes
//! - **Deadline-bounded delivery**: retries never starve the cycle cadence
//! - **Durable spool**: undelivered batches survive outages and restarts,
//!   re-sent strictly in order on reconnect
//!
//! ## Quick Start
//!
//! ```rust
//! use enviro_relay::{
//!     HeatSource, MemoryLink, Metric, Pipeline, ReadError, RelayConfig, SensorAdapter,
//! };
//! use std::time::{Duration, Instant};
//!
//! struct Fixed;
//! impl SensorAdapter for Fixed {
//!     fn read_raw(&mut self, metric: Metric) -> Result<f64, ReadError> {
//!         match metric {
//!             Metric::Temperature => Ok(24.0),
//!             Metric::Humidity => Ok(48.0),
//!             other => Err(ReadError::Unsupported(other)),
//!         }
//!     }
//! }
//! struct Cpu;
//! impl HeatSource for Cpu {
//!     fn read_celsius(&mut self) -> Result<f64, ReadError> {
//!         Ok(44.0)
//!     }
//! }
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = RelayConfig {
//!     spool_path: dir.path().join("spool.json"),
//!     sample_delay: Duration::ZERO,
//!     ..Default::default()
//! };
//! let link = MemoryLink::new();
//! let mut pipeline = Pipeline::new(&config, Fixed, Cpu, link.connector()).unwrap();
//!
//! let report = pipeline.run_once(Instant::now());
//! assert_eq!(report.points, 2);
//! assert_eq!(link.written().len(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`sensor`]: Metric catalogue and the sensor adapter contract
//! - [`stabilizer`]: Repeated sampling and median reduction
//! - [`compensator`]: Heat-source compensation
//! - [`sanitizer`]: Range/step validation with per-metric state
//! - [`batch`]: Batch format and builder
//! - [`channel`]: Database contract and in-memory implementation
//! - [`recovery`]: Deadline and retry pacing
//! - [`delivery`]: Connection lifecycle and spool routing
//! - [`spool`]: Durable store of undelivered batches
//! - [`scheduler`]: Fixed-period cycle loop
//! - [`pipeline`]: One full pass, wiring every stage together

// Modules
pub mod batch;
pub mod channel;
pub mod compensator;
pub mod config;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod recovery;
pub mod sanitizer;
pub mod scheduler;
pub mod sensor;
pub mod spool;
pub mod stabilizer;

// Re-exports for convenient access
pub use batch::{Batch, BatchBuilder, Point, Reading};
pub use channel::{Connector, Database, MemoryConnector, MemoryDatabase, MemoryLink};
pub use compensator::Compensator;
pub use config::RelayConfig;
pub use delivery::{probe_reachable, DeliveryEngine, DeliveryOutcome, LinkState, SpoolReason};
pub use error::{ConfigError, ReadError, RelayError, Result, SpoolError, TransportError};
pub use metrics::RelayMetrics;
pub use pipeline::{CycleReport, Pipeline};
pub use recovery::{with_deadline_retry, Deadline, RetryPolicy};
pub use sanitizer::{Bounds, BoundsOverride, BoundsTable, Sanitizer};
pub use scheduler::{Cycle, CycleScheduler, ShutdownFlag};
pub use sensor::{HeatSource, Metric, SensorAdapter};
pub use spool::{DrainReport, Spool, SpoolEntry};
pub use stabilizer::Stabilizer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Batch format for one cycle of measurements
//!
//! A [`Batch`] is what leaves the pipeline: a cycle timestamp plus an
//! ordered list of [`Point`]s, one per metric that produced a value. Absent
//! readings never become points, so no null field is ever written.
//!
//! # Example
//!
//! ```rust
//! use enviro_relay::batch::{BatchBuilder, Reading};
//! use enviro_relay::sensor::Metric;
//! use chrono::Utc;
//!
//! let builder = BatchBuilder::new("balcony");
//! let readings = [
//!     Reading::new(Metric::Temperature, Some(21.456)),
//!     Reading::new(Metric::Humidity, None),
//! ];
//! let batch = builder.build(Utc::now(), &readings).unwrap();
//! assert_eq!(batch.len(), 1);
//! assert_eq!(batch.points[0].value(), Some(21.46));
//! ```

use crate::sensor::Metric;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag key carrying the device identity
pub const DEVICE_TAG: &str = "device";

/// Field key carrying the measured value
pub const VALUE_FIELD: &str = "value";

/// One validated metric value for the current cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Which metric
    pub metric: Metric,
    /// Cleaned value; `None` when the metric produced nothing usable
    pub value: Option<f64>,
}

impl Reading {
    /// Create a reading
    pub fn new(metric: Metric, value: Option<f64>) -> Self {
        Self { metric, value }
    }
}

/// A single measurement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement name
    pub measurement: String,
    /// Tag set
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Field set
    pub fields: BTreeMap<String, f64>,
}

impl Point {
    /// The `value` field, if present
    pub fn value(&self) -> Option<f64> {
        self.fields.get(VALUE_FIELD).copied()
    }
}

/// Timestamped measurements from one cycle; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Cycle timestamp
    pub timestamp: DateTime<Utc>,
    /// Measurement records in metric order
    pub points: Vec<Point>,
}

impl Batch {
    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the batch has no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Look up a point by measurement name
    pub fn point(&self, measurement: &str) -> Option<&Point> {
        self.points.iter().find(|p| p.measurement == measurement)
    }
}

/// Builds batches with a fixed device tag
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    device: String,
    gas_scale: f64,
}

impl BatchBuilder {
    /// Create a builder tagging every point with `device`
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            gas_scale: 1.0,
        }
    }

    /// Multiply gas-sensor values by `scale` before rounding
    ///
    /// Deployments disagree on the unit stored for gas resistance (ohms vs.
    /// kilo-ohms); the scale is configuration, not a fixed rule.
    pub fn with_gas_scale(mut self, scale: f64) -> Self {
        self.gas_scale = scale;
        self
    }

    /// Device tag value
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Build a batch from this cycle's readings
    ///
    /// Readings without a value are skipped, as are values that are not
    /// finite after gas scaling. Returns `None` when nothing is left, so an
    /// empty batch never reaches delivery.
    pub fn build(&self, timestamp: DateTime<Utc>, readings: &[Reading]) -> Option<Batch> {
        let points: Vec<Point> = readings
            .iter()
            .filter_map(|r| r.value.and_then(|v| self.point(r.metric, v)))
            .collect();

        if points.is_empty() {
            return None;
        }
        Some(Batch { timestamp, points })
    }

    fn point(&self, metric: Metric, value: f64) -> Option<Point> {
        let value = if metric.is_gas() {
            value * self.gas_scale
        } else {
            value
        };
        let value = round_to(value, metric.decimals());
        if !value.is_finite() {
            debug!("Dropping non-finite {} value {}", metric.name(), value);
            return None;
        }

        let mut tags = BTreeMap::new();
        tags.insert(DEVICE_TAG.to_string(), self.device.clone());
        let mut fields = BTreeMap::new();
        fields.insert(VALUE_FIELD.to_string(), value);

        Some(Point {
            measurement: metric.name().to_string(),
            tags,
            fields,
        })
    }
}

/// Round half away from zero to `decimals` places
///
/// Values too large to scale are already integral at that precision and
/// come back unchanged.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for the relay pipeline

use crate::compensator::{DEFAULT_DAMPING_FACTOR, DEFAULT_WINDOW};
use crate::error::ConfigError;
use crate::sanitizer::{BoundsOverride, BoundsTable};
use crate::sensor::Metric;
use crate::spool::{DEFAULT_DRAIN_PAUSE, DEFAULT_MAX_ENTRIES};
use crate::stabilizer::{DEFAULT_SAMPLES, DEFAULT_SAMPLE_DELAY};
use std::path::PathBuf;
use std::time::Duration;

/// Pipeline-level configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Value of the `device` tag on every point
    pub device_tag: String,

    /// Target cycle period
    pub period: Duration,

    /// Part of the period never spent on delivery
    pub send_margin: Duration,

    /// Delivery attempts per batch, first one included
    pub max_retries: u32,

    /// Pause between delivery attempts
    pub retry_delay: Duration,

    /// Spool file location
    pub spool_path: PathBuf,

    /// Spool entry cap
    pub max_spool_entries: usize,

    /// Pause between re-delivered spool entries
    pub drain_pause: Duration,

    /// Reads per stabilized metric
    pub samples: usize,

    /// Pause between two reads of a stabilized metric
    pub sample_delay: Duration,

    /// Heat source history length
    pub compensation_window: usize,

    /// Compensation damping factor (larger = weaker)
    pub damping_factor: f64,

    /// Multiplier applied to gas readings
    pub gas_scale: f64,

    /// Sanitizer bounds
    pub bounds: BoundsTable,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            device_tag: "raspberry-pi".to_string(),
            period: Duration::from_secs(60),
            send_margin: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            spool_path: PathBuf::from("/var/log/sensor_failed_data.json"),
            max_spool_entries: DEFAULT_MAX_ENTRIES,
            drain_pause: DEFAULT_DRAIN_PAUSE,
            samples: DEFAULT_SAMPLES,
            sample_delay: DEFAULT_SAMPLE_DELAY,
            compensation_window: DEFAULT_WINDOW,
            damping_factor: DEFAULT_DAMPING_FACTOR,
            gas_scale: 1.0,
            bounds: BoundsTable::default(),
        }
    }
}

impl RelayConfig {
    /// Create a configuration with a custom period
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Apply sanitizer overrides on top of the defaults
    pub fn with_bounds(mut self, overrides: impl IntoIterator<Item = BoundsOverride>) -> Self {
        for o in overrides {
            self.bounds.apply(o);
        }
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue {
                key: key.to_string(),
                reason: reason.into(),
            }
        }

        if self.period.is_zero() {
            return Err(invalid("period", "must be positive"));
        }
        if self.send_margin >= self.period {
            return Err(invalid(
                "send_margin",
                format!("{:?} leaves no delivery budget in a {:?} period", self.send_margin, self.period),
            ));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "at least one attempt is required"));
        }
        if self.max_spool_entries == 0 {
            return Err(invalid("max_spool_entries", "must be positive"));
        }
        if self.samples == 0 {
            return Err(invalid("samples", "must be positive"));
        }
        if self.compensation_window == 0 {
            return Err(invalid("compensation_window", "must be positive"));
        }
        if !(self.damping_factor.is_finite() && self.damping_factor > 0.0) {
            return Err(invalid("damping_factor", format!("{} must be a positive number", self.damping_factor)));
        }
        if !self.gas_scale.is_finite() || self.gas_scale <= 0.0 {
            return Err(invalid("gas_scale", format!("{} must be a positive number", self.gas_scale)));
        }
        for metric in Metric::ALL {
            self.bounds
                .get(metric)
                .validate()
                .map_err(|reason| invalid(metric.name(), reason))?;
        }
        if self.device_tag.trim().is_empty() {
            return Err(invalid("device_tag", "must not be empty"));
        }
        Ok(())
    }
}

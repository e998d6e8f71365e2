// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sensor contract
//!
//! The relay never touches device registers. A sensor adapter exposes one
//! synchronous read per physical metric, and a heat source exposes the
//! temperature of whatever warms the board (usually the CPU).

use crate::error::{ConfigError, ReadError};
use std::fmt;
use std::str::FromStr;

/// The fixed set of metrics sampled every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    /// Ambient temperature (°C)
    Temperature,
    /// Relative humidity (%)
    Humidity,
    /// Barometric pressure (hPa)
    Pressure,
    /// PM1.0 (µg/m³)
    Pm1,
    /// PM2.5 (µg/m³)
    Pm2_5,
    /// PM10 (µg/m³)
    Pm10,
    /// Oxidising gas resistance
    Oxidising,
    /// Reducing gas resistance
    Reducing,
    /// Ammonia gas resistance
    Nh3,
    /// Illuminance (lux)
    Lux,
    /// A-weighted noise level (dB)
    NoiseDba,
}

impl Metric {
    /// All metrics, in batch order
    pub const ALL: [Metric; 11] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pressure,
        Metric::Pm1,
        Metric::Pm2_5,
        Metric::Pm10,
        Metric::Oxidising,
        Metric::Reducing,
        Metric::Nh3,
        Metric::Lux,
        Metric::NoiseDba,
    ];

    /// Measurement name written to the database
    pub fn name(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Pm1 => "pm1",
            Self::Pm2_5 => "pm2_5",
            Self::Pm10 => "pm10",
            Self::Oxidising => "oxidising",
            Self::Reducing => "reducing",
            Self::Nh3 => "nh3",
            Self::Lux => "lux",
            Self::NoiseDba => "noise_dba",
        }
    }

    /// Decimal places kept when the value is stored
    pub fn decimals(&self) -> u32 {
        match self {
            Self::NoiseDba => 1,
            _ => 2,
        }
    }

    /// Whether this metric is read repeatedly and reduced to a median
    pub fn is_stabilized(&self) -> bool {
        matches!(self, Self::Temperature | Self::Humidity | Self::Pressure)
    }

    /// Whether this metric is a gas-sensor resistance
    pub fn is_gas(&self) -> bool {
        matches!(self, Self::Oxidising | Self::Reducing | Self::Nh3)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownMetric(s.to_string()))
    }
}

/// Source of raw sensor values
pub trait SensorAdapter {
    /// Read one raw value for `metric`
    fn read_raw(&mut self, metric: Metric) -> Result<f64, ReadError>;
}

/// Source of the auxiliary temperature used for self-heating compensation
pub trait HeatSource {
    /// Read the heat source temperature in °C
    fn read_celsius(&mut self) -> Result<f64, ReadError>;
}

impl<T: SensorAdapter + ?Sized> SensorAdapter for Box<T> {
    fn read_raw(&mut self, metric: Metric) -> Result<f64, ReadError> {
        (**self).read_raw(metric)
    }
}

impl<T: HeatSource + ?Sized> HeatSource for Box<T> {
    fn read_celsius(&mut self) -> Result<f64, ReadError> {
        (**self).read_celsius()
    }
}

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Linux sysfs sensor sources
//!
//! Environmental sensors are read through the kernel IIO subsystem, one file
//! per channel under the device directory. A channel is read from
//! `<stem>_input` (already in base units) when present, otherwise from
//! `<stem>_raw` multiplied by `<stem>_scale`. The CPU thermal zone serves as
//! the heat source for self-heating compensation.

use enviro_relay::{HeatSource, Metric, ReadError, SensorAdapter};
use std::fs;
use std::path::{Path, PathBuf};

/// One IIO channel and its conversion to the metric's unit
#[derive(Debug, Clone, PartialEq)]
pub struct IioChannel {
    /// Metric fed by this channel
    pub metric: Metric,
    /// File stem, e.g. `in_temp`
    pub stem: String,
    /// Multiplier from the kernel unit to the metric unit
    pub scale: f64,
}

impl IioChannel {
    /// Create a channel mapping
    pub fn new(metric: Metric, stem: impl Into<String>, scale: f64) -> Self {
        Self {
            metric,
            stem: stem.into(),
            scale,
        }
    }
}

/// Channel layout of a BME280 plus an IIO light sensor
pub fn default_channels() -> Vec<IioChannel> {
    vec![
        // m°C
        IioChannel::new(Metric::Temperature, "in_temp", 0.001),
        // m%RH
        IioChannel::new(Metric::Humidity, "in_humidityrelative", 0.001),
        // kPa to hPa
        IioChannel::new(Metric::Pressure, "in_pressure", 10.0),
        IioChannel::new(Metric::Lux, "in_illuminance", 1.0),
    ]
}

/// Sensor adapter over an IIO device directory
#[derive(Debug, Clone)]
pub struct SysfsSensors {
    device: PathBuf,
    channels: Vec<IioChannel>,
}

impl SysfsSensors {
    /// Adapter for `device` with the default channel layout
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self::with_channels(device, default_channels())
    }

    /// Adapter with an explicit channel layout
    pub fn with_channels(device: impl Into<PathBuf>, channels: Vec<IioChannel>) -> Self {
        Self {
            device: device.into(),
            channels,
        }
    }

    /// Device directory
    pub fn device(&self) -> &Path {
        &self.device
    }

    fn read_channel(&self, channel: &IioChannel) -> Result<f64, ReadError> {
        let metric = channel.metric;
        let input = self.device.join(format!("{}_input", channel.stem));
        if input.exists() {
            return Ok(read_number(&input, metric)? * channel.scale);
        }

        // Raw counts with a separate scale file; the channel scale still
        // converts the kernel unit
        let raw = read_number(&self.device.join(format!("{}_raw", channel.stem)), metric)?;
        let scale_path = self.device.join(format!("{}_scale", channel.stem));
        let kernel_scale = if scale_path.exists() {
            read_number(&scale_path, metric)?
        } else {
            1.0
        };
        Ok(raw * kernel_scale * channel.scale)
    }
}

impl SensorAdapter for SysfsSensors {
    fn read_raw(&mut self, metric: Metric) -> Result<f64, ReadError> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.metric == metric)
            .ok_or(ReadError::Unsupported(metric))?;
        self.read_channel(channel)
    }
}

/// Thermal zone temperature, reported by the kernel in m°C
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    /// Heat source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HeatSource for ThermalZone {
    fn read_celsius(&mut self) -> Result<f64, ReadError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ReadError::HeatSource(format!("{}: {}", self.path.display(), e)))?;
        let milli: f64 = text
            .trim()
            .parse()
            .map_err(|_| ReadError::HeatSource(format!("{}: not a number: {:?}", self.path.display(), text.trim())))?;
        Ok(milli / 1000.0)
    }
}

fn read_number(path: &Path, metric: Metric) -> Result<f64, ReadError> {
    let text = fs::read_to_string(path).map_err(|e| ReadError::Device {
        metric,
        reason: format!("{}: {}", path.display(), e),
    })?;
    text.trim().parse::<f64>().map_err(|_| ReadError::Malformed {
        metric,
        raw: text.trim().to_string(),
    })
}

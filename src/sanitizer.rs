// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Range and step gate with per-metric hysteresis
//!
//! Every metric keeps its last accepted value. A new candidate is accepted
//! only if it is finite, inside the metric's range, and within `max_step`
//! of the last accepted value. Otherwise the last accepted value is carried
//! forward. Rules apply in order; the first match wins:
//!
//! 1. absent / NaN / infinite → previous value
//! 2. below `min` or above `max` → previous value
//! 3. previous exists and `|candidate - previous| > max_step` → previous value
//! 4. accept, remember, return the candidate

use crate::error::ConfigError;
use crate::sensor::Metric;
use log::debug;
use std::collections::HashMap;
use std::str::FromStr;

/// Validation limits for one metric; `None` disables that check
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    /// Lowest acceptable value
    pub min: Option<f64>,
    /// Highest acceptable value
    pub max: Option<f64>,
    /// Largest acceptable change versus the last accepted value
    pub max_step: Option<f64>,
}

impl Bounds {
    /// Bounds with every limit set
    pub const fn new(min: f64, max: f64, max_step: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            max_step: Some(max_step),
        }
    }

    /// No limits: only the non-finite gate applies
    pub const fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
            max_step: None,
        }
    }

    /// Documented defaults, tuned for a one minute period
    pub fn default_for(metric: Metric) -> Self {
        match metric {
            Metric::Temperature => Self::new(-20.0, 60.0, 0.5),
            Metric::Humidity => Self::new(0.0, 100.0, 3.0),
            Metric::Pressure => Self::new(800.0, 1100.0, 1.0),
            Metric::Lux => Self::new(0.0, 200_000.0, 100_000.0),
            _ => Self::unbounded(),
        }
    }

    fn in_range(&self, v: f64) -> bool {
        self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), String> {
        for (name, limit) in [("min", self.min), ("max", self.max)] {
            if let Some(v) = limit.filter(|v| !v.is_finite()) {
                return Err(format!("{} {} must be finite", name, v));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(format!("min {} is above max {}", min, max));
            }
        }
        if let Some(step) = self.max_step {
            if step.is_nan() || step < 0.0 {
                return Err(format!("max_step {} must be non-negative", step));
            }
        }
        Ok(())
    }
}

/// A `metric=min,max,step` override, as found in configuration
///
/// Empty fields leave that limit disabled, e.g. `lux=0,,`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsOverride {
    /// Target metric
    pub metric: Metric,
    /// Replacement bounds
    pub bounds: Bounds,
}

impl FromStr for BoundsOverride {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidBounds(s.to_string());
        let (name, limits) = s.split_once('=').ok_or_else(invalid)?;
        let metric: Metric = name.parse()?;

        let parts: Vec<&str> = limits.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut values = [None; 3];
        for (slot, part) in values.iter_mut().zip(&parts) {
            if !part.is_empty() {
                *slot = Some(part.parse::<f64>().map_err(|_| invalid())?);
            }
        }

        let bounds = Bounds {
            min: values[0],
            max: values[1],
            max_step: values[2],
        };
        bounds.validate().map_err(|_| invalid())?;
        Ok(Self { metric, bounds })
    }
}

/// Per-metric bounds, defaults unless overridden
#[derive(Debug, Clone, PartialEq)]
pub struct BoundsTable {
    overrides: HashMap<Metric, Bounds>,
}

impl BoundsTable {
    /// Table holding only the documented defaults
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    /// Replace the bounds of one metric
    pub fn set(&mut self, metric: Metric, bounds: Bounds) {
        self.overrides.insert(metric, bounds);
    }

    /// Apply a parsed override
    pub fn apply(&mut self, o: BoundsOverride) {
        self.set(o.metric, o.bounds);
    }

    /// Effective bounds for `metric`
    pub fn get(&self, metric: Metric) -> Bounds {
        self.overrides
            .get(&metric)
            .copied()
            .unwrap_or_else(|| Bounds::default_for(metric))
    }
}

impl Default for BoundsTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateful validator holding the last accepted value per metric
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    last_good: HashMap<String, f64>,
    rejected: u64,
}

impl Sanitizer {
    /// Create a sanitizer with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate `candidate` for `name`
    ///
    /// Returns the accepted candidate, or the previous accepted value when
    /// the candidate is rejected, or `None` when nothing was ever accepted.
    pub fn sanitize(&mut self, name: &str, candidate: Option<f64>, bounds: &Bounds) -> Option<f64> {
        let previous = self.last_good.get(name).copied();

        let candidate = match candidate {
            Some(v) if v.is_finite() => v,
            Some(v) => {
                debug!("{}: rejected non-finite value {}", name, v);
                self.rejected += 1;
                return previous;
            }
            None => return previous,
        };

        if !bounds.in_range(candidate) {
            debug!(
                "{}: rejected {} outside [{:?}, {:?}]",
                name, candidate, bounds.min, bounds.max
            );
            self.rejected += 1;
            return previous;
        }

        if let (Some(prev), Some(step)) = (previous, bounds.max_step) {
            if (candidate - prev).abs() > step {
                debug!(
                    "{}: rejected jump {} -> {} (max step {})",
                    name, prev, candidate, step
                );
                self.rejected += 1;
                return previous;
            }
        }

        self.last_good.insert(name.to_string(), candidate);
        Some(candidate)
    }

    /// Last accepted value for `name`
    pub fn last_good(&self, name: &str) -> Option<f64> {
        self.last_good.get(name).copied()
    }

    /// Number of candidates rejected so far (absent candidates excluded)
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

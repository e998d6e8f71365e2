// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Self-heating compensation
//!
//! A temperature sensor mounted next to a CPU reads high. The correction
//! pulls the raw value away from the trailing mean of the heat source:
//!
//! ```text
//! corrected = raw - (mean(aux) - raw) / damping_factor
//! ```
//!
//! A larger damping factor means a weaker correction.

use std::collections::VecDeque;

/// Default trailing window length (one hour at a one minute period)
pub const DEFAULT_WINDOW: usize = 60;

/// Default damping factor
pub const DEFAULT_DAMPING_FACTOR: f64 = 5.0;

/// Moving-average compensator over a bounded heat source history
#[derive(Debug, Clone)]
pub struct Compensator {
    history: VecDeque<f64>,
    capacity: usize,
    damping_factor: f64,
}

impl Compensator {
    /// Create a compensator with default window and damping
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW, DEFAULT_DAMPING_FACTOR)
    }

    /// Create a compensator with a custom window capacity and damping factor
    pub fn with_window(capacity: usize, damping_factor: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            damping_factor,
        }
    }

    /// Record an auxiliary sample, evicting the oldest when full
    pub fn observe(&mut self, aux: f64) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(aux);
    }

    /// Mean of the current window
    pub fn mean(&self) -> Option<f64> {
        if self.history.is_empty() {
            None
        } else {
            Some(self.history.iter().sum::<f64>() / self.history.len() as f64)
        }
    }

    /// Record `aux` and return the corrected `raw` value
    pub fn compensate(&mut self, raw: f64, aux: f64) -> f64 {
        self.observe(aux);
        let mean = self.mean().unwrap_or(aux);
        self.correct(raw, mean)
    }

    /// Compensate with optional inputs
    ///
    /// Without a raw value nothing happens: the window is not touched and
    /// no value comes out. Without an auxiliary sample the existing window
    /// mean is used; if the window is still empty there is nothing to
    /// correct against and the result is absent.
    pub fn compensate_opt(&mut self, raw: Option<f64>, aux: Option<f64>) -> Option<f64> {
        let raw = raw?;
        match aux.filter(|a| a.is_finite()) {
            Some(aux) => Some(self.compensate(raw, aux)),
            None => self.mean().map(|mean| self.correct(raw, mean)),
        }
    }

    fn correct(&self, raw: f64, mean: f64) -> f64 {
        raw - (mean - raw) / self.damping_factor
    }

    /// Number of samples in the window
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Window capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Compensator {
    fn default() -> Self {
        Self::new()
    }
}

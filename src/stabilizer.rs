// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Repeated sampling with median reduction
//!
//! A single glitched I2C transfer or an electrical spike shows up as one wild
//! sample. Reading a handful of times and keeping the median hides it as long
//! as the glitches stay a minority.

use crate::error::ReadError;
use log::trace;
use std::time::Duration;

/// Default number of samples per metric per cycle
pub const DEFAULT_SAMPLES: usize = 5;

/// Default pause between two samples
pub const DEFAULT_SAMPLE_DELAY: Duration = Duration::from_millis(50);

/// Multi-sample median reader
#[derive(Debug, Clone)]
pub struct Stabilizer {
    samples: usize,
    inter_sample_delay: Duration,
}

impl Stabilizer {
    /// Create a stabilizer with default settings
    pub fn new() -> Self {
        Self::with_samples(DEFAULT_SAMPLES, DEFAULT_SAMPLE_DELAY)
    }

    /// Create a stabilizer with a custom sample count and delay
    pub fn with_samples(samples: usize, inter_sample_delay: Duration) -> Self {
        Self {
            samples: samples.max(1),
            inter_sample_delay,
        }
    }

    /// Number of reads per call
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Call `read` up to `samples` times and return the median of the valid results
    ///
    /// Errors and non-finite values are discarded. Returns `None` when no
    /// sample survived.
    pub fn stabilize<F>(&self, mut read: F) -> Option<f64>
    where
        F: FnMut() -> Result<f64, ReadError>,
    {
        let mut values = Vec::with_capacity(self.samples);

        for i in 0..self.samples {
            if i > 0 && !self.inter_sample_delay.is_zero() {
                std::thread::sleep(self.inter_sample_delay);
            }
            match read() {
                Ok(v) if v.is_finite() => values.push(v),
                Ok(v) => trace!("discarding non-finite sample {}", v),
                Err(e) => trace!("discarding failed sample: {}", e),
            }
        }

        median(&mut values)
    }
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of `values`; mean of the two middle values for an even count
///
/// Sorts `values` in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Process-lifetime counters for the relay

use std::fmt;

/// Relay statistics collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayMetrics {
    /// Cycles started
    pub cycles: u64,
    /// Cycles that ran past their period
    pub overruns: u64,
    /// Cycles aborted by an error or panic
    pub cycle_faults: u64,
    /// Batches acknowledged on first delivery
    pub batches_sent: u64,
    /// Batches handed to the spool
    pub batches_spooled: u64,
    /// Write attempts, including retries
    pub send_attempts: u64,
    /// Successful handshakes
    pub reconnects: u64,
    /// Spool entries re-delivered
    pub drained: u64,
    /// Readings rejected by the sanitizer
    pub rejected_readings: u64,
}

impl RelayMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of produced batches that went out directly (0.0-1.0)
    pub fn delivery_ratio(&self) -> f64 {
        let total = self.batches_sent + self.batches_spooled;
        if total == 0 {
            return 1.0;
        }
        self.batches_sent as f64 / total as f64
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for RelayMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} overruns={} faults={} sent={} spooled={} attempts={} reconnects={} drained={} rejected={} ratio={:.1}%",
            self.cycles,
            self.overruns,
            self.cycle_faults,
            self.batches_sent,
            self.batches_spooled,
            self.send_attempts,
            self.reconnects,
            self.drained,
            self.rejected_readings,
            self.delivery_ratio() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_ratio() {
        let mut m = RelayMetrics::new();
        assert_eq!(m.delivery_ratio(), 1.0);

        m.batches_sent = 3;
        m.batches_spooled = 1;
        assert!((m.delivery_ratio() - 0.75).abs() < 1e-9);

        m.reset();
        assert_eq!(m, RelayMetrics::default());
    }

    #[test]
    fn test_display() {
        let m = RelayMetrics {
            cycles: 2,
            batches_sent: 2,
            ..Default::default()
        };
        let s = m.to_string();
        assert!(s.contains("cycles=2"));
        assert!(s.contains("ratio=100.0%"));
    }
}

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! One acquisition-cleaning-delivery pass
//!
//! The [`Pipeline`] owns every piece of state that lives across cycles:
//! sanitizer history, compensation window, connection handle, spool and
//! counters. The scheduler hands it a start time; it does the rest.
//!
//! ```text
//! link poll ─▶ read ─▶ stabilize ─▶ compensate ─▶ sanitize ─▶ build ─▶ deliver
//!   (drain)                                                             │
//!                                                                 database | spool
//! ```

use crate::batch::{BatchBuilder, Reading};
use crate::channel::Connector;
use crate::compensator::Compensator;
use crate::config::RelayConfig;
use crate::delivery::{DeliveryEngine, DeliveryOutcome, LinkState};
use crate::error::{RelayError, Result};
use crate::metrics::RelayMetrics;
use crate::recovery::{Deadline, RetryPolicy};
use crate::sanitizer::{BoundsTable, Sanitizer};
use crate::scheduler::Cycle;
use crate::sensor::{HeatSource, Metric, SensorAdapter};
use crate::spool::Spool;
use crate::stabilizer::Stabilizer;
use chrono::Utc;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// What one cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Link state after the poll at cycle start
    pub link: LinkState,
    /// Points in this cycle's batch
    pub points: usize,
    /// Delivery result; `None` when there was nothing to send
    pub outcome: Option<DeliveryOutcome>,
}

/// The full per-cycle pipeline
pub struct Pipeline<S, H, C>
where
    S: SensorAdapter,
    H: HeatSource,
    C: Connector,
{
    sensors: S,
    heat: H,
    stabilizer: Stabilizer,
    compensator: Compensator,
    sanitizer: Sanitizer,
    bounds: BoundsTable,
    builder: BatchBuilder,
    engine: DeliveryEngine<C>,
    spool: Spool,
    period: Duration,
    send_margin: Duration,
    metrics: RelayMetrics,
}

impl<S, H, C> Pipeline<S, H, C>
where
    S: SensorAdapter,
    H: HeatSource,
    C: Connector,
{
    /// Assemble a pipeline from a validated configuration
    pub fn new(config: &RelayConfig, sensors: S, heat: H, connector: C) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            sensors,
            heat,
            stabilizer: Stabilizer::with_samples(config.samples, config.sample_delay),
            compensator: Compensator::with_window(config.compensation_window, config.damping_factor),
            sanitizer: Sanitizer::new(),
            bounds: config.bounds.clone(),
            builder: BatchBuilder::new(config.device_tag.clone()).with_gas_scale(config.gas_scale),
            engine: DeliveryEngine::new(
                connector,
                RetryPolicy::fixed(config.max_retries, config.retry_delay),
            ),
            spool: Spool::new(config.spool_path.clone(), config.max_spool_entries)
                .with_drain_pause(config.drain_pause),
            period: config.period,
            send_margin: config.send_margin,
            metrics: RelayMetrics::new(),
        })
    }

    /// Run one pass for a cycle that started at `started`
    pub fn run_once(&mut self, started: Instant) -> CycleReport {
        self.metrics.cycles += 1;

        let link = match self.deadline(started) {
            Some(deadline) => self
                .engine
                .poll_link(&mut self.spool, &deadline, &mut self.metrics),
            None => self.engine.state(),
        };

        let readings = self.read_all();
        let Some(batch) = self.builder.build(Utc::now(), &readings) else {
            warn!("No valid readings this cycle, nothing to send");
            return CycleReport {
                link,
                points: 0,
                outcome: None,
            };
        };

        let deadline = self.deadline(started);
        let outcome = self
            .engine
            .deliver(&batch, deadline, &mut self.spool, &mut self.metrics);

        CycleReport {
            link,
            points: batch.len(),
            outcome: Some(outcome),
        }
    }

    /// Read, clean and validate every metric
    pub fn read_all(&mut self) -> Vec<Reading> {
        let rejected_before = self.sanitizer.rejected();
        let mut readings = Vec::with_capacity(Metric::ALL.len());

        for metric in Metric::ALL {
            let mut raw = if metric.is_stabilized() {
                self.stabilizer.stabilize(|| self.sensors.read_raw(metric))
            } else {
                match self.sensors.read_raw(metric) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        trace!("{} unavailable: {}", metric, e);
                        None
                    }
                }
            };

            if metric == Metric::Temperature && raw.is_some() {
                let aux = match self.heat.read_celsius() {
                    Ok(t) => Some(t),
                    Err(e) => {
                        debug!("Compensation without fresh heat sample: {}", e);
                        None
                    }
                };
                raw = self.compensator.compensate_opt(raw, aux);
            }

            let bounds = self.bounds.get(metric);
            let value = self.sanitizer.sanitize(metric.name(), raw, &bounds);
            readings.push(Reading::new(metric, value));
        }

        self.metrics.rejected_readings += self.sanitizer.rejected() - rejected_before;
        readings
    }

    fn deadline(&self, started: Instant) -> Option<Deadline> {
        Deadline::for_cycle(started, self.period, self.send_margin)
    }

    /// Counters since start
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// The spool
    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        self.engine.state()
    }

    /// Sanitizer state
    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Cycle period
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl<S, H, C> Cycle for Pipeline<S, H, C>
where
    S: SensorAdapter,
    H: HeatSource,
    C: Connector,
{
    fn run_cycle(&mut self, started: Instant) -> Result<()> {
        let report = self.run_once(started);
        debug!("Cycle report: {:?}", report);
        Ok(())
    }

    fn record_overrun(&mut self, _by: Duration) {
        self.metrics.overruns += 1;
    }

    fn record_fault(&mut self, _error: &RelayError) {
        self.metrics.cycle_faults += 1;
    }
}

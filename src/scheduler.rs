// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fixed-period cycle loop
//!
//! Each iteration runs one [`Cycle`], then sleeps for whatever is left of the
//! period. A cycle that runs long is logged as an overrun and the next one
//! starts immediately; cycles never overlap and are never skipped.
//!
//! This is the one place with broad fault containment: an error or a panic
//! inside a cycle is logged and the loop carries on. Shutdown is
//! cooperative, checked between iterations and while sleeping.

use crate::error::{RelayError, Result};
use log::{error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep before the shutdown flag is checked again
pub const DEFAULT_SLEEP_SLICE: Duration = Duration::from_millis(200);

/// One unit of periodic work
pub trait Cycle {
    /// Run one pass; `started` is the cycle start time
    fn run_cycle(&mut self, started: Instant) -> Result<()>;

    /// Called when a cycle ran `by` past its period
    fn record_overrun(&mut self, _by: Duration) {}

    /// Called when a cycle ended in an error or panic
    fn record_fault(&mut self, _error: &RelayError) {}
}

/// Cooperative stop signal, cheap to clone across threads
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Create an untriggered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives a [`Cycle`] at a fixed cadence
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    period: Duration,
    sleep_slice: Duration,
    shutdown: ShutdownFlag,
}

impl CycleScheduler {
    /// Create a scheduler with its own shutdown flag
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            sleep_slice: DEFAULT_SLEEP_SLICE,
            shutdown: ShutdownFlag::new(),
        }
    }

    /// Use an externally owned shutdown flag
    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Set how often a sleep checks for shutdown
    pub fn with_sleep_slice(mut self, slice: Duration) -> Self {
        self.sleep_slice = slice.max(Duration::from_millis(1));
        self
    }

    /// Handle that stops the loop
    pub fn shutdown_handle(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Target period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run `task` until shutdown; returns the number of cycles run
    pub fn run_forever<T: Cycle>(&self, task: &mut T) -> u64 {
        info!("Cycle loop started, period {:?}", self.period);
        let mut cycles = 0u64;

        while !self.shutdown.is_triggered() {
            let started = Instant::now();
            cycles += 1;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run_cycle(started)))
                .unwrap_or_else(|payload| Err(RelayError::CycleAborted(panic_message(&*payload))));
            if let Err(e) = outcome {
                error!("Cycle {} failed: {} ({:?})", cycles, e, e);
                task.record_fault(&e);
            }

            let elapsed = started.elapsed();
            match self.period.checked_sub(elapsed) {
                Some(rest) if !rest.is_zero() => self.sleep(rest),
                _ => {
                    let over = elapsed.saturating_sub(self.period);
                    warn!(
                        "Cycle {} overran its period by {:.1}s",
                        cycles,
                        over.as_secs_f64()
                    );
                    task.record_overrun(over);
                }
            }
        }

        info!("Shutdown requested, cycle loop stopped after {} cycles", cycles);
        cycles
    }

    fn sleep(&self, total: Duration) {
        let wake = Instant::now() + total;
        loop {
            if self.shutdown.is_triggered() {
                return;
            }
            let left = wake.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            std::thread::sleep(left.min(self.sleep_slice));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

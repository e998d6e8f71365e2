// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Retry pacing under a wall-clock budget
//!
//! Delivery gets whatever is left of the cycle period minus a safety margin.
//! Retries and backoff sleeps are clipped to that budget so a dead link can
//! never push a cycle past its slot.

use std::time::{Duration, Instant};

/// Point in time after which no more delivery work may start
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline at an absolute instant
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self::at(Instant::now() + budget)
    }

    /// Budget for a cycle that started at `cycle_start`
    ///
    /// `period - elapsed - margin`. Returns `None` when that is not positive,
    /// in which case delivery must be skipped altogether.
    pub fn for_cycle(cycle_start: Instant, period: Duration, margin: Duration) -> Option<Self> {
        let end = cycle_start.checked_add(period.checked_sub(margin)?)?;
        if end > Instant::now() {
            Some(Self::at(end))
        } else {
            None
        }
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the budget is spent
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The instant itself
    pub fn instant(&self) -> Instant {
        self.at
    }
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Pause to take after failed attempt `attempt` (0-indexed)
    ///
    /// Returns `None` when no further attempt should be made: either the
    /// attempts are used up or the deadline has passed. Otherwise the pause
    /// is the configured delay, shortened to whatever budget remains.
    pub fn pause_after(&self, attempt: u32, deadline: &Deadline) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return None;
        }
        Some(self.delay.min(remaining))
    }
}

/// Execute `operation` with retry under a deadline
///
/// `operation` receives the attempt number. It is never called once the
/// deadline has passed. On exhaustion the last error is returned, or
/// `on_expired()` when the deadline passed before the first attempt.
pub fn with_deadline_retry<T, E, F, X>(
    policy: &RetryPolicy,
    deadline: &Deadline,
    mut operation: F,
    on_expired: X,
) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    X: FnOnce() -> E,
{
    let mut attempt = 0;
    let mut last_error = None;
    loop {
        if deadline.is_expired() {
            return Err(last_error.unwrap_or_else(on_expired));
        }
        match operation(attempt) {
            Ok(v) => return Ok(v),
            Err(e) => match policy.pause_after(attempt, deadline) {
                Some(pause) => {
                    std::thread::sleep(pause);
                    last_error = Some(e);
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Delivery engine
//!
//! Owns the connection handle and moves batches to the database, or to the
//! spool when that is not possible within the cycle budget.
//!
//! ```text
//!                 probe ok + connect ok
//!   Disconnected ─────────────────────────▶ Connected ──▶ drain spool
//!        ▲                                      │
//!        └──────── probe fails / transport error┘
//! ```
//!
//! Nothing here is fatal. Exhausted retries and missing connectivity end
//! with the batch in the spool and a [`DeliveryOutcome`] describing why.

use crate::batch::Batch;
use crate::channel::{Connector, Database};
use crate::error::TransportError;
use crate::metrics::RelayMetrics;
use crate::recovery::{with_deadline_retry, Deadline, RetryPolicy};
use crate::spool::{DrainReport, Spool};
use log::{debug, info, warn};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No live handle
    #[default]
    Disconnected,
    /// A handle exists and has not failed yet
    Connected,
}

/// Why a batch ended up in the spool
#[derive(Debug, Clone, PartialEq)]
pub enum SpoolReason {
    /// No connection this cycle
    Disconnected,
    /// The cycle had no delivery budget left
    NoBudget,
    /// Every attempt failed; carries the last error
    Failed(TransportError),
}

/// Result of delivering one batch
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Acknowledged by the database
    Sent {
        /// Attempts it took, 1 on first try
        attempts: u32,
    },
    /// Handed to the spool
    Spooled(SpoolReason),
}

impl DeliveryOutcome {
    /// Whether the batch reached the database
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// TCP-level reachability check
///
/// Resolves `host` and tries each address with `timeout`. Cheaper than a
/// full client handshake, whose timeout is usually much longer.
pub fn probe_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Cannot resolve {}:{}: {}", host, port, e);
            return false;
        }
    };
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return true,
            Err(e) => debug!("Probe of {} failed: {}", addr, e),
        }
    }
    false
}

/// Connection lifecycle, bounded retries and spool routing
pub struct DeliveryEngine<C: Connector> {
    connector: C,
    connection: Option<C::Connection>,
    policy: RetryPolicy,
    drain_pending: bool,
}

impl<C: Connector> DeliveryEngine<C> {
    /// Create an engine; it starts disconnected
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            connection: None,
            policy,
            // A previous run may have left entries behind.
            drain_pending: true,
        }
    }

    /// Current connection state
    pub fn state(&self) -> LinkState {
        if self.connection.is_some() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Underlying connector
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Per-cycle link check
    ///
    /// An unreachable server drops the handle. A reachable server without a
    /// handle gets connected. While connected, spooled entries are re-sent
    /// first so the database sees batches in order.
    pub fn poll_link(
        &mut self,
        spool: &mut Spool,
        deadline: &Deadline,
        metrics: &mut RelayMetrics,
    ) -> LinkState {
        if !self.connector.is_reachable() {
            if self.connection.take().is_some() {
                warn!("Lost connection to {}", self.connector.endpoint());
            } else {
                debug!("{} is unreachable", self.connector.endpoint());
            }
            return LinkState::Disconnected;
        }

        if self.connection.is_none() {
            self.connect(metrics);
        }
        if self.connection.is_some() && self.drain_pending {
            self.drain(spool, deadline, metrics);
        }
        self.state()
    }

    /// Return `true` once a live handle exists, connecting if needed
    ///
    /// A fresh connection is a transition from disconnected: the spool is
    /// drained before returning.
    pub fn ensure_connection(
        &mut self,
        spool: &mut Spool,
        deadline: &Deadline,
        metrics: &mut RelayMetrics,
    ) -> bool {
        if self.connection.is_some() {
            return true;
        }
        if !self.connector.is_reachable() {
            debug!("{} is unreachable", self.connector.endpoint());
            return false;
        }
        if !self.connect(metrics) {
            return false;
        }
        self.drain(spool, deadline, metrics);
        self.connection.is_some()
    }

    /// One write attempt on the current handle
    ///
    /// A transport-classified failure invalidates the handle.
    pub fn send(
        &mut self,
        batch: &Batch,
        deadline: &Deadline,
        metrics: &mut RelayMetrics,
    ) -> Result<(), TransportError> {
        if deadline.is_expired() {
            return Err(TransportError::DeadlineExceeded);
        }
        let conn = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        metrics.send_attempts += 1;

        match conn.write(batch) {
            Ok(()) => {
                info!("Sent {} points", batch.len());
                Ok(())
            }
            Err(e) => {
                if e.is_transport() {
                    debug!("Send failed, dropping connection: {}", e);
                    self.connection = None;
                } else {
                    warn!("Send rejected: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Send with bounded retries under `deadline`
    ///
    /// Reconnects before each attempt that lacks a handle and pauses between
    /// attempts, never past the deadline. Returns the number of attempts on
    /// success.
    pub fn send_with_retry(
        &mut self,
        batch: &Batch,
        deadline: &Deadline,
        spool: &mut Spool,
        metrics: &mut RelayMetrics,
    ) -> Result<u32, TransportError> {
        let policy = self.policy;
        let endpoint = self.connector.endpoint();
        with_deadline_retry(
            &policy,
            deadline,
            |attempt| {
                if attempt > 0 {
                    debug!(
                        "Retrying delivery (attempt {}/{})",
                        attempt + 1,
                        policy.max_attempts
                    );
                }
                if !self.ensure_connection(spool, deadline, metrics) {
                    return Err(TransportError::Unreachable {
                        endpoint: endpoint.clone(),
                    });
                }
                self.send(batch, deadline, metrics).map(|()| attempt + 1)
            },
            || TransportError::DeadlineExceeded,
        )
    }

    /// Deliver `batch` or spool it
    ///
    /// `deadline` is `None` when the cycle has no budget left: the batch is
    /// spooled without an attempt. Without a connection after the cycle's
    /// link poll the batch is spooled as well.
    pub fn deliver(
        &mut self,
        batch: &Batch,
        deadline: Option<Deadline>,
        spool: &mut Spool,
        metrics: &mut RelayMetrics,
    ) -> DeliveryOutcome {
        let reason = match deadline {
            None => {
                debug!("No delivery budget left this cycle");
                SpoolReason::NoBudget
            }
            Some(_) if self.connection.is_none() => {
                debug!("No connection, spooling batch");
                SpoolReason::Disconnected
            }
            Some(deadline) => match self.send_with_retry(batch, &deadline, spool, metrics) {
                Ok(attempts) => {
                    metrics.batches_sent += 1;
                    return DeliveryOutcome::Sent { attempts };
                }
                Err(e) => {
                    debug!("Delivery failed: {}", e);
                    SpoolReason::Failed(e)
                }
            },
        };

        spool.persist(batch);
        metrics.batches_spooled += 1;
        self.drain_pending = true;
        DeliveryOutcome::Spooled(reason)
    }

    fn connect(&mut self, metrics: &mut RelayMetrics) -> bool {
        match self.connector.connect() {
            Ok(conn) => {
                info!("Connected to {}", self.connector.endpoint());
                self.connection = Some(conn);
                self.drain_pending = true;
                metrics.reconnects += 1;
                true
            }
            Err(e) => {
                debug!("Connection to {} failed: {}", self.connector.endpoint(), e);
                false
            }
        }
    }

    fn drain(
        &mut self,
        spool: &mut Spool,
        deadline: &Deadline,
        metrics: &mut RelayMetrics,
    ) -> DrainReport {
        let Some(conn) = self.connection.as_mut() else {
            return DrainReport::default();
        };

        let mut broken = false;
        let report = spool.drain(|batch| {
            if deadline.is_expired() {
                return Err(TransportError::DeadlineExceeded);
            }
            metrics.send_attempts += 1;
            conn.write(batch).map_err(|e| {
                broken |= e.is_transport();
                e
            })
        });

        if broken {
            self.connection = None;
        }
        self.drain_pending = report.remaining > 0;
        metrics.drained += report.sent as u64;
        if report.sent > 0 || report.failed > 0 {
            info!(
                "Spool re-send: {} sent, {} failed, {} kept",
                report.sent, report.failed, report.remaining
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchBuilder, Reading};
    use crate::channel::{MemoryConnector, MemoryLink};
    use crate::sensor::Metric;
    use chrono::Utc;
    use std::net::TcpListener;
    use std::time::Instant;
    use tempfile::TempDir;

    fn batch(v: f64) -> Batch {
        BatchBuilder::new("pi")
            .build(Utc::now(), &[Reading::new(Metric::Humidity, Some(v))])
            .unwrap()
    }

    fn engine(link: &MemoryLink, attempts: u32) -> DeliveryEngine<MemoryConnector> {
        DeliveryEngine::new(
            link.connector(),
            RetryPolicy::fixed(attempts, Duration::from_millis(1)),
        )
    }

    fn spool(dir: &TempDir) -> Spool {
        Spool::new(dir.path().join("spool.json"), 100).with_drain_pause(Duration::ZERO)
    }

    fn budget() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[test]
    fn test_probe_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_reachable("127.0.0.1", port, Duration::from_secs(1)));

        drop(listener);
        assert!(!probe_reachable("127.0.0.1", port, Duration::from_millis(200)));
    }

    #[test]
    fn test_probe_unresolvable_host() {
        assert!(!probe_reachable("host.invalid", 8086, Duration::from_millis(200)));
    }

    #[test]
    fn test_poll_connects_and_drops() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        let mut engine = engine(&link, 3);

        assert_eq!(engine.state(), LinkState::Disconnected);
        assert_eq!(engine.poll_link(&mut spool, &budget(), &mut metrics), LinkState::Connected);
        assert_eq!(metrics.reconnects, 1);

        // Idle polls do not reconnect
        engine.poll_link(&mut spool, &budget(), &mut metrics);
        assert_eq!(link.connects(), 1);

        link.set_reachable(false);
        assert_eq!(
            engine.poll_link(&mut spool, &budget(), &mut metrics),
            LinkState::Disconnected
        );
    }

    #[test]
    fn test_deliver_first_try() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        let mut engine = engine(&link, 3);
        engine.poll_link(&mut spool, &budget(), &mut metrics);

        let outcome = engine.deliver(&batch(50.0), Some(budget()), &mut spool, &mut metrics);
        assert_eq!(outcome, DeliveryOutcome::Sent { attempts: 1 });
        assert_eq!(link.written().len(), 1);
        assert!(spool.is_empty());
        assert_eq!(metrics.batches_sent, 1);
    }

    #[test]
    fn test_retry_reconnects_after_transport_error() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        let mut engine = engine(&link, 3);
        engine.poll_link(&mut spool, &budget(), &mut metrics);

        link.fail_next_write(TransportError::Timeout { timeout_ms: 5000 });
        let outcome = engine.deliver(&batch(50.0), Some(budget()), &mut spool, &mut metrics);

        assert_eq!(outcome, DeliveryOutcome::Sent { attempts: 2 });
        assert_eq!(link.connects(), 2);
        assert_eq!(metrics.send_attempts, 2);
    }

    #[test]
    fn test_rejection_keeps_connection() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        let mut engine = engine(&link, 2);
        engine.poll_link(&mut spool, &budget(), &mut metrics);

        link.fail_next_write(TransportError::Rejected {
            status: 400,
            message: "bad field".to_string(),
        });
        let outcome = engine.deliver(&batch(50.0), Some(budget()), &mut spool, &mut metrics);
        assert_eq!(outcome, DeliveryOutcome::Sent { attempts: 2 });
        assert_eq!(link.connects(), 1);
    }

    #[test]
    fn test_exhausted_retries_spool() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        let mut engine = engine(&link, 3);
        engine.poll_link(&mut spool, &budget(), &mut metrics);

        link.refuse_connect(true);
        link.fail_next_write(TransportError::Connection {
            reason: "reset".to_string(),
        });
        let outcome = engine.deliver(&batch(50.0), Some(budget()), &mut spool, &mut metrics);

        assert!(matches!(outcome, DeliveryOutcome::Spooled(SpoolReason::Failed(_))));
        assert_eq!(link.write_attempts(), 1);
        assert_eq!(spool.len(), 1);
        assert_eq!(engine.state(), LinkState::Disconnected);
        assert_eq!(metrics.batches_spooled, 1);
    }

    #[test]
    fn test_no_budget_spools_without_attempt() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        let mut engine = engine(&link, 3);
        engine.poll_link(&mut spool, &budget(), &mut metrics);

        let outcome = engine.deliver(&batch(50.0), None, &mut spool, &mut metrics);
        assert_eq!(outcome, DeliveryOutcome::Spooled(SpoolReason::NoBudget));
        assert_eq!(link.write_attempts(), 0);
        assert_eq!(spool.len(), 1);
    }

    #[test]
    fn test_disconnected_spools_without_attempt() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        link.set_reachable(false);
        let mut engine = engine(&link, 3);
        engine.poll_link(&mut spool, &budget(), &mut metrics);

        let outcome = engine.deliver(&batch(50.0), Some(budget()), &mut spool, &mut metrics);
        assert_eq!(outcome, DeliveryOutcome::Spooled(SpoolReason::Disconnected));
        assert_eq!(link.write_attempts(), 0);
    }

    #[test]
    fn test_retry_respects_deadline() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        let mut engine = DeliveryEngine::new(
            link.connector(),
            RetryPolicy::fixed(50, Duration::from_millis(100)),
        );
        engine.poll_link(&mut spool, &budget(), &mut metrics);
        link.refuse_connect(true);
        link.fail_next_write(TransportError::Connection {
            reason: "reset".to_string(),
        });

        let start = Instant::now();
        let outcome = engine.deliver(
            &batch(50.0),
            Some(Deadline::after(Duration::from_millis(250))),
            &mut spool,
            &mut metrics,
        );
        assert!(!outcome.is_sent());
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[test]
    fn test_reconnect_drains_in_order_before_new_batch() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        let link = MemoryLink::new();
        link.set_reachable(false);
        let mut engine = engine(&link, 3);

        for v in [10.0, 11.0, 12.0] {
            engine.poll_link(&mut spool, &budget(), &mut metrics);
            engine.deliver(&batch(v), Some(budget()), &mut spool, &mut metrics);
        }
        assert_eq!(spool.len(), 3);

        link.set_reachable(true);
        engine.poll_link(&mut spool, &budget(), &mut metrics);
        engine.deliver(&batch(13.0), Some(budget()), &mut spool, &mut metrics);

        let values: Vec<f64> = link
            .written()
            .iter()
            .map(|b| b.points[0].value().unwrap())
            .collect();
        assert_eq!(values, vec![10.0, 11.0, 12.0, 13.0]);
        assert!(spool.is_empty());
        assert_eq!(metrics.drained, 3);
    }

    #[test]
    fn test_drain_failure_drops_connection_and_keeps_suffix() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        for v in [1.0, 2.0, 3.0] {
            spool.persist(&batch(v));
        }
        let link = MemoryLink::new();
        let mut engine = engine(&link, 3);

        link.fail_next_write(TransportError::Timeout { timeout_ms: 10 });
        let state = engine.poll_link(&mut spool, &budget(), &mut metrics);

        assert_eq!(state, LinkState::Disconnected);
        assert_eq!(spool.len(), 3);

        engine.poll_link(&mut spool, &budget(), &mut metrics);
        assert!(spool.is_empty());
        assert_eq!(link.written().len(), 3);
    }

    #[test]
    fn test_expired_deadline_stops_drain_and_keeps_connection() {
        let dir = TempDir::new().unwrap();
        let mut spool = spool(&dir);
        let mut metrics = RelayMetrics::new();
        for v in [1.0, 2.0, 3.0] {
            spool.persist(&batch(v));
        }
        let link = MemoryLink::new();
        let mut engine = engine(&link, 3);

        let state = engine.poll_link(&mut spool, &Deadline::at(Instant::now()), &mut metrics);

        assert_eq!(state, LinkState::Connected);
        assert!(link.written().is_empty());
        assert_eq!(link.write_attempts(), 0);
        assert_eq!(spool.len(), 3);
        assert_eq!(metrics.drained, 0);

        // The next cycle with budget picks the drain up again
        engine.poll_link(&mut spool, &budget(), &mut metrics);
        assert!(spool.is_empty());
        assert_eq!(link.written().len(), 3);
        assert_eq!(link.connects(), 1);
    }
}

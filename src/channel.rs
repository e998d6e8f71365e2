// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Database channel abstraction
//!
//! The delivery engine only knows two traits: a [`Connector`] that can
//! probe the server and open connections, and the [`Database`] handle
//! those connections produce. The InfluxDB adapter lives in its own crate;
//! this module also provides an in-memory implementation for tests and
//! dry runs.

use crate::batch::Batch;
use crate::error::TransportError;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A live database connection
pub trait Database {
    /// Write one batch; `Ok` means the server acknowledged it
    fn write(&mut self, batch: &Batch) -> Result<(), TransportError>;
}

/// Factory for database connections
pub trait Connector {
    /// Connection handle type
    type Connection: Database;

    /// Cheap pre-flight reachability check, bounded by a short timeout
    fn is_reachable(&mut self) -> bool;

    /// Full client handshake
    fn connect(&mut self) -> Result<Self::Connection, TransportError>;

    /// Human readable endpoint, for logs
    fn endpoint(&self) -> String;
}

/// Shared state behind the in-memory channel
#[derive(Debug, Default)]
struct LinkState {
    reachable: bool,
    refuse_connect: bool,
    scripted_failures: VecDeque<TransportError>,
    written: Vec<Batch>,
    write_attempts: u64,
    connects: u64,
}

/// In-memory database link with controllable failures
///
/// Clones share state, so a test keeps one handle to flip reachability
/// while the pipeline owns the connector.
#[derive(Debug, Clone, Default)]
pub struct MemoryLink {
    state: Rc<RefCell<LinkState>>,
}

impl MemoryLink {
    /// Create a reachable link
    pub fn new() -> Self {
        let link = Self::default();
        link.set_reachable(true);
        link
    }

    /// Make the server reachable or not; unreachable also fails writes
    pub fn set_reachable(&self, reachable: bool) {
        self.state.borrow_mut().reachable = reachable;
    }

    /// Whether the server is reachable
    pub fn is_reachable(&self) -> bool {
        self.state.borrow().reachable
    }

    /// Make the handshake fail even though the probe succeeds
    pub fn refuse_connect(&self, refuse: bool) {
        self.state.borrow_mut().refuse_connect = refuse;
    }

    /// Queue an error for the next write attempt
    pub fn fail_next_write(&self, error: TransportError) {
        self.state.borrow_mut().scripted_failures.push_back(error);
    }

    /// Batches acknowledged so far, in order
    pub fn written(&self) -> Vec<Batch> {
        self.state.borrow().written.clone()
    }

    /// Total write attempts, successful or not
    pub fn write_attempts(&self) -> u64 {
        self.state.borrow().write_attempts
    }

    /// Total successful handshakes
    pub fn connects(&self) -> u64 {
        self.state.borrow().connects
    }

    /// Connector backed by this link
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { link: self.clone() }
    }
}

/// [`Connector`] over a [`MemoryLink`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    link: MemoryLink,
}

impl Connector for MemoryConnector {
    type Connection = MemoryDatabase;

    fn is_reachable(&mut self) -> bool {
        self.link.is_reachable()
    }

    fn connect(&mut self) -> Result<MemoryDatabase, TransportError> {
        let mut state = self.link.state.borrow_mut();
        if !state.reachable {
            return Err(TransportError::Unreachable {
                endpoint: "memory".to_string(),
            });
        }
        if state.refuse_connect {
            return Err(TransportError::Connection {
                reason: "handshake refused".to_string(),
            });
        }
        state.connects += 1;
        Ok(MemoryDatabase {
            link: self.link.clone(),
        })
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

/// [`Database`] handle over a [`MemoryLink`]
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    link: MemoryLink,
}

impl Database for MemoryDatabase {
    fn write(&mut self, batch: &Batch) -> Result<(), TransportError> {
        let mut state = self.link.state.borrow_mut();
        state.write_attempts += 1;
        if let Some(err) = state.scripted_failures.pop_front() {
            return Err(err);
        }
        if !state.reachable {
            return Err(TransportError::Connection {
                reason: "connection reset".to_string(),
            });
        }
        state.written.push(batch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn batch() -> Batch {
        Batch {
            timestamp: Utc::now(),
            points: Vec::new(),
        }
    }

    #[test]
    fn test_memory_link_roundtrip() {
        let link = MemoryLink::new();
        let mut connector = link.connector();
        assert!(connector.is_reachable());

        let mut db = connector.connect().unwrap();
        db.write(&batch()).unwrap();
        assert_eq!(link.written().len(), 1);
        assert_eq!(link.connects(), 1);
    }

    #[test]
    fn test_memory_link_unreachable() {
        let link = MemoryLink::new();
        let mut connector = link.connector();
        let mut db = connector.connect().unwrap();

        link.set_reachable(false);
        assert!(!connector.is_reachable());
        assert!(connector.connect().is_err());
        assert!(db.write(&batch()).is_err());
        assert_eq!(link.write_attempts(), 1);
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_memory_link_scripted_failure() {
        let link = MemoryLink::new();
        let mut db = link.connector().connect().unwrap();
        link.fail_next_write(TransportError::Timeout { timeout_ms: 5000 });

        assert_eq!(
            db.write(&batch()),
            Err(TransportError::Timeout { timeout_ms: 5000 })
        );
        assert!(db.write(&batch()).is_ok());
    }

    #[test]
    fn test_refuse_connect() {
        let link = MemoryLink::new();
        link.refuse_connect(true);
        let mut connector = link.connector();
        assert!(connector.is_reachable());
        assert!(matches!(
            connector.connect(),
            Err(TransportError::Connection { .. })
        ));
    }
}

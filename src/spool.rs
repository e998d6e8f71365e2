// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Durable spool of undelivered batches
//!
//! Batches that could not be delivered are appended to a JSON file and
//! re-sent, oldest first, once the database is reachable again.
//!
//! # File Format
//!
//! ```text
//! [
//!   { "persisted_at": "...", "timestamp": "...", "points": [ ... ] },
//!   ...
//! ]
//! ```
//!
//! The whole array is rewritten through a temporary file and a rename, so a
//! crash mid-write leaves the previous version intact. The entry count is
//! capped; the oldest entries are evicted first.
//!
//! No spool operation ever returns an error to the cycle loop. Unreadable
//! or corrupt files read as empty, single undecodable entries are skipped,
//! and failed writes are logged.

use crate::batch::Batch;
use crate::error::{SpoolError, TransportError};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default maximum number of stored entries
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default pause between two re-delivered entries
pub const DEFAULT_DRAIN_PAUSE: Duration = Duration::from_millis(100);

/// One undelivered batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolEntry {
    /// When the entry was written to the spool
    pub persisted_at: DateTime<Utc>,
    /// The batch, with its original cycle timestamp
    #[serde(flatten)]
    pub batch: Batch,
}

impl SpoolEntry {
    /// Original cycle timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.batch.timestamp
    }
}

/// Outcome of a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Entries delivered and removed
    pub sent: usize,
    /// Entries that failed (0 or 1: the drain stops at the first failure)
    pub failed: usize,
    /// Entries left in the spool afterwards
    pub remaining: usize,
}

/// File-backed, capacity-bounded FIFO of undelivered batches
#[derive(Debug, Clone)]
pub struct Spool {
    path: PathBuf,
    fallback: PathBuf,
    max_entries: usize,
    drain_pause: Duration,
}

impl Spool {
    /// Create a spool stored at `path`, holding at most `max_entries`
    ///
    /// When the parent directory of `path` cannot be created, a file with
    /// the same name in the working directory is used instead.
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let fallback = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| path.clone());
        Self {
            path,
            fallback,
            max_entries: max_entries.max(1),
            drain_pause: DEFAULT_DRAIN_PAUSE,
        }
    }

    /// Set the pause between re-delivered entries
    pub fn with_drain_pause(mut self, pause: Duration) -> Self {
        self.drain_pause = pause;
        self
    }

    /// Configured spool path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum number of entries
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.load().len()
    }

    /// Whether the spool holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read every stored entry, oldest first
    pub fn load(&self) -> Vec<SpoolEntry> {
        let Some(source) = self.existing_file() else {
            return Vec::new();
        };
        match read_entries(source) {
            Ok(entries) => entries,
            Err(e @ SpoolError::Corrupt { .. }) => {
                warn!("{}; treating spool as empty", e);
                Vec::new()
            }
            Err(e) => {
                debug!("{}; treating spool as empty", e);
                Vec::new()
            }
        }
    }

    /// Append `batch`, evicting the oldest entries beyond the cap
    pub fn persist(&mut self, batch: &Batch) {
        self.persist_at(batch, Utc::now());
    }

    /// Append `batch` with an explicit persistence time
    pub fn persist_at(&mut self, batch: &Batch, persisted_at: DateTime<Utc>) {
        let mut entries = self.load();
        entries.push(SpoolEntry {
            persisted_at,
            batch: batch.clone(),
        });

        if entries.len() > self.max_entries {
            let evicted = entries.len() - self.max_entries;
            entries.drain(..evicted);
            warn!(
                "Spool reached its cap of {} entries; evicted {} oldest",
                self.max_entries, evicted
            );
        }

        match self.write_entries(&entries) {
            Ok(path) => info!(
                "Spooled {} points to {} ({} entries total)",
                batch.len(),
                path.display(),
                entries.len()
            ),
            Err(e) => error!("Failed to persist undelivered batch: {}", e),
        }
    }

    /// Remove the spool file
    pub fn clear(&mut self) {
        for path in [&self.path, &self.fallback] {
            match fs::remove_file(path) {
                Ok(()) => info!("Cleared spool file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to clear spool file {}: {}", path.display(), e),
            }
        }
    }

    /// Re-deliver stored entries in order through `send`
    ///
    /// Stops at the first failure and keeps the failed entry and everything
    /// after it, in their original order. Clears the spool when every entry
    /// went through.
    pub fn drain<F>(&mut self, mut send: F) -> DrainReport
    where
        F: FnMut(&Batch) -> Result<(), TransportError>,
    {
        let entries = self.load();
        if entries.is_empty() {
            return DrainReport::default();
        }

        info!("Re-sending {} spooled entries", entries.len());
        let mut report = DrainReport::default();

        for (idx, entry) in entries.iter().enumerate() {
            if entry.batch.is_empty() {
                continue;
            }
            if report.sent > 0 && !self.drain_pause.is_zero() {
                std::thread::sleep(self.drain_pause);
            }

            match send(&entry.batch) {
                Ok(()) => {
                    report.sent += 1;
                    debug!(
                        "Re-sent entry {}/{} ({})",
                        idx + 1,
                        entries.len(),
                        entry.timestamp()
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    debug!(
                        "Re-send of entry {}/{} ({}) failed: {}",
                        idx + 1,
                        entries.len(),
                        entry.timestamp(),
                        e
                    );
                    let rest = &entries[idx..];
                    report.remaining = rest.len();
                    if let Err(e) = self.write_entries(rest) {
                        error!(
                            "Failed to rewrite remaining spool entries, {} re-sent entries will be sent again: {}",
                            report.sent, e
                        );
                    }
                    info!(
                        "Re-send stopped: {} sent, {} entries kept",
                        report.sent,
                        rest.len()
                    );
                    return report;
                }
            }
        }

        self.clear();
        info!("All {} spooled entries re-sent", report.sent);
        report
    }

    fn existing_file(&self) -> Option<&Path> {
        [&self.path, &self.fallback]
            .into_iter()
            .find(|p| p.is_file())
            .map(PathBuf::as_path)
    }

    fn write_target(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
                match fs::create_dir_all(dir) {
                    Ok(()) => &self.path,
                    Err(e) => {
                        warn!(
                            "Cannot create spool directory {}: {}; using {}",
                            dir.display(),
                            e,
                            self.fallback.display()
                        );
                        &self.fallback
                    }
                }
            }
            _ => &self.path,
        }
    }

    fn write_entries(&self, entries: &[SpoolEntry]) -> Result<&Path, SpoolError> {
        let target = self.write_target();
        let io_err = |e: std::io::Error| SpoolError::Io {
            path: target.display().to_string(),
            reason: e.to_string(),
        };

        let json = serde_json::to_vec_pretty(entries).map_err(|e| SpoolError::Io {
            path: target.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut tmp = target.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, target).map_err(io_err)?;

        // Only one location may hold entries at a time.
        let other = if target == self.path {
            &self.fallback
        } else {
            &self.path
        };
        if other != target && other.is_file() {
            if let Err(e) = fs::remove_file(other) {
                warn!("Failed to remove stale spool file {}: {}", other.display(), e);
            }
        }
        Ok(target)
    }
}

/// Read the entry array; an entry that does not decode is skipped so the
/// rest of the file survives the next rewrite
fn read_entries(path: &Path) -> Result<Vec<SpoolEntry>, SpoolError> {
    let bytes = fs::read(path).map_err(|e| SpoolError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let raw: Vec<serde_json::Value> =
        serde_json::from_slice(&bytes).map_err(|e| SpoolError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let total = raw.len();
    let entries: Vec<SpoolEntry> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    "Skipping unreadable spool entry {}/{} in {}: {}",
                    idx + 1,
                    total,
                    path.display(),
                    e
                );
                None
            }
        })
        .collect();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchBuilder, Reading};
    use crate::sanitizer::{BoundsTable, Sanitizer};
    use crate::sensor::Metric;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::TempDir;

    fn batch(n: i64) -> Batch {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(n);
        BatchBuilder::new("pi")
            .build(ts, &[Reading::new(Metric::Temperature, Some(20.0 + n as f64 / 10.0))])
            .unwrap()
    }

    fn spool(dir: &TempDir, cap: usize) -> Spool {
        Spool::new(dir.path().join("failed.json"), cap).with_drain_pause(Duration::ZERO)
    }

    fn minutes(spool: &Spool) -> Vec<i64> {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        spool
            .load()
            .iter()
            .map(|e| (e.timestamp() - base).num_minutes())
            .collect()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let s = spool(&dir, 10);
        assert!(s.load().is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn test_persist_and_load_in_order() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 10);
        for n in 0..3 {
            s.persist(&batch(n));
        }
        assert_eq!(minutes(&s), vec![0, 1, 2]);
        assert_eq!(s.load()[1].batch, batch(1));
    }

    #[test]
    fn test_cap_keeps_most_recent() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 3);
        for n in 0..7 {
            s.persist(&batch(n));
        }
        assert_eq!(minutes(&s), vec![4, 5, 6]);
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed.json");
        fs::write(&path, b"{ not json").unwrap();
        let mut s = Spool::new(&path, 10);
        assert!(s.load().is_empty());

        s.persist(&batch(0));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let mut s = Spool::new(dir.path().join("nested/deeper/failed.json"), 10);
        s.persist(&batch(0));
        assert!(dir.path().join("nested/deeper/failed.json").is_file());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 10);
        s.persist(&batch(0));
        s.clear();
        assert!(s.is_empty());
        assert!(!s.path().exists());
        s.clear();
    }

    #[test]
    fn test_drain_empty() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 10);
        let mut calls = 0;
        let report = s.drain(|_| {
            calls += 1;
            Ok(())
        });
        assert_eq!(report, DrainReport::default());
        assert_eq!(calls, 0);
        assert!(s.is_empty());
    }

    #[test]
    fn test_drain_all_success_clears() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 10);
        for n in 0..4 {
            s.persist(&batch(n));
        }
        let mut seen = Vec::new();
        let report = s.drain(|b| {
            seen.push(b.clone());
            Ok(())
        });
        assert_eq!(report.sent, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(seen, (0..4).map(batch).collect::<Vec<_>>());
        assert!(s.is_empty());
    }

    #[test]
    fn test_drain_partial_failure_keeps_suffix() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 10);
        for n in 1..=5 {
            s.persist(&batch(n));
        }

        let mut calls = 0;
        let report = s.drain(|_| {
            calls += 1;
            if calls == 3 {
                Err(TransportError::Timeout { timeout_ms: 5000 })
            } else {
                Ok(())
            }
        });

        assert_eq!(
            report,
            DrainReport {
                sent: 2,
                failed: 1,
                remaining: 3
            }
        );
        assert_eq!(calls, 3);
        assert_eq!(minutes(&s), vec![3, 4, 5]);
    }

    #[test]
    fn test_huge_unbounded_reading_keeps_existing_entries() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 10);
        let builder = BatchBuilder::new("pi");
        for v in [40.0, 41.0] {
            let humidity = [Reading::new(Metric::Humidity, Some(v))];
            s.persist(&builder.build(Utc::now(), &humidity).unwrap());
        }

        let mut sanitizer = Sanitizer::new();
        let bounds = BoundsTable::new().get(Metric::Pm10);
        let pm10 = sanitizer.sanitize("pm10", Some(1e307), &bounds);
        let huge = builder
            .build(Utc::now(), &[Reading::new(Metric::Pm10, pm10)])
            .unwrap();
        s.persist(&huge);

        let entries = s.load();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].batch.point("pm10").unwrap().value(), Some(1e307));
    }

    #[test]
    fn test_undecodable_entry_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed.json");
        let mut s = spool(&dir, 10);
        for n in 0..3 {
            s.persist(&batch(n));
        }

        let mut raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        raw[1]["points"][0]["fields"]["value"] = serde_json::Value::Null;
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert_eq!(minutes(&s), vec![0, 2]);
        s.persist(&batch(3));
        assert_eq!(minutes(&s), vec![0, 2, 3]);
    }

    #[test]
    fn test_working_directory_fallback() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let name = format!("enviro-relay-fallback-{}.json", std::process::id());
        let fallback = PathBuf::from(&name);

        let mut s = Spool::new(blocker.join(&name), 10).with_drain_pause(Duration::ZERO);
        s.persist(&batch(0));
        s.persist(&batch(1));

        let written = fallback.is_file();
        let loaded = minutes(&s);
        s.clear();

        assert!(written);
        assert_eq!(loaded, vec![0, 1]);
        assert!(!fallback.exists());
        assert!(s.is_empty());
    }

    #[test]
    fn test_failed_rewrite_after_partial_drain_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let mut s = spool(&dir, 10);
        for n in 0..3 {
            s.persist(&batch(n));
        }
        // The temporary file cannot be created while a directory holds its name
        fs::create_dir(dir.path().join("failed.json.tmp")).unwrap();

        let mut calls = 0;
        let report = s.drain(|_| {
            calls += 1;
            if calls == 2 {
                Err(TransportError::Timeout { timeout_ms: 10 })
            } else {
                Ok(())
            }
        });

        assert_eq!(report.sent, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(minutes(&s), vec![0, 1, 2]);
    }
}

// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! InfluxDB line protocol encoding
//!
//! One line per point:
//!
//! ```text
//! measurement,tag=value field=1.5 1700000000000000000
//! ```
//!
//! All points of a batch share the batch timestamp, in nanoseconds.

use chrono::{DateTime, Utc};
use enviro_relay::{Batch, Point};
use std::fmt::Write;

/// Encode a whole batch, one line per point
pub fn encode_batch(batch: &Batch) -> String {
    let ts = timestamp_nanos(&batch.timestamp);
    let mut out = String::new();
    for point in &batch.points {
        if point.fields.is_empty() {
            continue;
        }
        encode_point(&mut out, point, ts);
        out.push('\n');
    }
    out
}

fn encode_point(out: &mut String, point: &Point, ts: i64) {
    out.push_str(&escape(&point.measurement, &[',', ' ']));
    for (key, value) in &point.tags {
        out.push(',');
        out.push_str(&escape(key, &[',', '=', ' ']));
        out.push('=');
        out.push_str(&escape(value, &[',', '=', ' ']));
    }

    let mut first = true;
    for (key, value) in &point.fields {
        out.push(if first { ' ' } else { ',' });
        first = false;
        out.push_str(&escape(key, &[',', '=', ' ']));
        out.push('=');
        // Floats always carry a decimal point so InfluxDB types them as float
        if value.fract() == 0.0 && value.abs() < 1e15 {
            let _ = write!(out, "{:.1}", value);
        } else {
            let _ = write!(out, "{}", value);
        }
    }

    let _ = write!(out, " {}", ts);
}

/// Nanoseconds since the epoch; saturates outside the representable range
pub fn timestamp_nanos(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or_else(|| {
        if ts.timestamp() < 0 {
            i64::MIN
        } else {
            i64::MAX
        }
    })
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

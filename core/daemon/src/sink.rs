//! Append-only session log files.
//!
//! Each session directory holds two independent streams:
//!
//! - `buttonsPressed.log`: one line per confirmed waypoint
//!   `<unixMillis> : <name> : <a1> : <a2> : <a3> : <longitude> : <latitude>`
//! - `positions.log`: one line per position report
//!   `<unixMillis> <x> <y> <z>`
//!
//! Every append opens the file, writes a single line, flushes, syncs and
//! closes it again. A crash between appends loses at most the line in flight.

use fs_err as fs;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use steplogger_core::WaypointDescriptor;

pub const WAYPOINT_LOG: &str = "buttonsPressed.log";
pub const POSITION_LOG: &str = "positions.log";

#[derive(Debug, thiserror::Error)]
#[error("Failed to append to {path}: {source}")]
pub struct SinkError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaypointEventRecord {
    pub timestamp: i64,
    pub fields: Vec<String>,
    pub longitude: f64,
    pub latitude: f64,
}

impl WaypointEventRecord {
    pub fn new(timestamp: i64, descriptor: &WaypointDescriptor, longitude: f64, latitude: f64) -> Self {
        Self {
            timestamp,
            fields: descriptor.fields().map(str::to_string).collect(),
            longitude,
            latitude,
        }
    }
}

impl fmt::Display for WaypointEventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp)?;
        for field in &self.fields {
            write!(f, " : {}", field)?;
        }
        write!(
            f,
            " : {} : {}",
            LegacyFloat(self.longitude),
            LegacyFloat(self.latitude)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRecord {
    pub timestamp: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl fmt::Display for PositionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.timestamp,
            LegacyFloat(self.x),
            LegacyFloat(self.y),
            LegacyFloat(self.z)
        )
    }
}

/// Formats doubles like `Double.toString`, which existing log consumers
/// parse: at least one fractional digit (`10.0`), `NaN` / `Infinity` for
/// non-finite values, and `d.dddE<exp>` outside `[1e-3, 1e7)`.
struct LegacyFloat(f64);

impl fmt::Display for LegacyFloat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value.is_nan() {
            return f.write_str("NaN");
        }
        if value.is_infinite() {
            return f.write_str(if value > 0.0 { "Infinity" } else { "-Infinity" });
        }

        let magnitude = value.abs();
        if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
            let plain = value.to_string();
            if plain.contains('.') {
                f.write_str(&plain)
            } else {
                write!(f, "{}.0", plain)
            }
        } else {
            let scientific = format!("{:e}", value);
            let (mantissa, exponent) = scientific
                .split_once('e')
                .unwrap_or((scientific.as_str(), "0"));
            if mantissa.contains('.') {
                write!(f, "{}E{}", mantissa, exponent)
            } else {
                write!(f, "{}.0E{}", mantissa, exponent)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn waypoint_path(&self) -> PathBuf {
        self.dir.join(WAYPOINT_LOG)
    }

    pub fn position_path(&self) -> PathBuf {
        self.dir.join(POSITION_LOG)
    }

    pub fn append_waypoint_event(&self, record: &WaypointEventRecord) -> Result<(), SinkError> {
        append_line(&self.waypoint_path(), record)
    }

    pub fn append_position_record(&self, record: &PositionRecord) -> Result<(), SinkError> {
        append_line(&self.position_path(), record)
    }
}

fn append_line(path: &Path, line: &dyn fmt::Display) -> Result<(), SinkError> {
    let wrap = |source: std::io::Error| SinkError {
        path: path.to_path_buf(),
        source,
    };

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(wrap)?;
    let payload = format!("{}\n", line);
    file.write_all(payload.as_bytes()).map_err(wrap)?;
    file.flush().map_err(wrap)?;
    file.sync_data().map_err(wrap)?;
    Ok(())
}
